//! # 解码与变换流水线模块
//!
//! ## 设计思路
//!
//! 把解码器抽象为 `ImageDecoder`，流水线只依赖三个动作：解码、格式转换、缩放。
//! 默认实现 `CodecDecoder` 基于 `image` 解码、`fast_image_resize` 缩放，
//! 在完整解码前先读 header 尺寸做像素与内存上限检查。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸，按上限快速拒绝
//! 2. 完整解码为 `DynamicImage`，保留原始像素格式供规划器判断
//! 3. 格式转换：转为预乘 alpha 的 BGRA（表面的规范格式）
//! 4. 缩放：在预乘空间上做卷积缩放，失败回退 `image::imageops::resize`

use std::io::Cursor;

use fast_image_resize as fr;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};

use super::config::LoaderConfig;
use super::planner::{InterpolationTier, SourcePixelFormat};
use super::source::RawImageData;
use super::ImageError;
use crate::surface::{Bitmap, PixelSize};

/// 解码器产出的像素源。
pub trait PixelSource: Send {
    /// 读取像素尺寸。
    fn size(&self) -> Result<PixelSize, ImageError>;

    fn pixel_format(&self) -> SourcePixelFormat;

    /// 取出规范格式（预乘 BGRA）的位图。
    fn into_bitmap(self: Box<Self>) -> Result<Bitmap, ImageError>;
}

/// 外部图片解码器契约。
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, raw: &RawImageData, config: &LoaderConfig) -> Result<Box<dyn PixelSource>, ImageError>;

    fn convert(
        &self,
        source: Box<dyn PixelSource>,
        format: SourcePixelFormat,
    ) -> Result<Box<dyn PixelSource>, ImageError>;

    fn scale(
        &self,
        source: Box<dyn PixelSource>,
        size: PixelSize,
        tier: InterpolationTier,
        config: &LoaderConfig,
    ) -> Result<Box<dyn PixelSource>, ImageError>;
}

/// 刚解码、尚未转换的图像。
struct DecodedImage {
    image: DynamicImage,
    format: SourcePixelFormat,
}

impl PixelSource for DecodedImage {
    fn size(&self) -> Result<PixelSize, ImageError> {
        let (width, height) = self.image.dimensions();
        Ok(PixelSize::new(width, height))
    }

    fn pixel_format(&self) -> SourcePixelFormat {
        self.format
    }

    fn into_bitmap(self: Box<Self>) -> Result<Bitmap, ImageError> {
        premultiplied_bgra(self.image)
    }
}

/// 已处于规范格式的位图。
struct CanonicalBitmap(Bitmap);

impl PixelSource for CanonicalBitmap {
    fn size(&self) -> Result<PixelSize, ImageError> {
        Ok(self.0.size())
    }

    fn pixel_format(&self) -> SourcePixelFormat {
        SourcePixelFormat::Bgra8Premultiplied
    }

    fn into_bitmap(self: Box<Self>) -> Result<Bitmap, ImageError> {
        Ok(self.0)
    }
}

/// 基于 `image` + `fast_image_resize` 的默认解码器。
#[derive(Debug, Default, Clone, Copy)]
pub struct CodecDecoder;

impl CodecDecoder {
    pub fn new() -> Self {
        Self
    }

    /// 仅通过内存中的图片头信息读取宽高。
    fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
        let reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

        reader
            .into_dimensions()
            .map_err(|e| ImageError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
    }

    fn validate_pixel_limits(config: &LoaderConfig, width: u32, height: u32) -> Result<(), ImageError> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

        if pixels > config.max_decoded_pixels {
            return Err(ImageError::ResourceLimit(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, config.max_decoded_pixels
            )));
        }

        Ok(())
    }

    fn validate_decoded_memory_limits(config: &LoaderConfig, width: u32, height: u32) -> Result<(), ImageError> {
        let estimated = (width as u64)
            .checked_mul(height as u64)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| ImageError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

        if estimated > config.max_decoded_bytes {
            return Err(ImageError::ResourceLimit(format!(
                "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
                estimated as f64 / 1024.0 / 1024.0,
                config.max_decoded_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        Ok(())
    }

    fn resize_with_fast_image_resize(
        bitmap: &Bitmap,
        size: PixelSize,
        filter: FilterType,
    ) -> Result<Bitmap, ImageError> {
        let src = bitmap.size();
        let src_image = fr::images::Image::from_vec_u8(src.width, src.height, bitmap.data().to_vec(), fr::PixelType::U8x4)
            .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(size.width, size.height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        // 源数据已预乘，不能再做一次乘除 alpha
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)))
            .use_alpha(false);

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        let mut pixels = dst_image.into_vec();
        clamp_to_alpha(&mut pixels);
        Bitmap::from_bgra_premultiplied(size, pixels)
            .map_err(|e| ImageError::Decode(format!("缩放输出缓冲异常：{}", e)))
    }

    /// 回退路径：四个通道按同样方式卷积，通道顺序不影响结果。
    fn resize_with_image(bitmap: &Bitmap, size: PixelSize, filter: FilterType) -> Result<Bitmap, ImageError> {
        let src = bitmap.size();
        let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(src.width, src.height, bitmap.data().to_vec())
            .ok_or_else(|| ImageError::Decode("源位图缓冲长度异常".to_string()))?;
        let mut pixels = image::imageops::resize(&buffer, size.width, size.height, filter).into_raw();
        clamp_to_alpha(&mut pixels);
        Bitmap::from_bgra_premultiplied(size, pixels)
            .map_err(|e| ImageError::Decode(format!("缩放输出缓冲异常：{}", e)))
    }
}

impl ImageDecoder for CodecDecoder {
    fn decode(&self, raw: &RawImageData, config: &LoaderConfig) -> Result<Box<dyn PixelSource>, ImageError> {
        image::guess_format(&raw.bytes)
            .map_err(|e| ImageError::InvalidFormat(format!("不支持的图片格式：{}", e)))?;

        let (header_width, header_height) = Self::inspect_dimensions_from_memory(&raw.bytes)?;
        Self::validate_pixel_limits(config, header_width, header_height)?;
        Self::validate_decoded_memory_limits(config, header_width, header_height)?;

        let decoded = image::load_from_memory(&raw.bytes)
            .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

        let (width, height) = decoded.dimensions();
        Self::validate_pixel_limits(config, width, height)?;
        Self::validate_decoded_memory_limits(config, width, height)?;

        let format = SourcePixelFormat::from(decoded.color());
        log::debug!(
            "🧩 图片解码完成 - 来源: {} 尺寸: {}x{} 格式: {:?}",
            raw.source_hint,
            width,
            height,
            format
        );

        Ok(Box::new(DecodedImage { image: decoded, format }))
    }

    fn convert(
        &self,
        source: Box<dyn PixelSource>,
        format: SourcePixelFormat,
    ) -> Result<Box<dyn PixelSource>, ImageError> {
        if format != SourcePixelFormat::Bgra8Premultiplied {
            return Err(ImageError::Decode(format!("不支持转换到 {:?}", format)));
        }
        Ok(Box::new(CanonicalBitmap(source.into_bitmap()?)))
    }

    fn scale(
        &self,
        source: Box<dyn PixelSource>,
        size: PixelSize,
        tier: InterpolationTier,
        config: &LoaderConfig,
    ) -> Result<Box<dyn PixelSource>, ImageError> {
        if size.is_empty() {
            return Err(ImageError::Decode(format!("缩放目标尺寸无效：{}", size)));
        }

        let bitmap = source.into_bitmap()?;
        if bitmap.size() == size {
            return Ok(Box::new(CanonicalBitmap(bitmap)));
        }

        let filter = config.filter_for(tier);
        log::debug!("🧩 缩放：{} -> {}（tier={:?} filter={:?}）", bitmap.size(), size, tier, filter);

        let scaled = match Self::resize_with_fast_image_resize(&bitmap, size, filter) {
            Ok(scaled) => scaled,
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 缩放失败，回退 image::imageops::resize：{}", err);
                Self::resize_with_image(&bitmap, size, filter)?
            }
        };

        Ok(Box::new(CanonicalBitmap(scaled)))
    }
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}

/// 带负瓣的滤波器（Lanczos、CatmullRom）在透明边缘会让颜色略超 alpha，
/// 预乘数据要求每个颜色通道不大于 alpha。
fn clamp_to_alpha(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        let a = px[3];
        for channel in &mut px[..3] {
            *channel = (*channel).min(a);
        }
    }
}

/// 转为预乘 alpha 的 BGRA。
fn premultiplied_bgra(image: DynamicImage) -> Result<Bitmap, ImageError> {
    let (width, height) = image.dimensions();
    let mut bytes = image.into_rgba8().into_raw();

    for px in bytes.chunks_exact_mut(4) {
        let a = px[3] as u32;
        let premultiply = |c: u8| ((c as u32 * a + 127) / 255) as u8;
        let (r, g, b) = (premultiply(px[0]), premultiply(px[1]), premultiply(px[2]));
        px[0] = b;
        px[1] = g;
        px[2] = r;
    }

    Bitmap::from_bgra_premultiplied(PixelSize::new(width, height), bytes)
        .map_err(|e| ImageError::Decode(format!("解码后像素数据长度异常：{}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::{ImageFormat, RgbaImage};

    fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Bytes {
        let image = RgbaImage::from_pixel(width, height, Rgba(rgba));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        Bytes::from(out.into_inner())
    }

    fn raw(bytes: Bytes) -> RawImageData {
        RawImageData {
            bytes,
            source_hint: "test",
        }
    }

    #[test]
    fn decode_reports_natural_size_and_format() {
        let decoder = CodecDecoder::new();
        let source = decoder
            .decode(&raw(png_bytes(6, 3, [255, 0, 0, 255])), &LoaderConfig::default())
            .expect("decode");

        assert_eq!(source.size().expect("size"), PixelSize::new(6, 3));
        assert_eq!(source.pixel_format(), SourcePixelFormat::Rgba8);
    }

    #[test]
    fn convert_produces_premultiplied_bgra() {
        let decoder = CodecDecoder::new();
        let source = decoder
            .decode(&raw(png_bytes(1, 1, [255, 0, 0, 128])), &LoaderConfig::default())
            .expect("decode");
        let converted = decoder
            .convert(source, SourcePixelFormat::Bgra8Premultiplied)
            .expect("convert");
        assert_eq!(converted.pixel_format(), SourcePixelFormat::Bgra8Premultiplied);

        let bitmap = converted.into_bitmap().expect("bitmap");
        assert_eq!(bitmap.pixel(0, 0), Some([0, 0, 128, 128]));
    }

    #[test]
    fn scale_hits_requested_size() {
        let decoder = CodecDecoder::new();
        let config = LoaderConfig::default();
        let source = decoder
            .decode(&raw(png_bytes(40, 20, [0, 255, 0, 255])), &config)
            .expect("decode");
        let scaled = decoder
            .scale(source, PixelSize::new(10, 5), InterpolationTier::HighQuality, &config)
            .expect("scale");

        let bitmap = scaled.into_bitmap().expect("bitmap");
        assert_eq!(bitmap.size(), PixelSize::new(10, 5));
        let [b, g, r, a] = bitmap.pixel(5, 2).expect("pixel in range");
        assert!(g >= 250 && a >= 250, "green should survive resampling: {:?}", [b, g, r, a]);
        assert!(b <= 5 && r <= 5);
    }

    fn encode_png(image: RgbaImage) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        Bytes::from(out.into_inner())
    }

    fn assert_valid_premultiplied(bitmap: &Bitmap) {
        for px in bitmap.data().chunks_exact(4) {
            assert!(
                px[0] <= px[3] && px[1] <= px[3] && px[2] <= px[3],
                "color exceeds alpha: {:?}",
                px
            );
        }
    }

    #[test]
    fn downscale_keeps_translucent_pixels_premultiplied() {
        let decoder = CodecDecoder::new();
        let config = LoaderConfig::default();
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 0]));

        let source = decoder.decode(&raw(encode_png(image)), &config).expect("decode");
        let converted = decoder
            .convert(source, SourcePixelFormat::Bgra8Premultiplied)
            .expect("convert");
        let scaled = decoder
            .scale(converted, PixelSize::new(1, 1), InterpolationTier::HighQuality, &config)
            .expect("scale");

        let bitmap = scaled.into_bitmap().expect("bitmap");
        assert_valid_premultiplied(&bitmap);
        let px = bitmap.pixel(0, 0).expect("pixel");
        for channel in px {
            assert!((120..=136).contains(&channel), "expected half coverage, got {:?}", px);
        }
    }

    #[test]
    fn linear_scale_of_alpha_gradient_stays_premultiplied() {
        let decoder = CodecDecoder::new();
        let config = LoaderConfig::default();
        let image = RgbaImage::from_fn(16, 16, |x, y| {
            let alpha = ((x + y) * 8).min(255) as u8;
            Rgba([255, (x * 16) as u8, 40, alpha])
        });

        let source = decoder.decode(&raw(encode_png(image)), &config).expect("decode");
        let scaled = decoder
            .scale(source, PixelSize::new(10, 10), InterpolationTier::Linear, &config)
            .expect("scale");

        let bitmap = scaled.into_bitmap().expect("bitmap");
        assert_eq!(bitmap.size(), PixelSize::new(10, 10));
        assert_valid_premultiplied(&bitmap);
    }

    #[test]
    fn fallback_resize_clamps_ringing() {
        let mut data: Vec<u8> = Vec::new();
        for x in 0..8 {
            data.extend_from_slice(if x % 2 == 0 { &[255, 255, 255, 255] } else { &[0, 0, 0, 0] });
        }
        let bitmap = Bitmap::from_bgra_premultiplied(PixelSize::new(8, 1), data).expect("bitmap");

        let resized = CodecDecoder::resize_with_image(&bitmap, PixelSize::new(3, 1), FilterType::Lanczos3)
            .expect("resize");
        assert_valid_premultiplied(&resized);
    }

    #[test]
    fn garbage_bytes_fail_before_decode() {
        let decoder = CodecDecoder::new();
        let result = decoder.decode(&raw(Bytes::from_static(b"definitely not an image")), &LoaderConfig::default());
        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn header_pixel_limit_rejects_large_images() {
        let decoder = CodecDecoder::new();
        let config = LoaderConfig {
            max_decoded_pixels: 100,
            ..LoaderConfig::default()
        };
        let result = decoder.decode(&raw(png_bytes(20, 20, [0, 0, 0, 255])), &config);
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }
}
