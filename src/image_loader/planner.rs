//! # 解码规划
//!
//! ## 设计思路
//!
//! 根据原始尺寸与目标尺寸计算输出尺寸、插值档位与是否需要格式转换。
//! 纯函数、无副作用，流水线每轮加载都重新计算。
//!
//! ## 实现思路
//!
//! 1. 原始尺寸达到哨兵值（`i32::MAX`）视为损坏输入
//! 2. 目标为 0 的轴使用原始尺寸
//! 3. 原始尺寸已落在目标框内则不缩放
//! 4. 否则按收缩更多的轴夹到目标值，另一轴按比例截断推导（64 位整数运算）
//! 5. 输出每一轴至少为 1

use image::ColorType;

use super::ImageError;
use crate::surface::PixelSize;

const DIMENSION_SENTINEL: u32 = i32::MAX as u32;

/// 解码出的像素格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePixelFormat {
    /// 预乘 alpha 的 32 位 BGRA（表面的规范格式）。
    Bgra8Premultiplied,
    Rgba8,
    Rgb8,
    Luma8,
    LumaA8,
    Rgba16,
    Rgb16,
    Luma16,
    LumaA16,
    Rgba32F,
    Rgb32F,
    Unknown,
}

impl From<ColorType> for SourcePixelFormat {
    fn from(color: ColorType) -> Self {
        match color {
            ColorType::Rgba8 => Self::Rgba8,
            ColorType::Rgb8 => Self::Rgb8,
            ColorType::L8 => Self::Luma8,
            ColorType::La8 => Self::LumaA8,
            ColorType::Rgba16 => Self::Rgba16,
            ColorType::Rgb16 => Self::Rgb16,
            ColorType::L16 => Self::Luma16,
            ColorType::La16 => Self::LumaA16,
            ColorType::Rgba32F => Self::Rgba32F,
            ColorType::Rgb32F => Self::Rgb32F,
            _ => Self::Unknown,
        }
    }
}

/// 插值档位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationTier {
    /// 放大或温和缩小（两轴缩放比例都不低于 0.5）。
    Linear,
    /// 大幅缩小，使用更慢但更清晰的滤镜。
    HighQuality,
}

/// 单次加载的解码计划。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodePlan {
    pub natural_size: PixelSize,
    pub target_width: u32,
    pub target_height: u32,
    pub needs_format_conversion: bool,
    pub interpolation: InterpolationTier,
}

impl DecodePlan {
    pub fn target_size(&self) -> PixelSize {
        PixelSize::new(self.target_width, self.target_height)
    }

    pub fn needs_scaling(&self) -> bool {
        self.target_size() != self.natural_size
    }
}

/// 计算解码计划。
///
/// # 示例
/// ```rust
/// use composition_image::image_loader::{plan, InterpolationTier, SourcePixelFormat};
///
/// let p = plan(4000, 2000, 1000, 1000, SourcePixelFormat::Rgba8)?;
/// assert_eq!((p.target_width, p.target_height), (1000, 500));
/// assert_eq!(p.interpolation, InterpolationTier::HighQuality);
/// # Ok::<(), composition_image::image_loader::ImageError>(())
/// ```
pub fn plan(
    natural_width: u32,
    natural_height: u32,
    target_width: u32,
    target_height: u32,
    natural_format: SourcePixelFormat,
) -> Result<DecodePlan, ImageError> {
    if natural_width >= DIMENSION_SENTINEL || natural_height >= DIMENSION_SENTINEL {
        return Err(ImageError::InvalidArgument(format!(
            "原始尺寸异常：{}x{}",
            natural_width, natural_height
        )));
    }

    let bound_w = if target_width == 0 { natural_width } else { target_width };
    let bound_h = if target_height == 0 { natural_height } else { target_height };

    let (out_w, out_h) = if natural_width <= bound_w && natural_height <= bound_h {
        (natural_width, natural_height)
    } else {
        let nat_w = natural_width as u64;
        let nat_h = natural_height as u64;
        let bw = bound_w as u64;
        let bh = bound_h as u64;

        // bw/nat_w < bh/nat_h：宽度收缩更多
        if bw * nat_h < bh * nat_w {
            (bound_w, (bw * nat_h / nat_w.max(1)) as u32)
        } else {
            ((bh * nat_w / nat_h.max(1)) as u32, bound_h)
        }
    };

    let out_w = out_w.max(1);
    let out_h = out_h.max(1);

    let interpolation = if out_w as u64 * 2 >= natural_width as u64 && out_h as u64 * 2 >= natural_height as u64 {
        InterpolationTier::Linear
    } else {
        InterpolationTier::HighQuality
    };

    let needs_format_conversion = !matches!(
        natural_format,
        SourcePixelFormat::Bgra8Premultiplied | SourcePixelFormat::Unknown
    );

    Ok(DecodePlan {
        natural_size: PixelSize::new(natural_width, natural_height),
        target_width: out_w,
        target_height: out_h,
        needs_format_conversion,
        interpolation,
    })
}
