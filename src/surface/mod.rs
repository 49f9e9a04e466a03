//! # 绘制表面模块（surface）
//!
//! ## 设计思路
//!
//! 合成器的绘制表面由外部服务提供，这里只定义契约：
//! - `SurfaceProvider`：创建设备、绑定设备、按尺寸/格式/透明模式创建表面
//! - `DrawingSurface`：可缩放、支持 begin/end 成对绘制的位图目标
//! - `SurfaceHost`：持有 provider，负责设备重建、全局绘制锁与设备丢失广播
//!
//! ## 实现思路
//!
//! - 表面之间交换的像素统一为 `Bitmap`（预乘 BGRA，32 位，紧密排列）。
//! - begin/end 的配对由 `DrawSession` 的 RAII 保证，失败路径同样会 end。
//! - `software` 子模块提供纯 CPU 实现，供演示程序与测试使用。

mod host;
pub mod software;

use std::sync::Arc;

use image::RgbaImage;

use crate::device::{DeviceError, RenderingDevice};

pub use host::{DeviceLostObserverId, DrawingLockGuard, SurfaceHandle, SurfaceHost};

/// 像素尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 表面像素格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePixelFormat {
    B8G8R8A8UIntNormalized,
    R8G8B8A8UIntNormalized,
}

/// 表面透明通道模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Premultiplied,
    Straight,
    Ignore,
}

/// 位图写入表面时的合成方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// 按预乘 alpha 叠加到已有内容上。
    SourceOver,
    /// 直接覆盖目标像素（不混合）。
    Copy,
}

/// 表面上的更新区域（左上闭、右下开）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl UpdateRect {
    pub fn from_size(size: PixelSize) -> Self {
        Self {
            left: 0,
            top: 0,
            right: size.width,
            bottom: size.height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// `begin_draw` 返回的绘制原点（表面可能位于图集中的某个偏移处）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawOffset {
    pub x: u32,
    pub y: u32,
}

/// 预乘 BGRA 位图，行跨度固定为 `width * 4`。
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    size: PixelSize,
    data: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("size", &self.size)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Bitmap {
    pub fn from_bgra_premultiplied(size: PixelSize, data: Vec<u8>) -> Result<Self, SurfaceError> {
        let expected = (size.width as usize)
            .checked_mul(size.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| SurfaceError::OutOfMemory(format!("位图尺寸溢出：{}", size)))?;

        if data.len() != expected {
            return Err(SurfaceError::InvalidArgument(format!(
                "位图字节长度不匹配：期望 {}，实际 {}",
                expected,
                data.len()
            )));
        }

        Ok(Self { size, data })
    }

    /// 创建全透明位图。
    pub fn transparent(size: PixelSize) -> Self {
        Self {
            size,
            data: vec![0; size.width as usize * size.height as usize * 4],
        }
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    pub fn stride(&self) -> usize {
        self.size.width as usize * 4
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// 读取单个像素（B, G, R, A）。
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * 4;
        let px = &self.data[offset..offset + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// 还原为非预乘 RGBA，便于编码为 PNG 等通用格式。
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let mut rgba = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            let (b, g, r, a) = (px[0], px[1], px[2], px[3]);
            if a == 0 {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let unpremultiply = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
            rgba.extend_from_slice(&[unpremultiply(r), unpremultiply(g), unpremultiply(b), a]);
        }
        RgbaImage::from_raw(self.size.width, self.size.height, rgba)
    }
}

/// 表面操作错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// 底层设备已失效，等待 `SurfaceHost` 重建后重绘。
    #[error("渲染设备已丢失")]
    DeviceLost,

    #[error("资源不足：{0}")]
    OutOfMemory(String),

    #[error("参数无效：{0}")]
    InvalidArgument(String),

    #[error("表面未处于绘制状态")]
    NotDrawing,

    #[error("绘制后端错误：{0}")]
    Backend(String),
}

impl SurfaceError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

/// 可绘制表面。
///
/// 调用方必须成对调用 `begin_draw` / `end_draw`，推荐通过 `DrawSession` 使用。
pub trait DrawingSurface: Send {
    fn size(&self) -> PixelSize;

    /// 调整表面尺寸，原有内容不保证保留。
    fn resize(&mut self, size: PixelSize) -> Result<(), SurfaceError>;

    fn begin_draw(&mut self, rect: UpdateRect) -> Result<DrawOffset, SurfaceError>;

    fn draw_bitmap(
        &mut self,
        bitmap: &Bitmap,
        offset: DrawOffset,
        mode: CompositeMode,
    ) -> Result<(), SurfaceError>;

    fn end_draw(&mut self) -> Result<(), SurfaceError>;

    /// 读回当前内容；不支持读回的后端返回 `None`。
    fn snapshot(&self) -> Option<Bitmap> {
        None
    }
}

/// 外部 Surface Provider 契约。
pub trait SurfaceProvider: Send + Sync {
    fn create_device(&self) -> Result<Arc<dyn RenderingDevice>, DeviceError>;

    /// 把设备设置为合成器的绘制设备（设备丢失重建后同样走这里）。
    fn set_rendering_device(&self, device: Arc<dyn RenderingDevice>) -> Result<(), DeviceError>;

    fn create_drawing_surface(
        &self,
        size: PixelSize,
        format: SurfacePixelFormat,
        alpha_mode: AlphaMode,
    ) -> Result<Box<dyn DrawingSurface>, SurfaceError>;
}

/// 一次作用域绘制。
///
/// 析构时自动 `end_draw`；end 失败只记录日志（绘制结果以 draw 阶段为准）。
pub struct DrawSession<'a> {
    surface: &'a mut dyn DrawingSurface,
    offset: DrawOffset,
}

impl<'a> DrawSession<'a> {
    pub fn begin(surface: &'a mut dyn DrawingSurface, rect: UpdateRect) -> Result<Self, SurfaceError> {
        let offset = surface.begin_draw(rect)?;
        Ok(Self { surface, offset })
    }

    pub fn offset(&self) -> DrawOffset {
        self.offset
    }

    pub fn draw_bitmap(&mut self, bitmap: &Bitmap, mode: CompositeMode) -> Result<(), SurfaceError> {
        self.surface.draw_bitmap(bitmap, self.offset, mode)
    }
}

impl Drop for DrawSession<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.surface.end_draw() {
            log::warn!("⚠️ EndDraw 失败：{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_rejects_mismatched_length() {
        let result = Bitmap::from_bgra_premultiplied(PixelSize::new(2, 2), vec![0; 15]);
        assert!(matches!(result, Err(SurfaceError::InvalidArgument(_))));
    }

    #[test]
    fn bitmap_to_rgba_unpremultiplies() {
        // 半透明红色：预乘后 R=128, A=128
        let bitmap =
            Bitmap::from_bgra_premultiplied(PixelSize::new(1, 1), vec![0, 0, 128, 128]).expect("valid bitmap");
        let rgba = bitmap.to_rgba_image().expect("rgba conversion");
        let px = rgba.get_pixel(0, 0).0;

        assert_eq!(px[3], 128);
        assert_eq!(px[0], 255);
        assert_eq!(px[1], 0);
        assert_eq!(px[2], 0);
    }

    #[test]
    fn update_rect_from_size_covers_whole_surface() {
        let rect = UpdateRect::from_size(PixelSize::new(30, 20));
        assert_eq!(rect.width(), 30);
        assert_eq!(rect.height(), 20);
    }
}
