//! # 软件绘制后端
//!
//! ## 设计思路
//!
//! 用 CPU 缓冲区模拟合成器的绘制表面，满足 `SurfaceProvider` 的全部契约：
//! - 设备可被“移除”（`simulate_device_loss`），移除后绘制返回 `DeviceLost`
//! - 绑定新设备时，所有存活表面的内容被清空（与真实合成器一致，需要重绘）
//! - 同一表面不允许嵌套 begin_draw
//!
//! ## 实现思路
//!
//! 表面像素放在 `Arc<Mutex<SurfaceBuffer>>` 中，provider 只保留弱引用，
//! 以便在设备重绑时批量清空，同时不延长表面生命周期。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use super::{
    AlphaMode, Bitmap, CompositeMode, DrawOffset, DrawingSurface, PixelSize, SurfaceError,
    SurfacePixelFormat, SurfaceProvider, UpdateRect,
};
use crate::device::{DeviceError, DeviceId, RenderingDevice};

/// 软件设备。
pub struct SoftwareDevice {
    id: DeviceId,
    removed: watch::Sender<bool>,
}

impl SoftwareDevice {
    fn new(id: DeviceId) -> Self {
        let (removed, _) = watch::channel(false);
        Self { id, removed }
    }

    fn remove(&self) {
        self.removed.send_replace(true);
    }
}

impl RenderingDevice for SoftwareDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn removed_signal(&self) -> watch::Receiver<bool> {
        self.removed.subscribe()
    }
}

struct SurfaceBuffer {
    size: PixelSize,
    format: SurfacePixelFormat,
    pixels: Vec<u8>,
}

impl SurfaceBuffer {
    fn clear(&mut self) {
        self.pixels.fill(0);
    }
}

struct ProviderState {
    bound: Option<Arc<SoftwareDevice>>,
    created: HashMap<DeviceId, Weak<SoftwareDevice>>,
    surfaces: Vec<Weak<Mutex<SurfaceBuffer>>>,
}

struct ProviderInner {
    next_device_id: AtomicU64,
    state: Mutex<ProviderState>,
}

impl ProviderInner {
    fn bound_device_usable(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.bound.as_ref().is_some_and(|device| !device.is_removed()))
            .unwrap_or(false)
    }
}

/// CPU 版 Surface Provider。克隆共享同一组设备与表面。
#[derive(Clone)]
pub struct SoftwareSurfaceProvider {
    inner: Arc<ProviderInner>,
}

impl Default for SoftwareSurfaceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareSurfaceProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                next_device_id: AtomicU64::new(1),
                state: Mutex::new(ProviderState {
                    bound: None,
                    created: HashMap::new(),
                    surfaces: Vec::new(),
                }),
            }),
        }
    }

    /// 将当前绑定的设备标记为已移除，模拟驱动重置。
    ///
    /// 返回被移除的设备；未绑定设备时返回 `None`。
    pub fn simulate_device_loss(&self) -> Option<DeviceId> {
        let state = self.inner.state.lock().ok()?;
        let device = state.bound.as_ref()?;
        log::warn!("🧪 模拟设备丢失：{}", device.id());
        device.remove();
        Some(device.id())
    }

    pub fn bound_device(&self) -> Option<DeviceId> {
        let state = self.inner.state.lock().ok()?;
        state.bound.as_ref().map(|device| device.id())
    }

    /// 当前存活的表面数量。
    pub fn live_surface_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|state| state.surfaces.iter().filter(|s| s.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl SurfaceProvider for SoftwareSurfaceProvider {
    fn create_device(&self) -> Result<Arc<dyn RenderingDevice>, DeviceError> {
        let id = DeviceId::new(self.inner.next_device_id.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(SoftwareDevice::new(id));
        let mut state = self.inner.state.lock().map_err(|_| DeviceError::LockPoisoned)?;
        state.created.insert(id, Arc::downgrade(&device));
        log::debug!("🖥️ 已创建软件设备 {}", id);
        Ok(device)
    }

    fn set_rendering_device(&self, device: Arc<dyn RenderingDevice>) -> Result<(), DeviceError> {
        if device.is_removed() {
            return Err(DeviceError::Binding(format!("{} 已被移除", device.id())));
        }

        let mut state = self.inner.state.lock().map_err(|_| DeviceError::LockPoisoned)?;
        // 只接受本 provider 创建的设备
        state.created.retain(|_, created| created.strong_count() > 0);
        let software = state
            .created
            .get(&device.id())
            .and_then(Weak::upgrade)
            .ok_or_else(|| DeviceError::Binding(format!("{} 不是本 provider 创建的设备", device.id())))?;

        state.surfaces.retain(|surface| surface.strong_count() > 0);
        for surface in state.surfaces.iter().filter_map(Weak::upgrade) {
            if let Ok(mut buffer) = surface.lock() {
                buffer.clear();
            }
        }

        state.bound = Some(software);
        Ok(())
    }

    fn create_drawing_surface(
        &self,
        size: PixelSize,
        format: SurfacePixelFormat,
        _alpha_mode: AlphaMode,
    ) -> Result<Box<dyn DrawingSurface>, SurfaceError> {
        let pixels = allocate_pixels(size)?;
        let buffer = Arc::new(Mutex::new(SurfaceBuffer {
            size,
            format,
            pixels,
        }));

        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| SurfaceError::Backend("provider 状态锁已中毒".to_string()))?;
        state.surfaces.retain(|surface| surface.strong_count() > 0);
        state.surfaces.push(Arc::downgrade(&buffer));

        Ok(Box::new(SoftwareSurface {
            provider: Arc::clone(&self.inner),
            buffer,
            drawing: None,
        }))
    }
}

fn allocate_pixels(size: PixelSize) -> Result<Vec<u8>, SurfaceError> {
    let len = (size.width as usize)
        .checked_mul(size.height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| SurfaceError::OutOfMemory(format!("表面尺寸溢出：{}", size)))?;
    Ok(vec![0; len])
}

/// 软件表面。
pub struct SoftwareSurface {
    provider: Arc<ProviderInner>,
    buffer: Arc<Mutex<SurfaceBuffer>>,
    drawing: Option<UpdateRect>,
}

impl SoftwareSurface {
    fn lock_buffer(&self) -> Result<std::sync::MutexGuard<'_, SurfaceBuffer>, SurfaceError> {
        self.buffer
            .lock()
            .map_err(|_| SurfaceError::Backend("表面缓冲锁已中毒".to_string()))
    }
}

impl DrawingSurface for SoftwareSurface {
    fn size(&self) -> PixelSize {
        self.lock_buffer().map(|buffer| buffer.size).unwrap_or_default()
    }

    fn resize(&mut self, size: PixelSize) -> Result<(), SurfaceError> {
        if self.drawing.is_some() {
            return Err(SurfaceError::InvalidArgument("绘制过程中不能调整表面尺寸".to_string()));
        }
        let pixels = allocate_pixels(size)?;
        let mut buffer = self.lock_buffer()?;
        buffer.size = size;
        buffer.pixels = pixels;
        Ok(())
    }

    fn begin_draw(&mut self, rect: UpdateRect) -> Result<DrawOffset, SurfaceError> {
        if self.drawing.is_some() {
            return Err(SurfaceError::InvalidArgument("表面已处于绘制状态".to_string()));
        }
        if !self.provider.bound_device_usable() {
            return Err(SurfaceError::DeviceLost);
        }

        let size = self.lock_buffer()?.size;
        if rect.right > size.width || rect.bottom > size.height || rect.left > rect.right || rect.top > rect.bottom {
            return Err(SurfaceError::InvalidArgument(format!(
                "更新区域超出表面 {}：{:?}",
                size, rect
            )));
        }

        self.drawing = Some(rect);
        Ok(DrawOffset {
            x: rect.left,
            y: rect.top,
        })
    }

    fn draw_bitmap(
        &mut self,
        bitmap: &Bitmap,
        offset: DrawOffset,
        mode: CompositeMode,
    ) -> Result<(), SurfaceError> {
        let Some(rect) = self.drawing else {
            return Err(SurfaceError::NotDrawing);
        };
        if !self.provider.bound_device_usable() {
            return Err(SurfaceError::DeviceLost);
        }

        let mut buffer = self.lock_buffer()?;
        let surface_stride = buffer.size.width as usize * 4;
        let swap_red_blue = buffer.format == SurfacePixelFormat::R8G8B8A8UIntNormalized;

        let src_size = bitmap.size();
        let width = src_size.width.min(rect.right.saturating_sub(offset.x));
        let height = src_size.height.min(rect.bottom.saturating_sub(offset.y));

        for y in 0..height as usize {
            let src_row = &bitmap.data()[y * bitmap.stride()..y * bitmap.stride() + width as usize * 4];
            let dst_start = (offset.y as usize + y) * surface_stride + offset.x as usize * 4;
            let dst_row = &mut buffer.pixels[dst_start..dst_start + width as usize * 4];

            for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                let mut px = [src[0], src[1], src[2], src[3]];
                if swap_red_blue {
                    px.swap(0, 2);
                }
                match mode {
                    CompositeMode::Copy => dst.copy_from_slice(&px),
                    CompositeMode::SourceOver => {
                        let inv_alpha = 255 - px[3] as u32;
                        for channel in 0..4 {
                            let blended = px[channel] as u32 + (dst[channel] as u32 * inv_alpha + 127) / 255;
                            dst[channel] = blended.min(255) as u8;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn end_draw(&mut self) -> Result<(), SurfaceError> {
        if self.drawing.take().is_none() {
            return Err(SurfaceError::NotDrawing);
        }
        if !self.provider.bound_device_usable() {
            return Err(SurfaceError::DeviceLost);
        }
        Ok(())
    }

    fn snapshot(&self) -> Option<Bitmap> {
        let buffer = self.lock_buffer().ok()?;
        let mut pixels = buffer.pixels.clone();
        if buffer.format == SurfacePixelFormat::R8G8B8A8UIntNormalized {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        Bitmap::from_bgra_premultiplied(buffer.size, pixels).ok()
    }
}
