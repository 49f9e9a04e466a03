//! # Surface Host
//!
//! ## 设计思路
//!
//! 一个 host 对应合成器上的一台绘制设备，所有由它创建的表面共享：
//! - **配置锁**（`state`）：保护设备创建/重建与表面创建
//! - **绘制锁**（`drawing_lock`）：底层绘制上下文是单一共享资源，
//!   同一时刻只允许一个表面处于 begin/end 之间
//!
//! 锁顺序：先配置锁、后绘制锁；持有绘制锁时绝不获取配置锁，
//! 否则设备丢失恢复期间可能与绘制线程互相等待。
//!
//! ## 实现思路
//!
//! 1. 构造时在配置锁内创建设备、绑定到 provider、交给 watcher 监听
//! 2. watcher 回调：在配置锁内重建设备并重新绑定、重新挂载 watcher
//! 3. 释放配置锁后，把 `DeviceLostEvent` 广播给全部观察者

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;

use super::{
    AlphaMode, DrawSession, DrawingSurface, PixelSize, SurfaceError, SurfacePixelFormat,
    SurfaceProvider, UpdateRect,
};
use crate::device::{DeviceError, DeviceId, DeviceLostEvent, DeviceLostWatcher, RenderingDevice};

type DeviceLostCallback = Arc<dyn Fn(DeviceLostEvent) + Send + Sync>;

/// 设备丢失观察者注册标识，用于显式取消订阅。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLostObserverId(u64);

/// 绘制锁守卫，析构即释放。
pub struct DrawingLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

struct HostState {
    device: Option<Arc<dyn RenderingDevice>>,
    watcher: DeviceLostWatcher,
}

struct HostInner {
    provider: Arc<dyn SurfaceProvider>,
    state: Mutex<HostState>,
    drawing_lock: Mutex<()>,
    observers: Mutex<Vec<(DeviceLostObserverId, DeviceLostCallback)>>,
    next_observer_id: AtomicU64,
}

/// 绘制设备宿主。克隆得到的是同一个 host 的共享句柄。
#[derive(Clone)]
pub struct SurfaceHost {
    inner: Arc<HostInner>,
}

impl SurfaceHost {
    /// 在当前 tokio 运行时上创建 host。
    pub fn new(provider: Arc<dyn SurfaceProvider>) -> Result<Self, DeviceError> {
        let runtime = Handle::try_current().map_err(|e| DeviceError::Runtime(e.to_string()))?;
        Self::with_runtime(provider, runtime)
    }

    pub fn with_runtime(provider: Arc<dyn SurfaceProvider>, runtime: Handle) -> Result<Self, DeviceError> {
        let inner = Arc::new_cyclic(|weak: &Weak<HostInner>| {
            let weak = weak.clone();
            let watcher = DeviceLostWatcher::new(runtime, move |lost| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_device_lost(lost);
                }
            });

            HostInner {
                provider,
                state: Mutex::new(HostState {
                    device: None,
                    watcher,
                }),
                drawing_lock: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(1),
            }
        });

        {
            let mut state = inner.state.lock().map_err(|_| DeviceError::LockPoisoned)?;
            let device = inner.initialize_device(&mut state)?;
            log::info!("🖥️ 绘制设备已就绪：{}", device);
        }

        Ok(Self { inner })
    }

    /// 当前绑定的设备标识。
    pub fn current_device(&self) -> Option<DeviceId> {
        let state = self.inner.state.lock().ok()?;
        state.device.as_ref().map(|device| device.id())
    }

    /// 创建绘制表面。
    ///
    /// 在配置锁内执行，避免与设备重建交错。
    pub fn create_surface(
        &self,
        size: PixelSize,
        format: SurfacePixelFormat,
        alpha_mode: AlphaMode,
    ) -> Result<SurfaceHandle, SurfaceError> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| SurfaceError::Backend("设备状态锁已中毒".to_string()))?;

        if state.device.is_none() {
            return Err(SurfaceError::DeviceLost);
        }

        let surface = self.inner.provider.create_drawing_surface(size, format, alpha_mode)?;
        log::debug!("创建绘制表面 {} ({:?}, {:?})", size, format, alpha_mode);

        Ok(SurfaceHandle { surface, size })
    }

    /// 获取全局绘制锁。
    pub fn acquire_drawing_lock(&self) -> Result<DrawingLockGuard<'_>, SurfaceError> {
        let guard = self
            .inner
            .drawing_lock
            .lock()
            .map_err(|_| SurfaceError::Backend("绘制锁已中毒".to_string()))?;
        Ok(DrawingLockGuard { _guard: guard })
    }

    /// 释放绘制锁（等价于丢弃守卫）。
    pub fn release_drawing_lock(&self, guard: DrawingLockGuard<'_>) {
        drop(guard);
    }

    /// 注册设备丢失观察者。
    ///
    /// 回调在设备已重建并绑定后触发，运行在 watcher 所在的工作线程上，
    /// 不保证线程亲和性。
    pub fn add_device_lost_observer<F>(&self, callback: F) -> DeviceLostObserverId
    where
        F: Fn(DeviceLostEvent) + Send + Sync + 'static,
    {
        let id = DeviceLostObserverId(self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed));
        match self.inner.observers.lock() {
            Ok(mut observers) => observers.push((id, Arc::new(callback))),
            Err(_) => log::error!("设备丢失观察者列表锁已中毒，注册失败"),
        }
        id
    }

    pub fn remove_device_lost_observer(&self, id: DeviceLostObserverId) -> bool {
        let Ok(mut observers) = self.inner.observers.lock() else {
            return false;
        };
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub fn device_lost_observer_count(&self) -> usize {
        self.inner.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// 主动重建设备并广播（用于自动恢复失败后的手动重试）。
    pub fn reinitialize_device(&self) -> Result<DeviceLostEvent, DeviceError> {
        let event = {
            let mut state = self.inner.state.lock().map_err(|_| DeviceError::LockPoisoned)?;
            let lost_device = state
                .device
                .as_ref()
                .map(|device| device.id())
                .unwrap_or(DeviceId::new(0));
            let new_device = self.inner.initialize_device(&mut state)?;
            DeviceLostEvent {
                lost_device,
                new_device,
            }
        };

        self.inner.raise_device_lost(event);
        Ok(event)
    }
}

impl HostInner {
    /// 创建并绑定新设备，需持有配置锁调用。
    fn initialize_device(&self, state: &mut HostState) -> Result<DeviceId, DeviceError> {
        state.watcher.stop_watching();
        state.device = None;

        let device = self.provider.create_device()?;
        self.provider.set_rendering_device(Arc::clone(&device))?;

        let id = device.id();
        state.watcher.watch_device(Arc::clone(&device));
        state.device = Some(device);
        Ok(id)
    }

    fn handle_device_lost(&self, lost: Arc<dyn RenderingDevice>) {
        let event = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => {
                    log::error!("设备状态锁已中毒，无法恢复设备丢失");
                    return;
                }
            };

            let is_current = state
                .device
                .as_ref()
                .is_some_and(|device| device.id() == lost.id());
            if !is_current {
                log::debug!("忽略过期设备的丢失通知：{}", lost.id());
                return;
            }

            match self.initialize_device(&mut state) {
                Ok(new_device) => {
                    log::info!("🔁 设备已重建：{} -> {}", lost.id(), new_device);
                    DeviceLostEvent {
                        lost_device: lost.id(),
                        new_device,
                    }
                }
                Err(err) => {
                    log::error!("❌ 设备重建失败：{}（可调用 reinitialize_device 重试）", err);
                    return;
                }
            }
        };

        self.raise_device_lost(event);
    }

    fn raise_device_lost(&self, event: DeviceLostEvent) {
        let observers: Vec<DeviceLostCallback> = match self.observers.lock() {
            Ok(observers) => observers.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => {
                log::error!("设备丢失观察者列表锁已中毒，跳过广播");
                return;
            }
        };

        log::info!("📣 广播设备丢失事件给 {} 个观察者", observers.len());
        for observer in observers {
            observer(event);
        }
    }
}

/// 某个图片独占的绘制表面及其当前尺寸。
pub struct SurfaceHandle {
    surface: Box<dyn DrawingSurface>,
    size: PixelSize,
}

impl SurfaceHandle {
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// 尺寸不一致时原地缩放表面，返回是否发生了缩放。
    ///
    /// 宽、高分别与目标比较。
    pub fn resize_if_needed(&mut self, size: PixelSize) -> Result<bool, SurfaceError> {
        if self.size.width == size.width && self.size.height == size.height {
            return Ok(false);
        }

        self.surface.resize(size)?;
        log::debug!("表面尺寸调整：{} -> {}", self.size, size);
        self.size = size;
        Ok(true)
    }

    /// 打开一次作用域绘制。
    pub fn begin_draw(&mut self, rect: UpdateRect) -> Result<DrawSession<'_>, SurfaceError> {
        DrawSession::begin(self.surface.as_mut(), rect)
    }

    pub fn snapshot(&self) -> Option<super::Bitmap> {
        self.surface.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::software::SoftwareSurfaceProvider;
    use std::sync::mpsc;
    use std::time::Duration;

    fn host_with_provider() -> (SurfaceHost, SoftwareSurfaceProvider) {
        let provider = SoftwareSurfaceProvider::new();
        let host = SurfaceHost::new(Arc::new(provider.clone())).expect("host init failed");
        (host, provider)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn device_lost_is_raised_after_reinitialization() {
        let (host, provider) = host_with_provider();
        let first = host.current_device().expect("device should exist");

        let (tx, rx) = mpsc::channel();
        let observer_host = host.clone();
        host.add_device_lost_observer(move |event| {
            // 回调触发时 host 必须已经绑定新设备
            let current = observer_host.current_device();
            let _ = tx.send((event, current));
        });

        provider.simulate_device_loss();

        let (event, current) = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)))
            .await
            .expect("join failed")
            .expect("device lost event expected");

        assert_eq!(event.lost_device, first);
        assert_ne!(event.new_device, first);
        assert_eq!(current, Some(event.new_device));
        assert_eq!(provider.bound_device(), Some(event.new_device));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removed_observer_is_not_notified() {
        let (host, provider) = host_with_provider();
        let (tx, rx) = mpsc::channel::<DeviceLostEvent>();

        let id = host.add_device_lost_observer(move |event| {
            let _ = tx.send(event);
        });
        assert_eq!(host.device_lost_observer_count(), 1);
        assert!(host.remove_device_lost_observer(id));
        assert!(!host.remove_device_lost_observer(id));

        provider.simulate_device_loss();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(host.device_lost_observer_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drawing_lock_is_exclusive_across_threads() {
        let (host, _provider) = host_with_provider();
        let guard = host.acquire_drawing_lock().expect("lock should be available");

        let contender = host.clone();
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || {
            let _guard = contender.acquire_drawing_lock().expect("lock after release");
            let _ = tx.send(());
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        host.release_drawing_lock(guard);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        worker.join().expect("worker should not panic");
    }

    #[tokio::test]
    async fn surface_handle_resizes_on_either_dimension() {
        let (host, _provider) = host_with_provider();
        let mut handle = host
            .create_surface(
                PixelSize::new(100, 50),
                SurfacePixelFormat::B8G8R8A8UIntNormalized,
                AlphaMode::Premultiplied,
            )
            .expect("surface creation failed");

        assert!(!handle.resize_if_needed(PixelSize::new(100, 50)).expect("resize"));
        assert!(handle.resize_if_needed(PixelSize::new(100, 80)).expect("resize"));
        assert_eq!(handle.size(), PixelSize::new(100, 80));
        assert!(handle.resize_if_needed(PixelSize::new(60, 80)).expect("resize"));
        assert_eq!(handle.snapshot().map(|b| b.size()), Some(PixelSize::new(60, 80)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_reinitialize_broadcasts_event() {
        let (host, provider) = host_with_provider();
        let before = host.current_device().expect("device");
        let (tx, rx) = mpsc::channel();
        host.add_device_lost_observer(move |event| {
            let _ = tx.send(event);
        });

        let event = host.reinitialize_device().expect("reinitialize");
        assert_eq!(event.lost_device, before);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).ok(), Some(event));
        assert_eq!(provider.bound_device(), Some(event.new_device));
    }
}
