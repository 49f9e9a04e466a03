//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `CompositionImage` 表示“一张加载到绘制表面上的图片”，负责把整条链路
//! 串起来，并在设备丢失后自动重跑：
//! 1. 获取字节（Fetching）
//! 2. 解码 → 规划 → 格式转换 → 缩放（Decoding，阻塞线程池）
//! 3. 获取全局绘制锁 → 按需调整表面尺寸 → Copy 模式绘制（Drawing，阻塞线程池）
//! 4. 通知观察者终态（每轮最多一次）
//!
//! ## 实现思路
//!
//! - 取消是协作式的：每轮加载持有一个代号（generation），每个阶段边界都与当前
//!   代号比较，过期的轮次直接放弃结果，不会打断正在进行的 I/O。
//! - 终态写入与代号检查在同一把锁内完成，回调在锁外执行。
//! - 绘制阶段遇到设备丢失时静默退出，由 host 的设备丢失通知触发新一轮。
//! - 单次加载使用同一份配置快照，记录 `load/decode/draw/total` 阶段耗时。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use tokio::runtime::Handle;

use super::config::LoaderConfig;
use super::loader::ByteSource;
use super::pipeline::ImageDecoder;
use super::planner::{self, SourcePixelFormat};
use super::source::{ImageOptions, ImageRequest, RawImageData};
use super::status::{LoadStage, LoadStatus};
use super::ImageError;
use crate::device::DeviceLostEvent;
use crate::surface::{
    AlphaMode, Bitmap, CompositeMode, DeviceLostObserverId, PixelSize, SurfaceError, SurfaceHandle,
    SurfaceHost, SurfacePixelFormat, UpdateRect,
};

type LoadCompletedCallback = Arc<dyn Fn(LoadStatus) + Send + Sync>;

/// 加载完成观察者注册标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadObserverId(u64);

struct RunState {
    generation: u64,
    stage: LoadStage,
    last_status: Option<LoadStatus>,
}

/// 流水线依赖的外部协作者。
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub(crate) host: SurfaceHost,
    pub(crate) byte_source: Arc<dyn ByteSource>,
    pub(crate) decoder: Arc<dyn ImageDecoder>,
    pub(crate) config: Arc<RwLock<LoaderConfig>>,
    pub(crate) runtime: Handle,
}

struct ImageInner {
    request: ImageRequest,
    parts: Collaborators,
    surface: Mutex<SurfaceHandle>,
    run: Mutex<RunState>,
    observers: Mutex<Vec<(LoadObserverId, LoadCompletedCallback)>>,
    next_observer_id: AtomicU64,
}

/// 解码阶段失败及其对应终态。
struct DecodeFailure {
    status: LoadStatus,
    error: ImageError,
}

impl DecodeFailure {
    fn decode(error: ImageError) -> Self {
        Self {
            status: LoadStatus::DecodeError,
            error,
        }
    }
}

/// 绘制在合成表面上的图片。
///
/// 析构时取消设备丢失订阅，进行中的加载会在下一个阶段边界被放弃。
pub struct CompositionImage {
    inner: Arc<ImageInner>,
    device_lost_subscription: DeviceLostObserverId,
}

impl CompositionImage {
    /// 创建表面、注册观察者并启动第一轮加载。
    pub(crate) fn start(
        request: ImageRequest,
        parts: Collaborators,
        observer: Option<LoadCompletedCallback>,
    ) -> Result<Self, ImageError> {
        let surface = parts.host.create_surface(
            request.options().decode_size(),
            SurfacePixelFormat::B8G8R8A8UIntNormalized,
            AlphaMode::Premultiplied,
        )?;

        let inner = Arc::new(ImageInner {
            request,
            parts,
            surface: Mutex::new(surface),
            run: Mutex::new(RunState {
                generation: 0,
                stage: LoadStage::Idle,
                last_status: None,
            }),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
        });

        if let Some(observer) = observer {
            inner.add_observer(observer);
        }

        let weak: Weak<ImageInner> = Arc::downgrade(&inner);
        let device_lost_subscription = inner.parts.host.add_device_lost_observer(move |event: DeviceLostEvent| {
            if let Some(inner) = weak.upgrade() {
                log::info!(
                    "🔁 设备丢失（{} -> {}），重新加载：{}",
                    event.lost_device,
                    event.new_device,
                    inner.request.source()
                );
                inner.start_run();
            }
        });

        inner.start_run();

        Ok(Self {
            inner,
            device_lost_subscription,
        })
    }

    /// 注册加载完成观察者。
    ///
    /// 回调在完成本轮加载的工作线程上执行，不保证线程亲和性。
    pub fn on_load_completed<F>(&self, callback: F) -> LoadObserverId
    where
        F: Fn(LoadStatus) + Send + Sync + 'static,
    {
        self.inner.add_observer(Arc::new(callback))
    }

    pub fn remove_load_completed_observer(&self, id: LoadObserverId) -> bool {
        let Ok(mut observers) = self.inner.observers.lock() else {
            return false;
        };
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// 放弃进行中的加载并重新开始。
    pub fn reload(&self) {
        self.inner.start_run();
    }

    pub fn request(&self) -> &ImageRequest {
        &self.inner.request
    }

    pub fn options(&self) -> ImageOptions {
        self.inner.request.options()
    }

    pub fn stage(&self) -> LoadStage {
        self.inner
            .run
            .lock()
            .map(|run| run.stage)
            .unwrap_or(LoadStage::Completed(LoadStatus::Other))
    }

    /// 最近一次终态。
    pub fn last_status(&self) -> Option<LoadStatus> {
        self.inner.run.lock().ok().and_then(|run| run.last_status)
    }

    pub fn surface_size(&self) -> PixelSize {
        self.inner
            .surface
            .lock()
            .map(|surface| surface.size())
            .unwrap_or_default()
    }

    /// 读回表面内容（后端不支持读回时为 `None`）。
    pub fn surface_snapshot(&self) -> Option<Bitmap> {
        self.inner.surface.lock().ok()?.snapshot()
    }
}

impl Drop for CompositionImage {
    fn drop(&mut self) {
        self.inner
            .parts
            .host
            .remove_device_lost_observer(self.device_lost_subscription);
        if let Ok(mut run) = self.inner.run.lock() {
            run.generation += 1;
        }
    }
}

impl ImageInner {
    fn add_observer(&self, callback: LoadCompletedCallback) -> LoadObserverId {
        let id = LoadObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        match self.observers.lock() {
            Ok(mut observers) => observers.push((id, callback)),
            Err(_) => log::error!("加载观察者列表锁已中毒，注册失败"),
        }
        id
    }

    /// 作废当前轮次并在后台启动新一轮。
    fn start_run(self: &Arc<Self>) {
        let generation = match self.run.lock() {
            Ok(mut run) => {
                run.generation += 1;
                run.stage = LoadStage::Idle;
                run.generation
            }
            Err(_) => {
                log::error!("加载状态锁已中毒，无法启动加载");
                return;
            }
        };

        let inner = Arc::clone(self);
        self.parts.runtime.spawn(async move {
            inner.run_pipeline(generation).await;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.run.lock().is_ok_and(|run| run.generation == generation)
    }

    /// 进入下一阶段；轮次已过期时返回 `false`。
    fn enter_stage(&self, generation: u64, stage: LoadStage) -> bool {
        let Ok(mut run) = self.run.lock() else {
            return false;
        };
        if run.generation != generation {
            log::debug!("放弃过期的加载轮次 #{}（当前 #{}）", generation, run.generation);
            return false;
        }
        run.stage = stage;
        true
    }

    /// 写入终态并通知观察者；轮次已过期时什么也不做。
    fn complete(&self, generation: u64, status: LoadStatus) {
        let observers: Vec<LoadCompletedCallback> = {
            let Ok(mut run) = self.run.lock() else {
                return;
            };
            if run.generation != generation {
                return;
            }
            run.stage = LoadStage::Completed(status);
            run.last_status = Some(status);

            match self.observers.lock() {
                Ok(observers) => observers.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                Err(_) => {
                    log::error!("加载观察者列表锁已中毒，跳过通知");
                    return;
                }
            }
        };

        for observer in observers {
            observer(status);
        }
    }

    fn config_snapshot(&self) -> Result<LoaderConfig, ImageError> {
        self.parts
            .config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    async fn run_pipeline(self: Arc<Self>, generation: u64) {
        let source = self.request.source();
        let config = match self.config_snapshot() {
            Ok(config) => config,
            Err(err) => {
                log::error!("❌ 读取加载配置失败：{}", err);
                self.complete(generation, LoadStatus::Other);
                return;
            }
        };
        let total_start = Instant::now();

        if !self.enter_stage(generation, LoadStage::Fetching) {
            return;
        }
        let load_start = Instant::now();
        let raw = match self.parts.byte_source.fetch(source, &config).await {
            Ok(raw) if !raw.bytes.is_empty() => raw,
            Ok(_) => {
                log::warn!("⚠️ 图片内容为空：{}", source);
                self.complete(generation, LoadStatus::FileAccessError);
                return;
            }
            Err(err) => {
                log::warn!("⚠️ 获取图片失败 [{}]：{}（{}）", err.code(), err, source);
                self.complete(generation, LoadStatus::FileAccessError);
                return;
            }
        };
        let load_elapsed = load_start.elapsed();

        if !self.enter_stage(generation, LoadStage::Decoding) {
            return;
        }
        let decode_start = Instant::now();
        let decoder = Arc::clone(&self.parts.decoder);
        let options = self.request.options();
        let decoded = tokio::task::spawn_blocking(move || decode_with_plan(decoder.as_ref(), &raw, options, &config)).await;
        let bitmap = match decoded {
            Ok(Ok(bitmap)) => bitmap,
            Ok(Err(failure)) => {
                log::warn!(
                    "⚠️ 图片解码失败 [{}]：{}（{}）",
                    failure.error.code(),
                    failure.error,
                    source
                );
                self.complete(generation, failure.status);
                return;
            }
            Err(join_err) => {
                log::error!("❌ 解码任务异常退出：{}", join_err);
                self.complete(generation, LoadStatus::Other);
                return;
            }
        };
        let decode_elapsed = decode_start.elapsed();

        if !self.enter_stage(generation, LoadStage::Drawing) {
            return;
        }
        let draw_start = Instant::now();
        let inner = Arc::clone(&self);
        let drawn = tokio::task::spawn_blocking(move || inner.draw(generation, &bitmap)).await;
        let draw_elapsed = draw_start.elapsed();

        match drawn {
            Ok(Ok(size)) => {
                log::info!(
                    "✅ 图片加载完成 - 来源: {} 尺寸: {} load={}ms decode={}ms draw={}ms total={}ms",
                    source.hint(),
                    size,
                    load_elapsed.as_millis(),
                    decode_elapsed.as_millis(),
                    draw_elapsed.as_millis(),
                    total_start.elapsed().as_millis()
                );
                self.complete(generation, LoadStatus::Success);
            }
            Ok(Err(err)) => match err.status() {
                Some(status) => {
                    log::warn!("⚠️ 图片绘制失败 [{}]：{}（{}）", err.code(), err, source);
                    self.complete(generation, status);
                }
                None if err.is_device_lost() => {
                    log::info!("💤 绘制时设备丢失，等待设备重建后重新加载：{}", source);
                }
                None => {
                    log::debug!("加载轮次 #{} 在绘制前被取代", generation);
                }
            },
            Err(join_err) => {
                log::error!("❌ 绘制任务异常退出：{}", join_err);
                self.complete(generation, LoadStatus::InsufficientResources);
            }
        }
    }

    /// 在全局绘制锁内把位图画到表面上。
    fn draw(&self, generation: u64, bitmap: &Bitmap) -> Result<PixelSize, ImageError> {
        let drawing = self.parts.host.acquire_drawing_lock()?;
        if !self.is_current(generation) {
            return Err(ImageError::Cancelled);
        }

        let mut surface = self
            .surface
            .lock()
            .map_err(|_| SurfaceError::Backend("表面锁已中毒".to_string()))?;

        let size = bitmap.size();
        if surface.resize_if_needed(size)? {
            log::debug!("表面尺寸已按解码结果调整为 {}", size);
        }

        {
            let mut session = surface.begin_draw(UpdateRect::from_size(size))?;
            session.draw_bitmap(bitmap, CompositeMode::Copy)?;
        }

        drop(surface);
        self.parts.host.release_drawing_lock(drawing);
        Ok(size)
    }
}

/// 解码 → 规划 → 格式转换 → 缩放。
fn decode_with_plan(
    decoder: &dyn ImageDecoder,
    raw: &RawImageData,
    options: ImageOptions,
    config: &LoaderConfig,
) -> Result<Bitmap, DecodeFailure> {
    let mut source = decoder.decode(raw, config).map_err(DecodeFailure::decode)?;

    let natural = source.size().map_err(|error| DecodeFailure {
        status: LoadStatus::Other,
        error,
    })?;

    let plan = planner::plan(
        natural.width,
        natural.height,
        options.decode_width(),
        options.decode_height(),
        source.pixel_format(),
    )
    .map_err(DecodeFailure::decode)?;

    if plan.needs_format_conversion {
        source = decoder
            .convert(source, SourcePixelFormat::Bgra8Premultiplied)
            .map_err(DecodeFailure::decode)?;
    }

    if plan.needs_scaling() {
        source = decoder
            .scale(source, plan.target_size(), plan.interpolation, config)
            .map_err(DecodeFailure::decode)?;
    }

    source.into_bitmap().map_err(DecodeFailure::decode)
}
