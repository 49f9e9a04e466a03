//! # 设备丢失监听
//!
//! ## 设计思路
//!
//! 一个 watcher 同一时间只盯一台设备、只有一个订阅者（回调在构造时给定）。
//! 设备重建后调用 `watch_device` 重新挂载即可，旧的等待任务会被终止。
//!
//! ## 实现思路
//!
//! 在 tokio 运行时上起一个等待任务，`wait_for` 到移除信号为 `true` 后回调一次。
//! 发送端被丢弃（设备已析构且从未标记移除）视为正常结束，不触发回调。

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{DeviceId, RenderingDevice};

type DeviceLostHandler = Arc<dyn Fn(Arc<dyn RenderingDevice>) + Send + Sync>;

pub struct DeviceLostWatcher {
    runtime: Handle,
    handler: DeviceLostHandler,
    device: Option<Arc<dyn RenderingDevice>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceLostWatcher {
    /// 创建 watcher，`on_lost` 会在被监听设备失效时收到该设备句柄。
    pub fn new<F>(runtime: Handle, on_lost: F) -> Self
    where
        F: Fn(Arc<dyn RenderingDevice>) + Send + Sync + 'static,
    {
        Self {
            runtime,
            handler: Arc::new(on_lost),
            device: None,
            task: None,
        }
    }

    /// 开始监听新设备（会先停止对当前设备的监听）。
    ///
    /// 允许在回调内部调用：回调执行时等待任务已越过最后一个 await 点，
    /// 终止旧任务不会打断回调本身。
    pub fn watch_device(&mut self, device: Arc<dyn RenderingDevice>) {
        self.stop_watching();

        let mut removed = device.removed_signal();
        let handler = Arc::clone(&self.handler);
        let watched = Arc::clone(&device);

        self.task = Some(self.runtime.spawn(async move {
            match removed.wait_for(|is_removed| *is_removed).await {
                Ok(_) => {
                    log::warn!("💥 检测到渲染设备丢失：{}", watched.id());
                    handler(watched);
                }
                Err(_) => {
                    log::debug!("设备 {} 的移除信号已关闭，停止监听", watched.id());
                }
            }
        }));
        self.device = Some(device);
    }

    pub fn stop_watching(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.device = None;
    }

    pub fn currently_watched(&self) -> Option<DeviceId> {
        self.device.as_ref().map(|device| device.id())
    }
}

impl Drop for DeviceLostWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}
