//! # 渲染设备模块（device）
//!
//! ## 设计思路
//!
//! 合成器背后的硬件设备随时可能失效（驱动更新、显卡重置、远程桌面切换）。
//! 这里只抽象出流水线真正关心的两件事：
//! - 设备身份（`DeviceId`），用于区分“旧设备”和“重建后的新设备”
//! - 设备移除信号（`watch::Receiver<bool>`），由 `DeviceLostWatcher` 异步等待
//!
//! ## 实现思路
//!
//! - `RenderingDevice` 由具体的 Surface Provider 实现（见 `surface::software`）。
//! - 设备失效后不会“恢复”，只能由 `SurfaceHost` 创建新设备替换。

mod watcher;

use std::fmt;

use tokio::sync::watch;

pub use watcher::DeviceLostWatcher;

/// 渲染设备标识。
///
/// 每次创建设备都会分配新的标识，设备重建前后可据此区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// 硬件渲染设备句柄。
///
/// 实现方需保证：设备被移除时，`removed_signal` 返回的接收端观察到 `true`，
/// 且该状态不会再回到 `false`。
pub trait RenderingDevice: Send + Sync {
    fn id(&self) -> DeviceId;

    /// 订阅设备移除信号。
    fn removed_signal(&self) -> watch::Receiver<bool>;

    fn is_removed(&self) -> bool {
        *self.removed_signal().borrow()
    }
}

/// 设备丢失并已完成重建后广播给观察者的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLostEvent {
    /// 已失效的旧设备。
    pub lost_device: DeviceId,
    /// 重建后绑定到合成器的新设备。
    pub new_device: DeviceId,
}

/// 设备创建与绑定阶段的错误。
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("设备创建失败：{0}")]
    Creation(String),

    #[error("设备绑定失败：{0}")]
    Binding(String),

    #[error("缺少异步运行时：{0}")]
    Runtime(String),

    #[error("设备状态锁已中毒")]
    LockPoisoned,
}
