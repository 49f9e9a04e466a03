//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 加载链路内的所有失败都先落到 `ImageError`，到流水线边界再统一折算为
//! `LoadStatus` 交给观察者，错误本身不会越过流水线。
//! `code()` / `stage()` 提供稳定的机器可读标识，供日志与诊断使用。

use super::status::LoadStatus;
use crate::surface::SurfaceError;

/// 图片加载统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("参数无效：{0}")]
    InvalidArgument(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("本轮加载已被新的加载取代")]
    Cancelled,

    #[error("绘制错误：{0}")]
    Surface(#[from] SurfaceError),
}

impl ImageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::FileSystem(_) => "file_system",
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Decode(_) => "decode",
            Self::Timeout(_) => "timeout",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Cancelled => "cancelled",
            Self::Surface(SurfaceError::DeviceLost) => "device_lost",
            Self::Surface(_) => "surface",
        }
    }

    /// 错误最可能发生的阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::FileSystem(_) | Self::Timeout(_) => "fetch",
            Self::InvalidFormat(_) | Self::Decode(_) | Self::ResourceLimit(_) => "decode",
            Self::InvalidArgument(_) => "request",
            Self::Cancelled => "pipeline",
            Self::Surface(_) => "draw",
        }
    }

    /// 按错误类型折算为对外的终态，绘制阶段的失败直接走这里。
    ///
    /// 获取与解码阶段的失败由流水线按阶段统一折算（获取失败一律为
    /// `FileAccessError`，规划失败一律为 `DecodeError`）。
    /// `Cancelled` 与设备丢失不产生终态，返回 `None`。
    pub fn status(&self) -> Option<LoadStatus> {
        match self {
            Self::Network(_) | Self::FileSystem(_) | Self::Timeout(_) => Some(LoadStatus::FileAccessError),
            Self::InvalidFormat(_) | Self::Decode(_) | Self::ResourceLimit(_) => Some(LoadStatus::DecodeError),
            Self::InvalidArgument(_) => Some(LoadStatus::Other),
            Self::Cancelled => None,
            Self::Surface(SurfaceError::DeviceLost) => None,
            Self::Surface(_) => Some(LoadStatus::InsufficientResources),
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Surface(SurfaceError::DeviceLost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failures_map_to_file_access_error() {
        for err in [
            ImageError::Network("502".into()),
            ImageError::FileSystem("missing".into()),
            ImageError::Timeout("slow".into()),
        ] {
            assert_eq!(err.stage(), "fetch");
            assert_eq!(err.status(), Some(LoadStatus::FileAccessError));
        }
    }

    #[test]
    fn device_loss_and_cancellation_are_not_terminal() {
        let lost = ImageError::from(SurfaceError::DeviceLost);
        assert!(lost.is_device_lost());
        assert_eq!(lost.code(), "device_lost");
        assert_eq!(lost.status(), None);
        assert_eq!(ImageError::Cancelled.status(), None);
    }

    #[test]
    fn other_surface_failures_are_insufficient_resources() {
        let err = ImageError::from(SurfaceError::OutOfMemory("vram".into()));
        assert_eq!(err.code(), "surface");
        assert_eq!(err.status(), Some(LoadStatus::InsufficientResources));
    }
}
