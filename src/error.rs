//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 各层保留自己的错误枚举（`ImageError` / `SurfaceError` / `DeviceError`），
//! 在应用层（演示程序、设置加载）汇总为 `AppError`，通过 `#[from]` 自动转换。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 实现 `Serialize` 将错误序列化为字符串，便于输出 JSON 报告。

use serde::Serialize;

use crate::device::DeviceError;
use crate::image_loader::ImageError;
use crate::surface::SurfaceError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片加载链路错误（请求校验 / 获取 / 解码）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 绘制表面错误
    #[error("{0}")]
    Surface(#[from] SurfaceError),

    /// 渲染设备创建或绑定失败
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 设置文件无效
    #[error("设置错误: {0}")]
    Settings(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
