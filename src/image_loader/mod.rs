//! # 图片加载模块（image_loader）
//!
//! ## 设计思路
//!
//! 该模块将“请求校验 → 字节获取 → 解码规划 → 解码变换 → 绘制 → 通知”
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `factory`：入口，持有共享配置与可注入的协作者
//! - `handler`：`CompositionImage`，编排单张图片的加载轮次与设备丢失重跑
//! - `loader`：字节来源（网络 / data URI / 应用内 URI / 文件）
//! - `planner`：纯函数，计算输出尺寸、插值档位、是否需要格式转换
//! - `pipeline`：解码器契约与基于 `image` + `fast_image_resize` 的默认实现
//! - `config/error/source/status`：配置、错误、请求模型与终态
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! CompositionImageFactory::create_image_*（同步参数校验）
//!    ↓
//! handler.rs（后台轮次 + 代号取消 + 阶段耗时日志）
//!    ├─ loader.rs（Fetching）
//!    ├─ pipeline.rs + planner.rs（Decoding，阻塞线程池）
//!    └─ surface::SurfaceHost（Drawing，全局绘制锁）
//!    ↓
//! on_load_completed(LoadStatus)
//!
//! 设备丢失：SurfaceHost 重建设备 → 广播 → handler 作废当前轮次并重跑
//! ```

mod config;
mod error;
mod factory;
mod handler;
mod loader;
mod pipeline;
mod planner;
mod source;
mod status;

pub use config::{LoadProfile, LoaderConfig};
pub use error::ImageError;
pub use factory::CompositionImageFactory;
pub use handler::{CompositionImage, LoadObserverId};
pub use loader::{ByteSource, DefaultByteSource};
pub use pipeline::{CodecDecoder, ImageDecoder, PixelSource};
pub use planner::{plan, DecodePlan, InterpolationTier, SourcePixelFormat};
pub use source::{ImageOptions, ImageRequest, ImageSource, RawImageData};
pub use status::{LoadStage, LoadStatus};
