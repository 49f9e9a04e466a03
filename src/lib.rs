//! # 合成图片加载：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  调用方（演示程序 / 宿主应用）                             │
//! │       │ create_image_from_uri / create_image_from_file    │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↓                        ↑ on_load_completed(LoadStatus)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │  ┌─ image_loader ── 获取 · 解码规划 · 解码 · 绘制 · 通知  │
//! │  │        │                  ↑ 设备丢失 → 重跑            │
//! │  ├─ surface ─────── SurfaceHost（配置锁 + 全局绘制锁）     │
//! │  │   └─ software       CPU 版 Surface Provider            │
//! │  ├─ device ──────── 设备标识 + DeviceLostWatcher          │
//! │  ├─ settings ────── JSON 设置文件 → LoaderConfig          │
//! │  └─ error ───────── AppError（应用层统一错误）             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 应用层统一错误类型 `AppError` |
//! | [`device`] | 渲染设备抽象与设备丢失监听 |
//! | [`surface`] | 绘制表面契约、`SurfaceHost`、软件实现 |
//! | [`image_loader`] | 图片加载流水线与工厂 |
//! | [`settings`] | 设置文件读取与校验 |

pub mod device;
pub mod error;
pub mod image_loader;
pub mod settings;
pub mod surface;
