//! # 配置模块
//!
//! ## 设计思路
//!
//! 将加载链路中的“可调策略”集中到 `LoaderConfig`：字节来源的体积与超时限制、
//! 解码阶段的像素/内存上限、两档插值对应的具体滤镜、应用内 URI 的根目录。
//! 加载档位（quality / balanced / speed）作为高层语义，只映射到滤镜组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供可直接使用的平衡配置。
//! - `LoadProfile` 负责档位字符串解析与反向输出。
//! - `apply_load_profile` / `infer_load_profile` 负责档位与参数之间的双向映射。
//! - `filter_for` 把规划器给出的插值档位翻译成滤镜。

use std::path::PathBuf;

use image::imageops::FilterType;

use super::planner::InterpolationTier;
use super::ImageError;

/// 图片加载配置。
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// 下载/读取原始字节时允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 网络下载结果的内存缓存条目数，0 表示不缓存。
    pub download_cache_entries: usize,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 32 位像素估算，字节）。
    pub max_decoded_bytes: u64,
    /// 缩放比例不低于 0.5 时使用的快速滤镜。
    pub linear_filter: FilterType,
    /// 大幅缩小时使用的高质量滤镜。
    pub quality_filter: FilterType,
    /// `ms-appx:///` 对应的安装包根目录。
    pub package_root: Option<PathBuf>,
    /// `ms-appdata:///` 对应的应用数据根目录。
    pub app_data_root: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            download_cache_entries: 16,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            linear_filter: FilterType::Triangle,
            quality_filter: FilterType::Lanczos3,
            package_root: None,
            app_data_root: None,
        }
    }
}

/// 加载档位。
///
/// - `Quality`：两档都用高质量滤镜
/// - `Balanced`：缩放温和时用双线性，大幅缩小时用 Lanczos3
/// - `Speed`：尽量快，大幅缩小时也只用双线性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProfile {
    Quality,
    Balanced,
    Speed,
}

impl LoadProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use composition_image::image_loader::LoadProfile;
    ///
    /// let p = LoadProfile::from_str("Balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), composition_image::image_loader::ImageError>(())
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::InvalidArgument(format!(
                "未知加载档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl LoaderConfig {
    /// 基于当前滤镜组合反推档位。
    pub fn infer_load_profile(&self) -> LoadProfile {
        match (self.linear_filter, self.quality_filter) {
            (FilterType::Lanczos3, FilterType::Lanczos3) | (FilterType::CatmullRom, FilterType::Lanczos3) => {
                LoadProfile::Quality
            }
            (_, FilterType::Triangle) | (_, FilterType::Nearest) => LoadProfile::Speed,
            _ => LoadProfile::Balanced,
        }
    }

    pub fn apply_load_profile(&mut self, profile: LoadProfile) {
        match profile {
            LoadProfile::Quality => {
                self.linear_filter = FilterType::CatmullRom;
                self.quality_filter = FilterType::Lanczos3;
            }
            LoadProfile::Balanced => {
                self.linear_filter = FilterType::Triangle;
                self.quality_filter = FilterType::Lanczos3;
            }
            LoadProfile::Speed => {
                self.linear_filter = FilterType::Triangle;
                self.quality_filter = FilterType::Triangle;
            }
        }
    }

    /// 插值档位对应的具体滤镜。
    pub fn filter_for(&self, tier: InterpolationTier) -> FilterType {
        match tier {
            InterpolationTier::Linear => self.linear_filter,
            InterpolationTier::HighQuality => self.quality_filter,
        }
    }
}
