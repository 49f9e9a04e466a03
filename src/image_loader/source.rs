//! # 请求与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入”和“流水线中间结果”解耦：
//! - `ImageSource` / `ImageRequest` 表示加载请求（创建后不可变）
//! - `ImageOptions` 表示解码目标尺寸（0 表示使用原始尺寸）
//! - `RawImageData` 表示已获取但未解码的字节
//!
//! 请求构造时同步完成参数校验，和异步加载阶段的失败区分开。

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::Url;

use super::ImageError;
use crate::surface::PixelSize;

/// 图片来源：URI 或文件句柄，二选一。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Uri(Url),
    File(PathBuf),
}

impl ImageSource {
    /// 来源提示（用于日志）。
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Uri(url) => match url.scheme() {
                "http" | "https" => "network",
                "data" => "data-uri",
                "ms-appx" => "package",
                "ms-appdata" => "app-data",
                _ => "uri",
            },
            Self::File(_) => "file",
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(url) if url.scheme() == "data" => f.write_str("data:<inline>"),
            Self::Uri(url) => write!(f, "{}", url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// 解码选项。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageOptions {
    decode_width: u32,
    decode_height: u32,
}

impl ImageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置目标解码宽度，0 表示按原始宽度。负数视为参数错误。
    pub fn with_decode_width(mut self, width: i32) -> Result<Self, ImageError> {
        self.decode_width = non_negative("decode_width", width)?;
        Ok(self)
    }

    pub fn with_decode_height(mut self, height: i32) -> Result<Self, ImageError> {
        self.decode_height = non_negative("decode_height", height)?;
        Ok(self)
    }

    pub fn decode_width(&self) -> u32 {
        self.decode_width
    }

    pub fn decode_height(&self) -> u32 {
        self.decode_height
    }

    pub fn decode_size(&self) -> PixelSize {
        PixelSize::new(self.decode_width, self.decode_height)
    }
}

fn non_negative(name: &str, value: i32) -> Result<u32, ImageError> {
    u32::try_from(value).map_err(|_| ImageError::InvalidArgument(format!("{} 不能为负数：{}", name, value)))
}

/// 不可变的加载请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    source: ImageSource,
    options: ImageOptions,
}

impl ImageRequest {
    /// 按“URI 与文件恰好给出一个”的约束构造请求。
    pub fn new(uri: Option<&str>, file: Option<&Path>, options: ImageOptions) -> Result<Self, ImageError> {
        let source = match (uri, file) {
            (Some(uri), None) => ImageSource::Uri(parse_uri(uri)?),
            (None, Some(path)) => ImageSource::File(path.to_path_buf()),
            (Some(_), Some(_)) => {
                return Err(ImageError::InvalidArgument("URI 与文件只能指定其一".to_string()));
            }
            (None, None) => {
                return Err(ImageError::InvalidArgument("必须指定 URI 或文件".to_string()));
            }
        };
        Ok(Self { source, options })
    }

    pub fn from_uri(uri: &str, options: ImageOptions) -> Result<Self, ImageError> {
        Self::new(Some(uri), None, options)
    }

    pub fn from_file(path: impl AsRef<Path>, options: ImageOptions) -> Result<Self, ImageError> {
        Self::new(None, Some(path.as_ref()), options)
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn options(&self) -> ImageOptions {
        self.options
    }
}

fn parse_uri(uri: &str) -> Result<Url, ImageError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(ImageError::InvalidArgument("URI 不能为空".to_string()));
    }
    Url::parse(trimmed).map_err(|e| ImageError::InvalidArgument(format!("URI 格式无效：{}", e)))
}

/// 获取阶段输出：原始字节与来源标识。
#[derive(Debug, Clone)]
pub struct RawImageData {
    pub bytes: Bytes,
    pub source_hint: &'static str,
}
