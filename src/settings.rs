//! # 设置文件
//!
//! JSON 设置文件中的字段全部可选，缺省项沿用 `LoaderConfig::default()`。
//! 应用前做范围校验，非法值整体拒绝而不是部分生效。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::image_loader::{LoadProfile, LoaderConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderSettings {
    pub profile: Option<String>,
    pub max_file_size_mb: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub stream_first_byte_timeout_ms: Option<u64>,
    pub stream_chunk_timeout_ms: Option<u64>,
    pub max_redirects: Option<usize>,
    pub download_cache_entries: Option<usize>,
    pub max_decoded_pixels: Option<u64>,
    pub max_decoded_bytes: Option<u64>,
    pub package_root: Option<PathBuf>,
    pub app_data_root: Option<PathBuf>,
}

/// 读取设置文件；文件不存在时返回默认设置。
pub fn load_settings(path: &Path) -> Result<LoaderSettings, AppError> {
    if !path.exists() {
        log::debug!("设置文件不存在，使用默认设置：{}", path.display());
        return Ok(LoaderSettings::default());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str::<LoaderSettings>(&content)
        .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))
}

impl LoaderSettings {
    /// 校验并把设置叠加到配置上。
    pub fn apply_to(&self, config: &mut LoaderConfig) -> Result<(), AppError> {
        let mut next = config.clone();

        if let Some(profile) = &self.profile {
            let profile = LoadProfile::from_str(profile)?;
            next.apply_load_profile(profile);
        }
        if let Some(mb) = self.max_file_size_mb {
            ensure_range("maxFileSizeMb", mb, 1, 1024)?;
            next.max_file_size = mb * 1024 * 1024;
        }
        if let Some(secs) = self.download_timeout_secs {
            ensure_range("downloadTimeoutSecs", secs, 1, 600)?;
            next.download_timeout = secs;
        }
        if let Some(secs) = self.connect_timeout_secs {
            ensure_range("connectTimeoutSecs", secs, 1, 120)?;
            next.connect_timeout = secs;
        }
        if let Some(ms) = self.stream_first_byte_timeout_ms {
            ensure_range("streamFirstByteTimeoutMs", ms, 500, 120_000)?;
            next.stream_first_byte_timeout_ms = ms;
        }
        if let Some(ms) = self.stream_chunk_timeout_ms {
            ensure_range("streamChunkTimeoutMs", ms, 500, 120_000)?;
            next.stream_chunk_timeout_ms = ms;
        }
        if let Some(redirects) = self.max_redirects {
            ensure_range("maxRedirects", redirects as u64, 0, 20)?;
            next.max_redirects = redirects;
        }
        if let Some(entries) = self.download_cache_entries {
            ensure_range("downloadCacheEntries", entries as u64, 0, 1024)?;
            next.download_cache_entries = entries;
        }
        if let Some(pixels) = self.max_decoded_pixels {
            ensure_range("maxDecodedPixels", pixels, 1, 400_000_000)?;
            next.max_decoded_pixels = pixels;
        }
        if let Some(bytes) = self.max_decoded_bytes {
            ensure_range("maxDecodedBytes", bytes, 8 * 1024 * 1024, 4 * 1024 * 1024 * 1024)?;
            next.max_decoded_bytes = bytes;
        }
        if let Some(root) = &self.package_root {
            next.package_root = Some(root.clone());
        }
        if let Some(root) = &self.app_data_root {
            next.app_data_root = Some(root.clone());
        }

        *config = next;
        Ok(())
    }
}

fn ensure_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), AppError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Settings(format!("{} 必须在 {}~{} 之间，当前为 {}", name, min, max, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_fields_are_applied() {
        let settings: LoaderSettings = serde_json::from_str(
            r#"{ "profile": "speed", "maxFileSizeMb": 4, "packageRoot": "/opt/app" }"#,
        )
        .expect("valid settings");

        let mut config = LoaderConfig::default();
        settings.apply_to(&mut config).expect("apply");

        assert_eq!(config.max_file_size, 4 * 1024 * 1024);
        assert_eq!(config.infer_load_profile(), LoadProfile::Speed);
        assert_eq!(config.package_root, Some(PathBuf::from("/opt/app")));
    }

    #[test]
    fn out_of_range_value_leaves_config_untouched() {
        let settings = LoaderSettings {
            max_file_size_mb: Some(8),
            connect_timeout_secs: Some(0),
            ..LoaderSettings::default()
        };

        let mut config = LoaderConfig::default();
        let before = config.max_file_size;
        assert!(matches!(settings.apply_to(&mut config), Err(AppError::Settings(_))));
        assert_eq!(config.max_file_size, before);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/definitely/missing/settings.json")).expect("defaults");
        assert_eq!(settings, LoaderSettings::default());
    }
}
