//! # 图片工厂（入口层）
//!
//! ## 设计思路
//!
//! 一个合成器（这里即一个 `SurfaceHost`）对应一个工厂，工厂持有：
//! - 共享的加载配置（`Arc<RwLock<LoaderConfig>>`，运行时可切档）
//! - 字节来源与解码器（可注入，测试时替换为桩实现）
//!
//! 由工厂创建的所有图片共享同一个 host，因此共享同一把绘制锁。
//!
//! ## 实现思路
//!
//! 对外只暴露少量稳定 API：
//! - `create_image_from_uri` / `create_image_from_file`：同步校验参数后启动加载
//! - `set_load_profile` / `get_load_profile`：切换与查询加载档位

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::runtime::Handle;

use super::config::{LoadProfile, LoaderConfig};
use super::handler::{Collaborators, CompositionImage};
use super::loader::{ByteSource, DefaultByteSource};
use super::pipeline::{CodecDecoder, ImageDecoder};
use super::source::{ImageOptions, ImageRequest};
use super::status::LoadStatus;
use super::ImageError;
use crate::surface::SurfaceHost;

/// 合成图片工厂。
pub struct CompositionImageFactory {
    parts: Collaborators,
}

impl CompositionImageFactory {
    /// 使用默认配置、默认字节来源与解码器创建工厂。
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn new(host: SurfaceHost) -> Result<Self, ImageError> {
        Self::with_config(host, LoaderConfig::default())
    }

    pub fn with_config(host: SurfaceHost, config: LoaderConfig) -> Result<Self, ImageError> {
        let byte_source = Arc::new(DefaultByteSource::new(config.download_cache_entries));
        Self::with_collaborators(host, config, byte_source, Arc::new(CodecDecoder::new()))
    }

    /// 注入自定义字节来源与解码器。
    pub fn with_collaborators(
        host: SurfaceHost,
        config: LoaderConfig,
        byte_source: Arc<dyn ByteSource>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self, ImageError> {
        let runtime = Handle::try_current()
            .map_err(|e| ImageError::InvalidArgument(format!("工厂必须在 tokio 运行时内创建：{}", e)))?;

        Ok(Self {
            parts: Collaborators {
                host,
                byte_source,
                decoder,
                config: Arc::new(RwLock::new(config)),
                runtime,
            },
        })
    }

    pub fn host(&self) -> &SurfaceHost {
        &self.parts.host
    }

    /// 从 URI 创建图片，`options` 为空时按原始尺寸解码。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use composition_image::image_loader::CompositionImageFactory;
    /// use composition_image::surface::{software::SoftwareSurfaceProvider, SurfaceHost};
    ///
    /// # async fn demo() -> Result<(), composition_image::error::AppError> {
    /// let host = SurfaceHost::new(Arc::new(SoftwareSurfaceProvider::new()))?;
    /// let factory = CompositionImageFactory::new(host)?;
    /// let image = factory.create_image_from_uri("ms-appx:///Assets/logo.png", None)?;
    /// image.on_load_completed(|status| println!("{}", status));
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_image_from_uri(
        &self,
        uri: &str,
        options: Option<ImageOptions>,
    ) -> Result<CompositionImage, ImageError> {
        self.create_image(ImageRequest::from_uri(uri, options.unwrap_or_default())?)
    }

    pub fn create_image_from_file(
        &self,
        path: impl AsRef<Path>,
        options: Option<ImageOptions>,
    ) -> Result<CompositionImage, ImageError> {
        self.create_image(ImageRequest::from_file(path, options.unwrap_or_default())?)
    }

    pub fn create_image(&self, request: ImageRequest) -> Result<CompositionImage, ImageError> {
        log::debug!("🖼️ 创建图片：{}", request.source());
        CompositionImage::start(request, self.parts.clone(), None)
    }

    /// 创建图片并在第一轮加载启动前注册观察者，不会错过首个终态。
    pub fn create_image_with_observer<F>(
        &self,
        request: ImageRequest,
        observer: F,
    ) -> Result<CompositionImage, ImageError>
    where
        F: Fn(LoadStatus) + Send + Sync + 'static,
    {
        log::debug!("🖼️ 创建图片：{}", request.source());
        CompositionImage::start(request, self.parts.clone(), Some(Arc::new(observer)))
    }

    /// 按名称切换加载档位，影响之后开始的加载轮次。
    pub fn set_load_profile(&self, profile: &str) -> Result<LoadProfile, ImageError> {
        let profile = LoadProfile::from_str(profile)?;
        let mut config = self
            .parts
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.apply_load_profile(profile);

        log::info!(
            "⚙️ 已切换加载档位：{}（linear={:?}, quality={:?}）",
            profile.as_str(),
            config.linear_filter,
            config.quality_filter
        );

        Ok(profile)
    }

    pub fn get_load_profile(&self) -> Result<LoadProfile, ImageError> {
        let config = self
            .parts
            .config
            .read()
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_load_profile())
    }

    pub fn config_snapshot(&self) -> Result<LoaderConfig, ImageError> {
        self.parts
            .config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::software::SoftwareSurfaceProvider;
    use crate::surface::PixelSize;

    fn factory() -> CompositionImageFactory {
        let host = SurfaceHost::new(Arc::new(SoftwareSurfaceProvider::new())).expect("host");
        CompositionImageFactory::new(host).expect("factory")
    }

    #[tokio::test]
    async fn profile_round_trips_through_factory() {
        let factory = factory();
        assert_eq!(factory.get_load_profile().expect("profile"), LoadProfile::Balanced);

        factory.set_load_profile("speed").expect("set profile");
        assert_eq!(factory.get_load_profile().expect("profile"), LoadProfile::Speed);

        assert!(matches!(
            factory.set_load_profile("max"),
            Err(ImageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn invalid_requests_fail_synchronously() {
        let factory = factory();
        assert!(matches!(
            factory.create_image_from_uri("   ", None),
            Err(ImageError::InvalidArgument(_))
        ));
        assert!(matches!(
            factory.create_image_from_uri("not a uri", None),
            Err(ImageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn surface_starts_at_requested_decode_size() {
        let factory = factory();
        let options = ImageOptions::new()
            .with_decode_width(64)
            .and_then(|o| o.with_decode_height(48))
            .expect("options");

        let image = factory
            .create_image_from_file("/definitely/missing/image.png", Some(options))
            .expect("image");
        assert_eq!(image.surface_size(), PixelSize::new(64, 48));
        assert_eq!(factory.host().device_lost_observer_count(), 1);

        drop(image);
        assert_eq!(factory.host().device_lost_observer_count(), 0);
    }

    #[test]
    fn factory_requires_runtime() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let host = runtime
            .block_on(async { SurfaceHost::new(Arc::new(SoftwareSurfaceProvider::new())) })
            .expect("host");
        assert!(CompositionImageFactory::new(host).is_err());
    }
}
