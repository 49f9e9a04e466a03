//! # composition-image：演示程序
//!
//! ```text
//! composition-image <SOURCE>                       按原始尺寸加载并输出 out.png
//! composition-image <SOURCE> -w 320 -H 240         限定解码尺寸
//! composition-image <SOURCE> --simulate-device-lost 加载完成后模拟一次设备丢失
//! composition-image <SOURCE> --settings cfg.json   读取 JSON 设置
//! ```
//!
//! SOURCE 可以是 `http(s)://`、`data:`、`ms-appx:///`、`ms-appdata:///` URI，
//! 也可以是本地文件路径。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;

use composition_image::error::AppError;
use composition_image::image_loader::{
    CompositionImageFactory, ImageError, ImageOptions, ImageRequest, LoadStatus, LoaderConfig,
};
use composition_image::settings;
use composition_image::surface::software::SoftwareSurfaceProvider;
use composition_image::surface::SurfaceHost;

#[derive(Parser, Debug)]
#[command(name = "composition-image", about = "Load an image onto a drawing surface and dump it as PNG")]
struct Cli {
    /// 图片 URI 或本地文件路径。
    source: String,

    /// 解码宽度（0 表示原始宽度）。
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    width: i32,

    /// 解码高度（0 表示原始高度）。
    #[arg(short = 'H', long, default_value_t = 0, allow_negative_numbers = true)]
    height: i32,

    /// 输出 PNG 路径。
    #[arg(short, long, default_value = "out.png")]
    output: PathBuf,

    /// JSON 设置文件。
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// 加载档位：quality / balanced / speed。
    #[arg(short, long)]
    profile: Option<String>,

    /// 首次加载完成后模拟一次设备丢失，并等待重新加载。
    #[arg(long)]
    simulate_device_lost: bool,

    /// 等待加载结果的超时（秒）。
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    source: String,
    status: &'static str,
    width: u32,
    height: u32,
    device: Option<String>,
    device_lost_simulated: bool,
    output: Option<PathBuf>,
}

fn looks_like_uri(source: &str) -> bool {
    source.contains("://") || source.starts_with("data:")
}

async fn wait_for_status(
    statuses: &mut mpsc::UnboundedReceiver<LoadStatus>,
    timeout: Duration,
) -> Result<LoadStatus, AppError> {
    match tokio::time::timeout(timeout, statuses.recv()).await {
        Ok(Some(status)) => Ok(status),
        Ok(None) => Err(ImageError::Cancelled.into()),
        Err(_) => Err(ImageError::Timeout(format!("{} 秒内未完成加载", timeout.as_secs())).into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = LoaderConfig::default();
    if let Some(path) = &cli.settings {
        settings::load_settings(path)?.apply_to(&mut config)?;
        log::info!("⚙️ 已加载设置文件：{}", path.display());
    }

    let provider = SoftwareSurfaceProvider::new();
    let host = SurfaceHost::new(Arc::new(provider.clone()))?;
    let factory = CompositionImageFactory::with_config(host, config)?;
    if let Some(profile) = &cli.profile {
        factory.set_load_profile(profile)?;
    }

    let options = ImageOptions::new()
        .with_decode_width(cli.width)?
        .with_decode_height(cli.height)?;
    let request = if looks_like_uri(&cli.source) {
        ImageRequest::from_uri(&cli.source, options)?
    } else {
        ImageRequest::from_file(&cli.source, options)?
    };

    let (tx, mut statuses) = mpsc::unbounded_channel();
    let image = factory.create_image_with_observer(request, move |status| {
        let _ = tx.send(status);
    })?;

    let timeout = Duration::from_secs(cli.timeout);
    let mut status = wait_for_status(&mut statuses, timeout).await?;
    log::info!("📬 加载结果：{}", status);

    if cli.simulate_device_lost && status.is_success() {
        if let Some(lost) = provider.simulate_device_loss() {
            log::info!("🧪 已移除 {}，等待重新加载", lost);
            status = wait_for_status(&mut statuses, timeout).await?;
            log::info!("📬 重新加载结果：{}", status);
        }
    }

    let mut output = None;
    if status.is_success() {
        if let Some(rgba) = image.surface_snapshot().and_then(|bitmap| bitmap.to_rgba_image()) {
            rgba.save(&cli.output)
                .map_err(|e| ImageError::FileSystem(format!("写入 {} 失败：{}", cli.output.display(), e)))?;
            output = Some(cli.output.clone());
        }
    }

    let size = image.surface_size();
    let report = Report {
        source: image.request().source().to_string(),
        status: status.as_str(),
        width: size.width,
        height: size.height,
        device: factory.host().current_device().map(|device| device.to_string()),
        device_lost_simulated: cli.simulate_device_lost,
        output,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(err) => log::warn!("⚠️ 序列化报告失败：{}", err),
    }

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
