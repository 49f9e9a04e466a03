//! # 字节来源模块
//!
//! ## 设计思路
//!
//! 流水线只依赖 `ByteSource::fetch`：给定 URI 或文件，异步返回原始字节。
//! 默认实现 `DefaultByteSource` 按来源分派，并在“尽可能早”的阶段执行输入校验：
//!
//! - `http/https`：手动跟随重定向 + 内容类型 + 体积校验 + 流式下载 + 签名探测
//! - `data:`：Base64 解析，解码前按长度估算体积
//! - `ms-appx:///`、`ms-appdata:///`：映射到配置的安装包/应用数据根目录
//! - `file:` URI 直接拒绝（本地文件必须以文件句柄形式传入）
//! - 文件句柄：metadata 体积限制 + 异步读取
//!
//! ## 实现思路
//!
//! 网络下载结果放入 LRU 缓存（条目数由配置决定），同一 URL 重复加载
//! （例如设备丢失后的重跑）不再走网络。

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use lru::LruCache;
use reqwest::Url;

use super::config::LoaderConfig;
use super::source::{ImageSource, RawImageData};
use super::ImageError;

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const NETWORK_RETRY_MAX_ATTEMPTS: u8 = 3;
const NETWORK_RETRY_BASE_DELAY_MS: u64 = 180;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;

/// 外部字节来源契约。
pub trait ByteSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        source: &'a ImageSource,
        config: &'a LoaderConfig,
    ) -> BoxFuture<'a, Result<RawImageData, ImageError>>;
}

/// 默认字节来源。
pub struct DefaultByteSource {
    download_cache: Option<Mutex<LruCache<String, Bytes>>>,
}

impl Default for DefaultByteSource {
    fn default() -> Self {
        Self::new(LoaderConfig::default().download_cache_entries)
    }
}

impl DefaultByteSource {
    /// `cache_entries` 为 0 时不缓存网络下载结果。
    pub fn new(cache_entries: usize) -> Self {
        Self {
            download_cache: NonZeroUsize::new(cache_entries).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    async fn load(&self, source: &ImageSource, config: &LoaderConfig) -> Result<RawImageData, ImageError> {
        match source {
            ImageSource::File(path) => {
                let bytes = Self::load_from_file(path, config).await?;
                Ok(RawImageData {
                    bytes,
                    source_hint: source.hint(),
                })
            }
            ImageSource::Uri(url) => {
                let bytes = match url.scheme() {
                    "http" | "https" => self.load_from_url(url, config).await?,
                    "data" => Self::load_from_data_uri(url.as_str(), config)?,
                    "ms-appx" => {
                        let path = resolve_app_uri(url, config.package_root.as_deref())?;
                        Self::load_from_file(&path, config).await?
                    }
                    "ms-appdata" => {
                        let path = resolve_app_uri(url, config.app_data_root.as_deref())?;
                        Self::load_from_file(&path, config).await?
                    }
                    "file" => {
                        return Err(ImageError::FileSystem(
                            "不支持 file: URI，请以文件形式传入本地图片".to_string(),
                        ));
                    }
                    other => {
                        return Err(ImageError::InvalidArgument(format!("不支持的 URI 协议：{}", other)));
                    }
                };
                Ok(RawImageData {
                    bytes,
                    source_hint: source.hint(),
                })
            }
        }
    }

    async fn load_from_file(path: &Path, config: &LoaderConfig) -> Result<Bytes, ImageError> {
        log::debug!("📁 读取本地图片 - 路径: {}", path.display());

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息 {}：{}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(ImageError::FileSystem(format!("不是普通文件：{}", path.display())));
        }

        if metadata.len() > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
        Ok(Bytes::from(bytes))
    }

    fn load_from_data_uri(data: &str, config: &LoaderConfig) -> Result<Bytes, ImageError> {
        let normalized = data.trim();
        let base64_start = normalized
            .find(";base64,")
            .ok_or_else(|| ImageError::InvalidFormat("data URI 缺少 base64 标记".to_string()))?;
        let base64_data = &normalized[base64_start + 8..];

        let estimated_len = estimate_base64_decoded_upper_bound_len(base64_data)?;
        if estimated_len > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
                estimated_len as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        general_purpose::STANDARD
            .decode(base64_data)
            .map(Bytes::from)
            .map_err(|e| ImageError::InvalidFormat(format!("Base64 解码失败：{}", e)))
    }

    async fn load_from_url(&self, url: &Url, config: &LoaderConfig) -> Result<Bytes, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", redact_url_for_log(url));

        if let Some(cached) = self.cached_download(url.as_str()) {
            log::debug!("♻️ 命中下载缓存 - URL: {}", redact_url_for_log(url));
            return Ok(cached);
        }

        let bytes = Self::download_with_validation(url, config).await?;
        self.store_download(url.as_str(), &bytes);
        Ok(bytes)
    }

    fn cached_download(&self, url: &str) -> Option<Bytes> {
        let mut cache = self.download_cache.as_ref()?.lock().ok()?;
        cache.get(url).cloned()
    }

    fn store_download(&self, url: &str, bytes: &Bytes) {
        if bytes.is_empty() {
            return;
        }
        if let Some(Ok(mut cache)) = self.download_cache.as_ref().map(|cache| cache.lock()) {
            cache.put(url.to_string(), bytes.clone());
        }
    }

    /// 流式下载，边读边校验体积与签名。
    async fn download_with_validation(url: &Url, config: &LoaderConfig) -> Result<Bytes, ImageError> {
        let client = build_http_client(config)?;
        let mut current_url = url.clone();

        for redirect_count in 0..=config.max_redirects {
            let response = send_with_retry(&client, &current_url, config).await?;

            if response.status().is_redirection() {
                if redirect_count >= config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                if next_url.scheme() != "http" && next_url.scheme() != "https" {
                    return Err(ImageError::InvalidFormat("重定向目标仅支持 HTTP/HTTPS".to_string()));
                }

                log::debug!("↪️ 跳转到: {}", redact_url_for_log(&next_url));
                current_url = next_url;
                continue;
            }

            if !response.status().is_success() {
                return Err(ImageError::Network(format!(
                    "HTTP {}: {}",
                    response.status().as_u16(),
                    status_message(response.status().as_u16())
                )));
            }

            if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
                if let Ok(ct_str) = ct.to_str() {
                    if !is_image_content_type(ct_str) {
                        return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct_str)));
                    }
                }
            }

            let total_len = response.content_length();
            if let Some(size) = total_len {
                if size > config.max_file_size {
                    return Err(ImageError::ResourceLimit(format!(
                        "文件过大：{:.2} MB（限制：{:.2} MB）",
                        size as f64 / 1024.0 / 1024.0,
                        config.max_file_size as f64 / 1024.0 / 1024.0
                    )));
                }
            }

            let initial_capacity = total_len
                .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
                .filter(|len| *len > 0)
                .unwrap_or(BUFFER_INITIAL_CAPACITY);
            let mut buffer = BytesMut::with_capacity(initial_capacity);
            let mut response = response;
            let mut signature_validated = false;
            let mut received_first_chunk = false;

            loop {
                let read_timeout = if received_first_chunk {
                    Duration::from_millis(config.stream_chunk_timeout_ms)
                } else {
                    Duration::from_millis(config.stream_first_byte_timeout_ms)
                };

                let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                    .await
                    .map_err(|_| {
                        if received_first_chunk {
                            ImageError::Timeout("下载数据流读取超时".to_string())
                        } else {
                            ImageError::Timeout("下载首包超时".to_string())
                        }
                    })?
                    .map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?;

                let Some(chunk) = next_chunk else {
                    break;
                };
                received_first_chunk = true;

                if buffer.len() as u64 + chunk.len() as u64 > config.max_file_size {
                    return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
                }
                buffer.extend_from_slice(&chunk);

                if !signature_validated {
                    signature_validated = validate_stream_signature_probe(&buffer, STREAM_SIGNATURE_PROBE_BYTES)?;
                }
            }

            if !signature_validated && !buffer.is_empty() {
                validate_image_signature(&buffer)?;
            }

            log::debug!("✅ 下载完成 - {} bytes", buffer.len());
            return Ok(buffer.freeze());
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }
}

impl ByteSource for DefaultByteSource {
    fn fetch<'a>(
        &'a self,
        source: &'a ImageSource,
        config: &'a LoaderConfig,
    ) -> BoxFuture<'a, Result<RawImageData, ImageError>> {
        self.load(source, config).boxed()
    }
}

fn build_http_client(config: &LoaderConfig) -> Result<reqwest::Client, ImageError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.download_timeout))
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))
}

async fn send_with_retry(
    client: &reqwest::Client,
    url: &Url,
    config: &LoaderConfig,
) -> Result<reqwest::Response, ImageError> {
    let mut attempt: u8 = 1;
    loop {
        let result = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
            .send()
            .await;

        match result {
            Ok(resp) if attempt < NETWORK_RETRY_MAX_ATTEMPTS && is_retryable_http_status(resp.status()) => {
                let delay_ms = retry_delay_ms(attempt);
                log::warn!(
                    "⚠️ HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                    resp.status().as_u16(),
                    attempt,
                    NETWORK_RETRY_MAX_ATTEMPTS,
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Ok(resp) => return Ok(resp),
            Err(err) if attempt < NETWORK_RETRY_MAX_ATTEMPTS && (err.is_timeout() || err.is_connect()) => {
                let delay_ms = retry_delay_ms(attempt);
                log::warn!(
                    "⚠️ 网络请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                    attempt,
                    NETWORK_RETRY_MAX_ATTEMPTS,
                    sanitize_error_message(&err.to_string(), url),
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return Err(map_reqwest_error(err, url, config)),
        }
        attempt = attempt.saturating_add(1);
    }
}

fn retry_delay_ms(attempt: u8) -> u64 {
    NETWORK_RETRY_BASE_DELAY_MS.saturating_mul(1_u64 << (attempt.saturating_sub(1) as u32))
}

fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn map_reqwest_error(e: reqwest::Error, url: &Url, config: &LoaderConfig) -> ImageError {
    let err_msg = sanitize_error_message(&e.to_string(), url);

    if e.is_timeout() {
        ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
    } else if e.is_connect() {
        ImageError::Network(format!("无法连接：{}", err_msg))
    } else {
        ImageError::Network(format!("请求失败：{}", err_msg))
    }
}

fn sanitize_error_message(error_msg: &str, url: &Url) -> String {
    error_msg.replace(url.as_str(), &redact_url_for_log(url))
}

fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| {
            let base = base.trim().to_ascii_lowercase();
            base.starts_with("image/") || base == "application/octet-stream"
        })
        .unwrap_or(false)
}

/// 去掉查询串与片段，避免日志泄露签名参数。
fn redact_url_for_log(url: &Url) -> String {
    let host = url.host_str().unwrap_or("<unknown-host>");
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    format!("{}://{}{}{}", url.scheme(), host, port, url.path())
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
    let kind = infer::get(bytes).ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 流式签名探测。
///
/// - `Ok(true)`：已识别为图片
/// - `Ok(false)`：字节不足以判断，继续下载
/// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
fn validate_stream_signature_probe(bytes: &[u8], probe_limit: usize) -> Result<bool, ImageError> {
    if bytes.is_empty() {
        return Ok(false);
    }

    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ImageError::InvalidFormat(format!(
                "下载内容不是图片类型：{}",
                kind.mime_type()
            )));
        }
        return Ok(true);
    }

    if bytes.len() >= probe_limit {
        return Err(ImageError::InvalidFormat(format!(
            "下载前 {} 字节内无法识别图片类型",
            probe_limit
        )));
    }

    Ok(false)
}

/// 将应用内 URI 映射到根目录下的文件。
///
/// 只支持当前应用（authority 为空），路径段不允许跳出根目录。
fn resolve_app_uri(url: &Url, root: Option<&Path>) -> Result<PathBuf, ImageError> {
    let root = root.ok_or_else(|| {
        ImageError::FileSystem(format!("未配置 {} URI 的根目录", url.scheme()))
    })?;

    if url.host_str().is_some_and(|host| !host.is_empty()) {
        return Err(ImageError::FileSystem(format!(
            "只支持访问当前应用的资源：{}",
            url
        )));
    }

    let mut resolved = root.to_path_buf();
    let segments = url
        .path_segments()
        .ok_or_else(|| ImageError::InvalidArgument(format!("URI 缺少路径：{}", url)))?;

    for segment in segments.filter(|s| !s.is_empty()) {
        let decoded = urlencoding::decode(segment)
            .map_err(|e| ImageError::InvalidArgument(format!("URI 路径不是合法的 UTF-8：{}", e)))?;
        // 解码后再检查，防止 %2F / %2E%2E 绕过
        if decoded.is_empty()
            || decoded == "."
            || decoded == ".."
            || decoded.contains(['/', '\\', '\0'])
        {
            return Err(ImageError::FileSystem(format!("URI 路径不合法：{}", url.path())));
        }
        resolved.push(&*decoded);
    }

    if resolved == root {
        return Err(ImageError::FileSystem(format!("URI 未指向文件：{}", url)));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};

    const PNG_SIGNATURE: [u8; 16] = [137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82];

    fn unique_temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("composition-image-{}-{}", label, nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn uri(text: &str) -> ImageSource {
        ImageSource::Uri(Url::parse(text).expect("valid uri"))
    }

    /// 单连接 HTTP 测试服务器，返回给定响应头与响应体。
    fn serve_once(head: String, body: Vec<u8>) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut req_buf = [0u8; 1024];
            let _ = stream.read(&mut req_buf);
            stream.write_all(head.as_bytes()).expect("write headers failed");
            stream.write_all(&body).expect("write body failed");
            stream.flush().expect("flush failed");
        });

        (port, server)
    }

    #[tokio::test]
    async fn downloads_image_and_serves_repeat_from_cache() {
        let body = PNG_SIGNATURE.to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body.clone());

        let source = DefaultByteSource::new(4);
        let config = LoaderConfig::default();
        let request = uri(&format!("http://127.0.0.1:{}/logo.png?sig=abc", port));

        let first = source.fetch(&request, &config).await.expect("download");
        server.join().expect("server thread failed");
        assert_eq!(first.bytes.as_ref(), body.as_slice());
        assert_eq!(first.source_hint, "network");

        // 服务器只接受一次连接，第二次必须命中缓存
        let second = source.fetch(&request, &config).await.expect("cached download");
        assert_eq!(second.bytes, first.bytes);
    }

    #[tokio::test]
    async fn rejects_non_image_content_type() {
        let body = b"<html></html>".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let source = DefaultByteSource::new(0);
        let result = source
            .fetch(&uri(&format!("http://127.0.0.1:{}/a.png", port)), &LoaderConfig::default())
            .await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn rejects_non_image_body_even_when_content_type_is_image() {
        let body = b"hello world".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let (port, server) = serve_once(head, body);

        let source = DefaultByteSource::new(0);
        let result = source
            .fetch(&uri(&format!("http://127.0.0.1:{}/fake.png", port)), &LoaderConfig::default())
            .await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn redirect_limit_is_enforced() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut req_buf = [0u8; 1024];
            let _ = stream.read(&mut req_buf);
            let response = format!(
                "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:{}/next.png\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                port
            );
            stream.write_all(response.as_bytes()).expect("write redirect failed");
            stream.flush().expect("flush failed");
        });

        let config = LoaderConfig {
            max_redirects: 0,
            ..LoaderConfig::default()
        };
        let result = DefaultByteSource::new(0)
            .fetch(&uri(&format!("http://127.0.0.1:{}/start.png", port)), &config)
            .await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::Network(_))));
    }

    #[tokio::test]
    async fn data_uri_is_decoded_inline() {
        let encoded = general_purpose::STANDARD.encode(PNG_SIGNATURE);
        let request = uri(&format!("data:image/png;base64,{}", encoded));

        let raw = DefaultByteSource::new(0)
            .fetch(&request, &LoaderConfig::default())
            .await
            .expect("data uri");
        assert_eq!(raw.bytes.as_ref(), PNG_SIGNATURE.as_slice());
    }

    #[tokio::test]
    async fn oversized_data_uri_is_rejected_before_decode() {
        let request = uri(&format!("data:image/png;base64,{}", "A".repeat(4096)));
        let config = LoaderConfig {
            max_file_size: 32,
            ..LoaderConfig::default()
        };

        let result = DefaultByteSource::new(0).fetch(&request, &config).await;
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn app_uris_resolve_against_configured_roots() {
        let package = unique_temp_dir("package");
        std::fs::create_dir_all(package.join("Assets")).expect("create assets");
        std::fs::write(package.join("Assets").join("logo.png"), PNG_SIGNATURE).expect("write asset");

        let config = LoaderConfig {
            package_root: Some(package.clone()),
            ..LoaderConfig::default()
        };
        let source = DefaultByteSource::new(0);

        let raw = source
            .fetch(&uri("ms-appx:///Assets/logo.png"), &config)
            .await
            .expect("package asset");
        assert_eq!(raw.bytes.len(), PNG_SIGNATURE.len());
        assert_eq!(raw.source_hint, "package");

        // 未配置应用数据根目录
        let result = source.fetch(&uri("ms-appdata:///local/logo.png"), &config).await;
        assert!(matches!(result, Err(ImageError::FileSystem(_))));

        let _ = std::fs::remove_dir_all(package);
    }

    #[tokio::test]
    async fn file_scheme_uri_is_rejected() {
        let result = DefaultByteSource::new(0)
            .fetch(&uri("file:///tmp/a.png"), &LoaderConfig::default())
            .await;
        assert!(matches!(result, Err(ImageError::FileSystem(_))));
    }

    #[tokio::test]
    async fn file_size_limit_uses_metadata() {
        let dir = unique_temp_dir("file-limit");
        let path = dir.join("big.png");
        std::fs::write(&path, vec![0u8; 128]).expect("write file");

        let config = LoaderConfig {
            max_file_size: 64,
            ..LoaderConfig::default()
        };
        let result = DefaultByteSource::new(0).fetch(&ImageSource::File(path), &config).await;
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));

        let missing = DefaultByteSource::new(0)
            .fetch(&ImageSource::File(dir.join("missing.png")), &LoaderConfig::default())
            .await;
        assert!(matches!(missing, Err(ImageError::FileSystem(_))));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn app_uri_resolution_keeps_paths_inside_root() {
        let root = Path::new("/srv/app");
        let url = Url::parse("ms-appx:///Assets/My%20Logo.png").expect("uri");
        assert_eq!(
            resolve_app_uri(&url, Some(root)).expect("resolved"),
            root.join("Assets").join("My Logo.png")
        );

        let non_ascii = Url::parse("ms-appx:///Assets/%E5%9B%BE.png").expect("uri");
        assert_eq!(
            resolve_app_uri(&non_ascii, Some(root)).expect("resolved"),
            root.join("Assets").join("图.png")
        );
        let raw_non_ascii = Url::parse("ms-appx:///Assets/图.png").expect("uri");
        assert_eq!(
            resolve_app_uri(&raw_non_ascii, Some(root)).expect("resolved"),
            root.join("Assets").join("图.png")
        );

        for escaping in [
            "ms-appx:///Assets/..%2Fsecret.png",
            "ms-appx:///Assets/a%5Cb.png",
        ] {
            let url = Url::parse(escaping).expect("uri");
            assert!(
                matches!(resolve_app_uri(&url, Some(root)), Err(ImageError::FileSystem(_))),
                "{} must not resolve",
                escaping
            );
        }
        let invalid_utf8 = Url::parse("ms-appx:///Assets/%FF.png").expect("uri");
        assert!(matches!(
            resolve_app_uri(&invalid_utf8, Some(root)),
            Err(ImageError::InvalidArgument(_))
        ));

        let foreign = Url::parse("ms-appx://other.package/Assets/logo.png").expect("uri");
        assert!(resolve_app_uri(&foreign, Some(root)).is_err());

        let bare_root = Url::parse("ms-appx:///").expect("uri");
        assert!(resolve_app_uri(&bare_root, Some(root)).is_err());
        assert!(resolve_app_uri(&url, None).is_err());
    }

    #[test]
    fn content_type_parser_accepts_image_with_params() {
        assert!(is_image_content_type("image/png; charset=utf-8"));
        assert!(is_image_content_type("IMAGE/JPEG"));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let url = Url::parse("https://example.com:8443/path/img.png?token=abc123#hash").expect("url");
        assert_eq!(redact_url_for_log(&url), "https://example.com:8443/path/img.png");
    }

    #[test]
    fn stream_signature_probe_waits_then_decides() {
        assert!(matches!(validate_stream_signature_probe(&PNG_SIGNATURE, 64), Ok(true)));
        assert!(matches!(validate_stream_signature_probe(&[0x89], 64), Ok(false)));
        assert!(matches!(
            validate_stream_signature_probe(b"<html><body>not an image</body></html>", 64),
            Err(ImageError::InvalidFormat(_))
        ));
    }
}
