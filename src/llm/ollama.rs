//! Ollama chat backend
//!
//! Implements [`Classifier`] against an Ollama-compatible `/api/chat`
//! endpoint with vision support.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::domain::{Classification, PostRow};
use crate::error::{FloodnelError, Result};
use crate::llm::client::{Classifier, ClassifyError};
use crate::llm::media::{DEFAULT_IMAGE_CACHE_SIZE, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_SHORT_SIDE, ImageCache, prepare_image};
use crate::llm::prompt::{SYSTEM_PROMPT, build_user_prompt};
use crate::llm::response::parse_analysis;

/// Default Ollama endpoint
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default vision model
pub const DEFAULT_MODEL: &str = "qwen3-vl:32b-instruct";

/// Used when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Configuration for the Ollama backend
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Whole-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum images attached per post; the rest are dropped
    pub max_media: usize,
    pub temperature: f64,
    pub num_ctx: u32,
    pub keep_alive: String,
    /// Base directory for relative media paths
    pub media_root: Option<PathBuf>,
    /// Images are downsized until their short side is at most this
    pub max_short_side: u32,
    pub jpeg_quality: u8,
    /// Encoded images remembered across rows; 0 disables the cache
    pub image_cache_size: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            max_media: 3,
            temperature: 0.1,
            num_ctx: 4096,
            keep_alive: "4h".to_string(),
            media_root: None,
            max_short_side: DEFAULT_MAX_SHORT_SIDE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            image_cache_size: DEFAULT_IMAGE_CACHE_SIZE,
        }
    }
}

/// Ollama `/api/chat` classifier
pub struct OllamaClassifier {
    client: Client,
    config: OllamaConfig,
    images: Mutex<ImageCache>,
}

impl OllamaClassifier {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| FloodnelError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let images = Mutex::new(ImageCache::new(config.image_cache_size));
        Ok(Self { client, config, images })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }

    fn resolve_media(&self, media_ref: &str) -> PathBuf {
        let path = Path::new(media_ref);
        match &self.config.media_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Read, compress and base64 encode one image, consulting the cache first
    async fn encode_image(&self, path: &Path) -> std::io::Result<String> {
        let cached = self.images.lock().unwrap_or_else(PoisonError::into_inner).get(path);
        if let Some(encoded) = cached {
            return Ok(encoded);
        }

        let bytes = tokio::fs::read(path).await?;
        let (side, quality) = (self.config.max_short_side, self.config.jpeg_quality);
        let owned = path.to_path_buf();
        let prepared = tokio::task::spawn_blocking(move || prepare_image(&owned, bytes, side, quality))
            .await
            .map_err(std::io::Error::other)?;

        let encoded = STANDARD.encode(prepared);
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), encoded.clone());
        Ok(encoded)
    }

    /// Read and base64 encode up to `max_media` images for a row
    async fn load_images(&self, row: &PostRow) -> std::result::Result<Vec<String>, ClassifyError> {
        if row.media_refs.len() > self.config.max_media {
            debug!(
                "Post {}: using {} of {} media refs",
                row.id,
                self.config.max_media,
                row.media_refs.len()
            );
        }

        let mut images = Vec::new();
        for media_ref in row.media_refs.iter().take(self.config.max_media) {
            let path = self.resolve_media(media_ref);

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
                return Err(ClassifyError::permanent(format!(
                    "unsupported media type: {}",
                    path.display()
                )));
            }

            match self.encode_image(&path).await {
                Ok(encoded) => images.push(encoded),
                Err(e) => warn!("Post {}: skipping media {}: {}", row.id, path.display(), e),
            }
        }
        Ok(images)
    }

    fn build_payload(&self, user_prompt: &str, images: Vec<String>) -> Value {
        let mut user = json!({
            "role": "user",
            "content": user_prompt,
        });
        if !images.is_empty() {
            user["images"] = json!(images);
        }

        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                user,
            ],
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.config.temperature,
                "num_ctx": self.config.num_ctx,
            },
            "keep_alive": self.config.keep_alive,
        })
    }

    /// POST to the chat endpoint and return the assistant message content
    async fn send_request(&self, body: &Value) -> std::result::Result<String, ClassifyError> {
        let response = self
            .client
            .post(self.chat_url())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &error_body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClassifyError::transient(format!("unreadable response body: {}", e)))?;

        if let Some(error) = body["error"].as_str() {
            return Err(ClassifyError::transient(format!("service error: {}", error)));
        }

        body["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClassifyError::transient("response has no message content"))
    }
}

/// Map a non-success HTTP status to the row-level error taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ClassifyError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.trim().chars().take(300).collect::<String>())
    };

    match status.as_u16() {
        429 => ClassifyError::rate_limited(message, retry_after.unwrap_or(DEFAULT_RETRY_AFTER)),
        408 => ClassifyError::transient(message),
        401 | 403 | 404 => ClassifyError::fatal(message),
        code if code >= 500 => ClassifyError::transient(message),
        _ => ClassifyError::permanent(message),
    }
}

fn transport_error(e: reqwest::Error) -> ClassifyError {
    if e.is_timeout() {
        ClassifyError::transient(format!("request timed out: {}", e))
    } else if e.is_connect() {
        ClassifyError::transient(format!("connection failed: {}", e))
    } else {
        ClassifyError::transient(format!("request failed: {}", e))
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, row: &PostRow) -> std::result::Result<Classification, ClassifyError> {
        if row.is_empty_post() {
            return Err(ClassifyError::permanent("post has no text and no media"));
        }
        let images = self.load_images(row).await?;
        if images.is_empty() && row.source_text.trim().is_empty() {
            return Err(ClassifyError::permanent("post has no text and no readable media"));
        }

        let prompt = build_user_prompt(&row.source_text, images.len());
        let body = self.build_payload(&prompt, images);
        let content = self.send_request(&body).await?;
        parse_analysis(&content)
    }

    async fn warm_up(&self) -> std::result::Result<(), ClassifyError> {
        let body = self.build_payload("Warm up and respond with {}.", Vec::new());
        self.send_request(&body).await.map(|_| ())
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OllamaClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClassifier")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LossType;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn model_reply() -> String {
        let losses = LossType::ALL
            .iter()
            .map(|t| format!("\"{}\": {{\"present\": false, \"confidence\": 0.2}}", t))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{\"loss_types\": {{{}}}, \"urgency_score_0_5\": 1}}", losses)
    }

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
    }

    /// Serve exactly one HTTP response on a loopback port; yields the request body
    async fn serve_once(status: &str, extra_headers: &str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let extra_headers = extra_headers.to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];

            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = find_header_end(&buf) {
                    break end;
                }
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);

            while buf.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
                status,
                body.len(),
                extra_headers,
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&buf[header_end..]).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn classifier_for(base_url: String) -> OllamaClassifier {
        OllamaClassifier::new(OllamaConfig {
            base_url,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_media, 3);
        assert!(config.media_root.is_none());
        assert_eq!(config.max_short_side, 512);
        assert_eq!(config.jpeg_quality, 85);
    }

    #[test]
    fn test_classify_status_mapping() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(12)), "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));

        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, None, "");
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));

        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, None, "").is_retryable());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            ClassifyError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, "model not found"),
            ClassifyError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, "bad image"),
            ClassifyError::Permanent(_)
        ));
    }

    #[test]
    fn test_build_payload() {
        let classifier = classifier_for(DEFAULT_BASE_URL.to_string());
        let body = classifier.build_payload("hello", vec!["aGVsbG8=".to_string()]);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["messages"][1]["images"][0], "aGVsbG8=");
        assert_eq!(body["keep_alive"], "4h");
    }

    #[test]
    fn test_build_payload_without_images() {
        let classifier = classifier_for(DEFAULT_BASE_URL.to_string());
        let body = classifier.build_payload("hello", Vec::new());
        assert!(body["messages"][1].get("images").is_none());
    }

    #[test]
    fn test_resolve_media_against_root() {
        let classifier = OllamaClassifier::new(OllamaConfig {
            media_root: Some(PathBuf::from("/data/media")),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(classifier.resolve_media("a/b.jpg"), PathBuf::from("/data/media/a/b.jpg"));
        assert_eq!(classifier.resolve_media("/abs/c.png"), PathBuf::from("/abs/c.png"));
    }

    #[tokio::test]
    async fn test_load_images_truncates_and_skips_missing() {
        let temp = TempDir::new().unwrap();
        for name in ["a.jpg", "b.png", "c.webp", "d.jpg"] {
            std::fs::write(temp.path().join(name), name.as_bytes()).unwrap();
        }
        let classifier = OllamaClassifier::new(OllamaConfig {
            media_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        let row = PostRow::new(
            "1",
            "text",
            vec!["a.jpg".into(), "missing.jpg".into(), "c.webp".into(), "d.jpg".into()],
        );
        let images = classifier.load_images(&row).await.unwrap();

        assert_eq!(images, vec![STANDARD.encode("a.jpg"), STANDARD.encode("c.webp")]);
    }

    #[tokio::test]
    async fn test_large_frames_are_downsized_and_cached() {
        let temp = TempDir::new().unwrap();
        let frame = temp.path().join("frame.png");
        image::RgbImage::from_pixel(1600, 1200, image::Rgb([10, 120, 200]))
            .save(&frame)
            .unwrap();
        let classifier = OllamaClassifier::new(OllamaConfig {
            media_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        let row = PostRow::new("1", "", vec!["frame.png".into()]);
        let images = classifier.load_images(&row).await.unwrap();
        assert_eq!(images.len(), 1);

        let decoded = image::load_from_memory(&STANDARD.decode(&images[0]).unwrap()).unwrap();
        assert_eq!(decoded.width().min(decoded.height()), 512);
        assert_eq!(decoded.width(), 682);

        std::fs::remove_file(&frame).unwrap();
        assert_eq!(classifier.load_images(&row).await.unwrap(), images);
    }

    #[tokio::test]
    async fn test_unsupported_media_is_permanent() {
        let classifier = classifier_for(DEFAULT_BASE_URL.to_string());
        let row = PostRow::new("1", "text", vec!["clip.mp4".into()]);

        let err = classifier.classify(&row).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_empty_post_is_permanent() {
        let classifier = classifier_for(DEFAULT_BASE_URL.to_string());
        let row = PostRow::new("1", "  ", vec!["/nonexistent/x.jpg".into()]);

        let err = classifier.classify(&row).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Permanent(_)));

        let err = classifier.classify(&PostRow::new("2", "", vec![])).await.unwrap_err();
        assert!(err.to_string().contains("no text and no media"));
    }

    #[tokio::test]
    async fn test_classify_against_stub_server() {
        let reply = json!({
            "model": DEFAULT_MODEL,
            "message": { "role": "assistant", "content": model_reply() },
            "done": true
        });
        let (base_url, handle) = serve_once("200 OK", "", reply.to_string()).await;
        let classifier = classifier_for(base_url);

        let row = PostRow::new("42", "Flooded street near the market", Vec::new());
        let classification = classifier.classify(&row).await.unwrap();
        assert_eq!(classification.scalars.urgency_score, 1);

        let request: Value = serde_json::from_str(&handle.await.unwrap()).unwrap();
        assert_eq!(request["model"], DEFAULT_MODEL);
        assert!(
            request["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("Flooded street near the market")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let (base_url, handle) = serve_once("429 Too Many Requests", "Retry-After: 7\r\n", "{}".to_string()).await;
        let classifier = classifier_for(base_url);

        let err = classifier.classify(&PostRow::new("1", "text", Vec::new())).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let (base_url, handle) = serve_once("401 Unauthorized", "", "{\"error\":\"bad key\"}".to_string()).await;
        let classifier = classifier_for(base_url);

        let err = classifier.classify(&PostRow::new("1", "text", Vec::new())).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Fatal(_)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let classifier = classifier_for(format!("http://{}", addr));
        let err = classifier.classify(&PostRow::new("1", "text", Vec::new())).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_debug_impl() {
        let classifier = classifier_for(DEFAULT_BASE_URL.to_string());
        let debug_str = format!("{:?}", classifier);
        assert!(debug_str.contains("OllamaClassifier"));
        assert!(debug_str.contains(DEFAULT_MODEL));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OllamaClassifier>();
    }
}
