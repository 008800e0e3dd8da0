use eyre::{Context, Result};
use floodnel::domain::{ColumnMapping, Platform};
use floodnel::llm::OllamaConfig;
use floodnel::llm::media::{DEFAULT_IMAGE_CACHE_SIZE, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_SHORT_SIDE};
use floodnel::llm::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use floodnel::scheduler::{RetryPolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub classifier: ClassifierConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub run: RunConfig,
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_media: usize,
    pub temperature: f64,
    pub num_ctx: u32,
    pub keep_alive: String,
    pub media_root: Option<PathBuf>,
    pub max_short_side: u32,
    pub jpeg_quality: u8,
    pub image_cache_size: usize,
    pub warm_up: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: 300000,
            connect_timeout_ms: 10000,
            max_media: 3,
            temperature: 0.1,
            num_ctx: 4096,
            keep_alive: "4h".to_string(),
            media_root: None,
            max_short_side: DEFAULT_MAX_SHORT_SIDE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            image_cache_size: DEFAULT_IMAGE_CACHE_SIZE,
            warm_up: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
    pub shutdown_grace_ms: u64,
    pub max_consecutive_failures: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            shutdown_grace_ms: 30000,
            max_consecutive_failures: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            jitter_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub every_rows: usize,
    pub marker: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_rows: 5,
            marker: "nel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub start_offset: usize,
    pub max_rows: Option<usize>,
    pub resume: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_offset: 0,
            max_rows: None,
            resume: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub tiktok: ColumnMapping,
    pub twitter: ColumnMapping,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            tiktok: Platform::Tiktok.default_columns(),
            twitter: Platform::Twitter.default_columns(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            classifier: ClassifierConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            run: RunConfig::default(),
            platforms: PlatformsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn columns_for(&self, platform: Platform) -> ColumnMapping {
        match platform {
            Platform::Tiktok => self.platforms.tiktok.clone(),
            Platform::Twitter => self.platforms.twitter.clone(),
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        let c = &self.classifier;
        OllamaConfig {
            base_url: c.base_url.clone(),
            model: c.model.clone(),
            request_timeout: Duration::from_millis(c.timeout_ms),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            max_media: c.max_media,
            temperature: c.temperature,
            num_ctx: c.num_ctx,
            keep_alive: c.keep_alive.clone(),
            media_root: c.media_root.clone(),
            max_short_side: c.max_short_side,
            jpeg_quality: c.jpeg_quality.clamp(1, 100),
            image_cache_size: c.image_cache_size,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.concurrency.max_concurrent.max(1),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.max(1),
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                jitter: Duration::from_millis(self.retry.jitter_ms),
            },
            request_timeout: Duration::from_millis(self.classifier.timeout_ms),
            shutdown_grace: Duration::from_millis(self.concurrency.shutdown_grace_ms),
            max_consecutive_failures: self.concurrency.max_consecutive_failures,
        }
    }
}
