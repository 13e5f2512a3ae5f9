mod file_config;

pub use file_config::{AuthConfig, ChatConfig, FileConfig, ImagesConfig, JobsConfig, RelayConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_CHAT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_IMAGES_BASE_URL: &str = "https://api.replicate.com";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub public_base_url: Option<String>,
    pub chat_api_key: Option<String>,
    pub images_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    /// Where the chat database lives. Without it conversations are kept in
    /// memory only.
    pub db_dir: Option<PathBuf>,
    pub media_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub public_base_url: String,

    // Feature configs (with defaults)
    pub jobs: JobsSettings,
    pub relay: RelaySettings,
    pub chat: ChatSettings,
    pub images: ImagesSettings,
    pub auth_tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsSettings {
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub sync_timeout: Duration,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            sync_timeout: Duration::from_secs(240),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub channel_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ImagesSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file.db_dir.map(PathBuf::from).or_else(|| cli.db_dir.clone());
        if let Some(dir) = &db_dir {
            if !dir.exists() {
                bail!("Database directory does not exist: {:?}", dir);
            }
            if !dir.is_dir() {
                bail!("db_dir is not a directory: {:?}", dir);
            }
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .or_else(|| db_dir.as_ref().map(|dir| dir.join("media")))
            .unwrap_or_else(|| std::env::temp_dir().join("persona-media"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port && port != 0 {
            bail!("port and metrics_port must differ (both {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let public_base_url = file
            .public_base_url
            .or_else(|| cli.public_base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let jobs_file = file.jobs.unwrap_or_default();
        let job_defaults = JobsSettings::default();
        let retention = match jobs_file.retention_hours {
            Some(h) => match h.checked_mul(3600) {
                Some(secs) => Duration::from_secs(secs),
                None => bail!("jobs.retention_hours is too large ({})", h),
            },
            None => job_defaults.retention,
        };
        let jobs = JobsSettings {
            retention,
            sweep_interval: jobs_file
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(job_defaults.sweep_interval),
            sync_timeout: jobs_file
                .sync_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(job_defaults.sync_timeout),
        };
        if jobs.sweep_interval.is_zero() || jobs.sync_timeout.is_zero() {
            bail!("jobs.sweep_interval_secs and jobs.sync_timeout_secs must be positive");
        }

        let relay = RelaySettings {
            channel_capacity: file
                .relay
                .and_then(|r| r.channel_capacity)
                .unwrap_or(RelaySettings::default().channel_capacity),
        };
        if relay.channel_capacity == 0 {
            bail!("relay.channel_capacity must be at least 1");
        }

        let chat_file = file.chat.unwrap_or_default();
        let chat = ChatSettings {
            base_url: chat_file
                .base_url
                .unwrap_or_else(|| DEFAULT_CHAT_BASE_URL.to_string()),
            api_key: chat_file.api_key.or_else(|| cli.chat_api_key.clone()),
            default_model: chat_file
                .default_model
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            request_timeout: Duration::from_secs(chat_file.request_timeout_secs.unwrap_or(120)),
        };

        let images_file = file.images.unwrap_or_default();
        let images = ImagesSettings {
            base_url: images_file
                .base_url
                .unwrap_or_else(|| DEFAULT_IMAGES_BASE_URL.to_string()),
            api_key: images_file.api_key.or_else(|| cli.images_api_key.clone()),
            poll_interval: Duration::from_secs(images_file.poll_interval_secs.unwrap_or(3)),
            max_poll_attempts: images_file.max_poll_attempts.unwrap_or(60),
        };

        let auth_tokens = file.auth.map(|a| a.tokens).unwrap_or_default();

        Ok(Self {
            db_dir,
            media_path,
            port,
            metrics_port,
            logging_level,
            public_base_url,
            jobs,
            relay,
            chat,
            images,
            auth_tokens,
        })
    }

    pub fn chat_db_path(&self) -> Option<PathBuf> {
        self.db_dir.as_ref().map(|dir| dir.join("chat.db"))
    }

    pub fn gallery_db_path(&self) -> Option<PathBuf> {
        self.db_dir.as_ref().map(|dir| dir.join("gallery.db"))
    }

    /// Base URL under which stored files are reachable.
    pub fn storage_base_url(&self) -> String {
        format!("{}/storage", self.public_base_url)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
