//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the pipeline, tools, compression, storage, etc. Every
//! section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable that overrides [`AuthConfig::api_token`].
pub const API_TOKEN_ENV: &str = "REELKEEPER_API_TOKEN";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub tools: ToolsConfig,
    pub compression: CompressionConfig,
    pub thumbnails: ThumbnailConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub remote: RemoteConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply environment overrides on top of the file configuration.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(API_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.auth.api_token = Some(token);
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.concurrency_limit == 0 {
            warnings.push("pipeline.concurrency_limit is 0; 1 will be used".into());
        }

        if self.pipeline.task_timeout_secs == 0 {
            warnings.push("pipeline.task_timeout_secs is 0; every step would time out".into());
        }

        if self.compression.crf > 51 {
            warnings.push(format!(
                "compression.crf {} is outside the encoder range 0-51",
                self.compression.crf
            ));
        }

        if self.thumbnails.count == 0 {
            warnings.push("thumbnails.count is 0; thumbnail-based steps will degrade".into());
        }

        if self.auth.api_token.is_none() {
            warnings.push(
                "auth.api_token is not set; persist, embeddings and upload will be skipped".into(),
            );
        }

        for (name, endpoint) in [
            ("remote.ai_endpoint", &self.remote.ai_endpoint),
            ("remote.embeddings_endpoint", &self.remote.embeddings_endpoint),
            ("remote.upload_endpoint", &self.remote.upload_endpoint),
        ] {
            if let Some(url) = endpoint {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    warnings.push(format!("{name} '{url}' is not an http(s) URL"));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Pipeline engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of files processed at once by the batch controller.
    pub concurrency_limit: usize,
    /// Bypass the duplicate barrier.
    pub force_reprocess: bool,
    /// Per-step enable/disable overrides, keyed by step name.
    pub steps: BTreeMap<String, bool>,
    /// Time budget for any single step.
    pub task_timeout_secs: u64,
}

impl PipelineConfig {
    /// The per-step timeout as a [`Duration`].
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            force_reprocess: false,
            steps: BTreeMap::new(),
            task_timeout_secs: 3600,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub mediainfo_path: Option<PathBuf>,
    pub exiftool_path: Option<PathBuf>,
}

/// Video compression defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub crf: u32,
    pub preset: String,
    pub audio_bitrate: String,
    /// Output height cap; sources taller than this are scaled down.
    pub max_height: u32,
    /// Directory receiving compressed files; defaults to the system temp dir.
    pub output_dir: Option<PathBuf>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            crf: 28,
            preset: "veryfast".into(),
            audio_bitrate: "128k".into(),
            max_height: 720,
            output_dir: None,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Number of evenly spaced thumbnails per file.
    pub count: u32,
    /// Thumbnail width in pixels (height keeps the aspect ratio).
    pub width: u32,
    pub output_dir: Option<PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            count: 5,
            width: 640,
            output_dir: None,
        }
    }
}

/// Local record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub store_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./data/records"),
        }
    }
}

/// Authentication settings for steps that write to shared storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_token: Option<String>,
    /// Identity attached to batches; falls back to `$USER`.
    pub user_id: Option<String>,
}

/// Remote service endpoints. A missing endpoint leaves the step unconfigured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub ai_endpoint: Option<String>,
    pub embeddings_endpoint: Option<String>,
    pub upload_endpoint: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ai_endpoint: None,
            embeddings_endpoint: None,
            upload_endpoint: None,
            request_timeout_secs: 120,
        }
    }
}
