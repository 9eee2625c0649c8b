//! Traits for everything the flow delegates to: hashing, extractors, media
//! tools, remote services and the record store.
//!
//! The flow only sees these traits. Real implementations live in `rk-av` and
//! the `reelkeeper` binary; tests substitute fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rk_core::config::CompressionConfig;
use rk_core::{FileId, RecordId, Result, SubProgress};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::MediaRecord;

/// Normalized key/value output of one metadata extractor.
pub type MetadataMap = Map<String, Value>;

/// Credentials for steps that write to shared storage.
#[derive(Clone)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// An already ingested record sharing the checksum of the current file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub record_id: RecordId,
    pub checksum: String,
    pub file_path: PathBuf,
    pub ingested_at: DateTime<Utc>,
}

/// One encoder progress sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeProgress {
    /// 0.0 -- 1.0 of the input duration encoded so far.
    pub fraction: f64,
    pub frames: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
}

impl EncodeProgress {
    pub fn percent(&self) -> f32 {
        (self.fraction * 100.0) as f32
    }

    pub fn sub_progress(&self) -> SubProgress {
        SubProgress {
            frames: self.frames,
            fps: self.fps,
            speed: self.speed,
        }
    }
}

#[async_trait]
pub trait Checksummer: Send + Sync {
    /// Lowercase hex digest of the file contents.
    async fn checksum(&self, path: &Path) -> Result<String>;
}

#[async_trait]
pub trait DuplicateIndex: Send + Sync {
    async fn find_by_checksum(&self, checksum: &str) -> Result<Option<DuplicateRecord>>;
}

/// A metadata source such as ffprobe, mediainfo or exiftool.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn extract(&self, path: &Path) -> Result<MetadataMap>;
}

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Write still frames and return their paths, earliest first.
    ///
    /// Outputs must not collide with those of another `file_id`, even when
    /// two inputs share a file name.
    async fn generate(&self, path: &Path, file_id: FileId) -> Result<Vec<PathBuf>>;
}

#[async_trait]
pub trait Compressor: Send + Sync {
    /// Encode a proxy of `path`, reporting progress through `on_progress`.
    /// The output is unique to `file_id`.
    async fn compress(
        &self,
        path: &Path,
        file_id: FileId,
        settings: &CompressionConfig,
        on_progress: &(dyn Fn(EncodeProgress) + Send + Sync),
    ) -> Result<PathBuf>;
}

#[async_trait]
pub trait FocalLengthDetector: Send + Sync {
    /// Estimated focal length in millimetres, if one can be inferred.
    async fn detect(&self, thumbnails: &[PathBuf]) -> Result<Option<f64>>;
}

#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    async fn analyze(&self, compressed: &Path) -> Result<MetadataMap>;
}

#[async_trait]
pub trait ThumbnailSelector: Send + Sync {
    async fn select(&self, analysis: &MetadataMap, thumbnails: &[PathBuf]) -> Result<Option<PathBuf>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn persist(&self, record: &MediaRecord, session: &Session) -> Result<RecordId>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str, session: &Session) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait ThumbnailUploader: Send + Sync {
    /// Upload the thumbnails and return their public locations.
    async fn upload(
        &self,
        record_id: Option<RecordId>,
        thumbnails: &[PathBuf],
        session: &Session,
    ) -> Result<Vec<String>>;
}

/// The eight extractors of the fan-out group.
#[derive(Clone)]
pub struct Extractors {
    pub container: Arc<dyn Extractor>,
    pub secondary: Arc<dyn Extractor>,
    pub exif_basic: Arc<dyn Extractor>,
    pub exif_extended: Arc<dyn Extractor>,
    pub codec: Arc<dyn Extractor>,
    pub hdr: Arc<dyn Extractor>,
    pub audio: Arc<dyn Extractor>,
    pub subtitles: Arc<dyn Extractor>,
}

/// Everything the flow calls out to.
///
/// The optional collaborators back steps that depend on remote services;
/// when one is `None` its step is skipped as unconfigured.
#[derive(Clone)]
pub struct Collaborators {
    pub checksummer: Arc<dyn Checksummer>,
    pub duplicates: Arc<dyn DuplicateIndex>,
    pub extractors: Extractors,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub compressor: Arc<dyn Compressor>,
    pub focal_length: Option<Arc<dyn FocalLengthDetector>>,
    pub ai_analyzer: Option<Arc<dyn AiAnalyzer>>,
    pub thumbnail_selector: Option<Arc<dyn ThumbnailSelector>>,
    pub store: Arc<dyn RecordStore>,
    pub embeddings: Option<Arc<dyn EmbeddingService>>,
    pub uploader: Option<Arc<dyn ThumbnailUploader>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("focal_length", &self.focal_length.is_some())
            .field("ai_analyzer", &self.ai_analyzer.is_some())
            .field("thumbnail_selector", &self.thumbnail_selector.is_some())
            .field("embeddings", &self.embeddings.is_some())
            .field("uploader", &self.uploader.is_some())
            .finish_non_exhaustive()
    }
}
