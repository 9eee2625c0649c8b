//! Fake collaborators shared by the flow and batch integration tests.
//!
//! [`Harness`] builds a [`Collaborators`] bundle whose every call is counted
//! in a [`CallLog`]. Individual steps can be made to fail, and the duplicate
//! index can be primed with an existing record.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rk_core::config::CompressionConfig;
use rk_core::{Error, FileId, ProgressEvent, RecordId, Result};
use serde_json::{json, Value};

use rk_pipeline::collaborators::{
    AiAnalyzer, Checksummer, Compressor, DuplicateIndex, DuplicateRecord, EmbeddingService,
    Extractor, FocalLengthDetector, RecordStore, ThumbnailGenerator, ThumbnailSelector,
    ThumbnailUploader,
};
use rk_pipeline::{
    Collaborators, EncodeProgress, Extractors, MediaRecord, MetadataMap, ProgressReporter, Session,
};

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// Counts and orders calls made to the fakes.
#[derive(Default)]
pub struct CallLog {
    counts: Mutex<BTreeMap<String, usize>>,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    fn hit(&self, name: &str) {
        *self.counts.lock().entry(name.to_string()).or_default() += 1;
        self.order.lock().push(name.to_string());
    }

    fn mark(&self, label: &str) {
        self.order.lock().push(label.to_string());
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.order.lock().iter().position(|l| l == label)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Builder for a fake collaborator bundle.
pub struct Harness {
    pub calls: Arc<CallLog>,
    /// Steps whose collaborator returns an error.
    pub failing: BTreeSet<&'static str>,
    /// Steps whose collaborator panics.
    pub panicking: BTreeSet<&'static str>,
    /// Record returned by the duplicate index.
    pub duplicate: Option<DuplicateRecord>,
    /// Focal length reported by EXIF; `None` leaves the key out.
    pub exif_focal_length: Option<f64>,
    /// Thumbnails returned by the generator.
    pub thumbnail_count: usize,
    /// Time the compressor takes.
    pub compress_delay: Duration,
    /// Track files in flight from checksum to upload.
    pub track_in_flight: bool,
    /// File name whose checksum panics.
    pub poison_file: Option<&'static str>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            calls: Arc::new(CallLog::default()),
            failing: BTreeSet::new(),
            panicking: BTreeSet::new(),
            duplicate: None,
            exif_focal_length: None,
            thumbnail_count: 3,
            compress_delay: Duration::ZERO,
            track_in_flight: false,
            poison_file: None,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, step: &'static str) -> Self {
        self.failing.insert(step);
        self
    }

    pub fn panicking(mut self, step: &'static str) -> Self {
        self.panicking.insert(step);
        self
    }

    pub fn with_duplicate(mut self) -> Self {
        self.duplicate = Some(DuplicateRecord {
            record_id: RecordId::generate(),
            checksum: FAKE_CHECKSUM.into(),
            file_path: PathBuf::from("/library/already_here.mov"),
            ingested_at: Utc::now(),
        });
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let behaviour = Arc::new(Behaviour {
            calls: self.calls.clone(),
            failing: self.failing.clone(),
            panicking: self.panicking.clone(),
            duplicate: self.duplicate.clone(),
            exif_focal_length: self.exif_focal_length,
            thumbnail_count: self.thumbnail_count,
            compress_delay: self.compress_delay,
            track_in_flight: self.track_in_flight,
            poison_file: self.poison_file,
        });

        let extractor = |name: &'static str, output: Value| -> Arc<dyn Extractor> {
            Arc::new(FakeExtractor {
                name,
                output: output.as_object().cloned().unwrap_or_default(),
                behaviour: behaviour.clone(),
            })
        };

        let mut exif_basic = json!({"make": "Canon", "model": "EOS R5", "iso": 800});
        if let Some(focal) = self.exif_focal_length {
            exif_basic["focal_length"] = json!(focal);
        }

        Collaborators {
            checksummer: Arc::new(Fake(behaviour.clone())),
            duplicates: Arc::new(Fake(behaviour.clone())),
            extractors: Extractors {
                container: extractor(
                    "container_metadata",
                    json!({"container_format": "mov", "codec": "h264", "width": 3840, "height": 2160, "duration": 12.5}),
                ),
                secondary: extractor(
                    "secondary_metadata",
                    json!({"container_format": "MPEG-4", "bit_rate": 100_000_000}),
                ),
                exif_basic: extractor("exif_basic", exif_basic),
                exif_extended: extractor("exif_extended", json!({"lens_model": "RF24-70mm F2.8 L IS USM"})),
                codec: extractor("codec_parameters", json!({"profile": "High", "pixel_format": "yuv420p"})),
                hdr: extractor("hdr_parameters", json!({"color_transfer": "bt709"})),
                audio: extractor("audio_tracks", json!({"audio_tracks": [{"codec": "aac", "channels": 2}]})),
                subtitles: extractor("subtitle_tracks", json!({"subtitle_tracks": []})),
            },
            thumbnails: Arc::new(Fake(behaviour.clone())),
            compressor: Arc::new(Fake(behaviour.clone())),
            focal_length: Some(Arc::new(Fake(behaviour.clone()))),
            ai_analyzer: Some(Arc::new(Fake(behaviour.clone()))),
            thumbnail_selector: Some(Arc::new(Fake(behaviour.clone()))),
            store: Arc::new(Fake(behaviour.clone())),
            embeddings: Some(Arc::new(Fake(behaviour.clone()))),
            uploader: Some(Arc::new(Fake(behaviour.clone()))),
        }
    }
}

pub const FAKE_CHECKSUM: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

pub fn session() -> Session {
    Session {
        user_id: "editor".into(),
        token: "test-token".into(),
    }
}

/// Reporter collecting every event.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressReporter for RecordingReporter {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct Behaviour {
    calls: Arc<CallLog>,
    failing: BTreeSet<&'static str>,
    panicking: BTreeSet<&'static str>,
    duplicate: Option<DuplicateRecord>,
    exif_focal_length: Option<f64>,
    thumbnail_count: usize,
    compress_delay: Duration,
    track_in_flight: bool,
    poison_file: Option<&'static str>,
}

impl Behaviour {
    /// Count the call, then fail or panic if configured to.
    fn call(&self, step: &'static str) -> Result<()> {
        self.calls.hit(step);
        if self.panicking.contains(step) {
            panic!("{step} exploded");
        }
        if self.failing.contains(step) {
            return Err(Error::tool(step, "simulated failure"));
        }
        Ok(())
    }
}

struct Fake(Arc<Behaviour>);

struct FakeExtractor {
    name: &'static str,
    output: MetadataMap,
    behaviour: Arc<Behaviour>,
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &str {
        self.name
    }

    async fn extract(&self, _path: &Path) -> Result<MetadataMap> {
        self.behaviour.call(self.name)?;
        Ok(self.output.clone())
    }
}

#[async_trait]
impl Checksummer for Fake {
    async fn checksum(&self, path: &Path) -> Result<String> {
        if let Some(poison) = self.0.poison_file {
            if path.file_name().is_some_and(|n| n == poison) {
                panic!("unreadable file {}", path.display());
            }
        }
        if self.0.track_in_flight {
            self.0.calls.enter();
        }
        self.0.call("checksum")?;
        Ok(FAKE_CHECKSUM.into())
    }
}

#[async_trait]
impl DuplicateIndex for Fake {
    async fn find_by_checksum(&self, _checksum: &str) -> Result<Option<DuplicateRecord>> {
        self.0.call("duplicate_check")?;
        Ok(self.0.duplicate.clone())
    }
}

#[async_trait]
impl ThumbnailGenerator for Fake {
    async fn generate(&self, path: &Path, _file_id: FileId) -> Result<Vec<PathBuf>> {
        self.0.call("thumbnails")?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        Ok((0..self.0.thumbnail_count)
            .map(|i| PathBuf::from(format!("/tmp/thumbs/{stem}_{i:02}.jpg")))
            .collect())
    }
}

#[async_trait]
impl Compressor for Fake {
    async fn compress(
        &self,
        path: &Path,
        _file_id: FileId,
        _settings: &CompressionConfig,
        on_progress: &(dyn Fn(EncodeProgress) + Send + Sync),
    ) -> Result<PathBuf> {
        self.0.call("compression")?;
        for fraction in [0.25, 0.5, 1.2] {
            on_progress(EncodeProgress {
                fraction,
                frames: Some((fraction * 300.0) as u64),
                fps: Some(120.0),
                speed: Some(4.0),
            });
        }
        if !self.0.compress_delay.is_zero() {
            tokio::time::sleep(self.0.compress_delay).await;
        }
        Ok(path.with_extension("proxy.mp4"))
    }
}

#[async_trait]
impl FocalLengthDetector for Fake {
    async fn detect(&self, _thumbnails: &[PathBuf]) -> Result<Option<f64>> {
        self.0.call("focal_length")?;
        Ok(Some(35.0))
    }
}

#[async_trait]
impl AiAnalyzer for Fake {
    async fn analyze(&self, _compressed: &Path) -> Result<MetadataMap> {
        self.0.call("ai_analysis")?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.calls.mark("ai_analysis:done");
        Ok(json!({"summary": "Boats in a harbour", "best_frame": 1})
            .as_object()
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ThumbnailSelector for Fake {
    async fn select(&self, analysis: &MetadataMap, thumbnails: &[PathBuf]) -> Result<Option<PathBuf>> {
        self.0.call("ai_thumbnail_selection")?;
        let index = analysis.get("best_frame").and_then(Value::as_u64).unwrap_or(0) as usize;
        Ok(thumbnails.get(index).cloned())
    }
}

#[async_trait]
impl RecordStore for Fake {
    async fn persist(&self, _record: &MediaRecord, _session: &Session) -> Result<RecordId> {
        self.0.call("persist")?;
        Ok(RecordId::generate())
    }
}

#[async_trait]
impl EmbeddingService for Fake {
    async fn embed(&self, text: &str, _session: &Session) -> Result<Vec<f32>> {
        self.0.call("embeddings")?;
        Ok(vec![text.len() as f32, 0.5, 0.25])
    }
}

#[async_trait]
impl ThumbnailUploader for Fake {
    async fn upload(
        &self,
        _record_id: Option<RecordId>,
        thumbnails: &[PathBuf],
        _session: &Session,
    ) -> Result<Vec<String>> {
        let result = self.0.call("upload_thumbnails");
        if self.0.track_in_flight {
            self.0.calls.leave();
        }
        result?;
        Ok(thumbnails
            .iter()
            .enumerate()
            .map(|(i, _)| format!("https://cdn.example/thumbs/{i}.jpg"))
            .collect())
    }
}
