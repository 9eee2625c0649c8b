//! Dependency-aware flow orchestrator.
//!
//! One file runs through a fixed graph:
//!
//! 1. **Barrier 0**: `checksum`, then `duplicate_check`. A duplicate ends the
//!    flow unless reprocessing is forced.
//! 2. **Fan-out**: the eight extractors, `thumbnails` and `compression` start
//!    together, each on its own tokio task.
//! 3. **Joins**: `focal_length` waits on `thumbnails` and both EXIF tasks.
//!    `ai_analysis` waits on `compression`; `ai_thumbnail_selection` waits on
//!    `ai_analysis` and `thumbnails`.
//! 4. **Barrier 1**: every task above has finished.
//! 5. **Tail**: `consolidate_metadata`, `build_record`, `persist`,
//!    `embeddings`, `upload_thumbnails`, strictly in that order.
//!
//! Fan-out and join failures are recorded and the flow carries on with the
//! output missing. Barrier and tail failures end the flow as fatal.
//!
//! Tasks share results through [`Shared`] futures and never touch the
//! [`FlowContext`]; it is filled in after barrier 1 by the flow alone.

mod context;
mod tracker;

pub use context::{exif_focal_length, FlowContext};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use rk_core::config::{CompressionConfig, Config};
use rk_core::{BatchId, FileId};
use tokio_util::sync::CancellationToken;

use crate::catalog::FlowStep;
use crate::collaborators::{Collaborators, EncodeProgress, Extractor, MetadataMap, Session};
use crate::consolidate::consolidate;
use crate::progress::{NoopReporter, ProgressReporter, StepProgress};
use crate::record::MediaRecord;
use crate::run::{PipelineRun, RunOptions, SkipReason, StopReason};
use tracker::StepTracker;

/// Result of a spawned task, awaitable by any number of dependents.
type TaskHandle<T> = Shared<BoxFuture<'static, Option<T>>>;

/// Flow settings taken from configuration.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Time budget for any single step.
    pub task_timeout: Duration,
    pub compression: CompressionConfig,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            task_timeout: config.pipeline.task_timeout(),
            compression: config.compression.clone(),
        }
    }
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(3600),
            compression: CompressionConfig::default(),
        }
    }
}

/// One file to run through the flow.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub path: PathBuf,
    pub file_id: FileId,
    pub batch_id: Option<BatchId>,
    pub user_id: String,
    pub session: Option<Session>,
    pub options: Arc<RunOptions>,
    pub cancel: CancellationToken,
}

impl FlowRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_id: FileId::new(),
            batch_id: None,
            user_id: String::from("anonymous"),
            session: None,
            options: Arc::new(RunOptions::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: Arc<RunOptions>) -> Self {
        self.options = options;
        self
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Runs the ingest graph for single files.
pub struct FlowOrchestrator {
    collaborators: Collaborators,
    settings: FlowSettings,
    reporter: Arc<dyn ProgressReporter>,
}

impl FlowOrchestrator {
    pub fn new(collaborators: Collaborators, settings: FlowSettings) -> Self {
        Self {
            collaborators,
            settings,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Builder: attach a progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Run the whole graph for one file.
    pub async fn run(&self, request: FlowRequest) -> PipelineRun<FlowContext> {
        let FlowRequest {
            path,
            file_id,
            batch_id,
            user_id,
            session,
            options,
            cancel,
        } = request;

        let tracker = StepTracker::new(
            StepProgress::new(self.reporter.clone(), file_id),
            options,
            self.settings.task_timeout,
            cancel,
        );
        let mut ctx = FlowContext::new(path.clone(), file_id, batch_id);
        tracing::info!(file = %path.display(), %file_id, "Starting flow");

        // Barrier 0
        if let Err(stop) = self.duplicate_barrier(&tracker, &mut ctx).await {
            return self.finish(&tracker, ctx, Some(stop));
        }

        // Fan-out and joins
        let path: Arc<Path> = Arc::from(path.as_path());
        let ex = &self.collaborators.extractors;
        let container = spawn_extractor(&tracker, FlowStep::ContainerMetadata, &ex.container, &path);
        let secondary = spawn_extractor(&tracker, FlowStep::SecondaryMetadata, &ex.secondary, &path);
        let exif_basic = spawn_extractor(&tracker, FlowStep::ExifBasic, &ex.exif_basic, &path);
        let exif_extended = spawn_extractor(&tracker, FlowStep::ExifExtended, &ex.exif_extended, &path);
        let codec = spawn_extractor(&tracker, FlowStep::CodecParameters, &ex.codec, &path);
        let hdr = spawn_extractor(&tracker, FlowStep::HdrParameters, &ex.hdr, &path);
        let audio = spawn_extractor(&tracker, FlowStep::AudioTracks, &ex.audio, &path);
        let subtitles = spawn_extractor(&tracker, FlowStep::SubtitleTracks, &ex.subtitles, &path);
        let thumbnails = self.spawn_thumbnails(&tracker, &path, file_id);
        let compression = self.spawn_compression(&tracker, &path, file_id);

        let focal_length = self.spawn_focal_length(
            &tracker,
            thumbnails.clone(),
            exif_basic.clone(),
            exif_extended.clone(),
        );
        let ai_analysis = self.spawn_ai_analysis(&tracker, compression.clone());
        let ai_thumbnail = self.spawn_ai_thumbnail(&tracker, ai_analysis.clone(), thumbnails.clone());

        // Barrier 1
        let (
            container,
            secondary,
            exif_basic,
            exif_extended,
            codec,
            hdr,
            audio,
            subtitles,
            thumbnails,
            compression,
            focal_length,
            ai_analysis,
            ai_thumbnail,
        ) = tokio::join!(
            container,
            secondary,
            exif_basic,
            exif_extended,
            codec,
            hdr,
            audio,
            subtitles,
            thumbnails,
            compression,
            focal_length,
            ai_analysis,
            ai_thumbnail
        );

        ctx.container_metadata = container;
        ctx.secondary_metadata = secondary;
        ctx.exif_basic = exif_basic;
        ctx.exif_extended = exif_extended;
        ctx.codec_parameters = codec;
        ctx.hdr_parameters = hdr;
        ctx.audio_tracks = audio;
        ctx.subtitle_tracks = subtitles;
        ctx.thumbnails = thumbnails;
        ctx.compressed_path = compression;
        ctx.focal_length = focal_length;
        ctx.ai_analysis = ai_analysis;
        ctx.ai_thumbnail = ai_thumbnail;

        if tracker.is_cancelled() {
            tracker.record_error("flow", rk_core::Error::Cancelled);
            return self.finish(&tracker, ctx, Some(StopReason::FatalError));
        }

        // Tail
        let stop = self
            .tail(&tracker, &mut ctx, &user_id, session.as_ref())
            .await
            .err();
        self.finish(&tracker, ctx, stop)
    }

    /// `Err` carries the reason the flow must end here.
    async fn duplicate_barrier(
        &self,
        tracker: &StepTracker,
        ctx: &mut FlowContext,
    ) -> Result<(), StopReason> {
        if !tracker.gate(FlowStep::Checksum) {
            tracker.skip(
                FlowStep::DuplicateCheck,
                SkipReason::MissingInput(FlowStep::Checksum.name().into()),
            );
            return Ok(());
        }

        let checksum = tracker
            .execute(FlowStep::Checksum, self.collaborators.checksummer.checksum(&ctx.file_path))
            .await
            .map_err(|e| fatal(tracker, FlowStep::Checksum, e))?;
        ctx.checksum = Some(checksum.clone());

        if !tracker.gate(FlowStep::DuplicateCheck) {
            return Ok(());
        }

        let duplicate = tracker
            .execute(
                FlowStep::DuplicateCheck,
                self.collaborators.duplicates.find_by_checksum(&checksum),
            )
            .await
            .map_err(|e| fatal(tracker, FlowStep::DuplicateCheck, e))?;

        if let Some(existing) = duplicate {
            tracing::info!(
                file = %ctx.file_path.display(),
                record_id = %existing.record_id,
                "Duplicate of {}",
                existing.file_path.display()
            );
            ctx.duplicate = Some(existing);
            if !tracker.force_reprocess() {
                return Err(StopReason::DuplicateDetected);
            }
            tracing::info!(file = %ctx.file_path.display(), "Reprocessing duplicate");
        }
        Ok(())
    }

    fn spawn_thumbnails(
        &self,
        tracker: &StepTracker,
        path: &Arc<Path>,
        file_id: FileId,
    ) -> TaskHandle<Vec<PathBuf>> {
        let step = FlowStep::Thumbnails;
        let generator = self.collaborators.thumbnails.clone();
        let path = path.clone();
        let t = tracker.clone();
        spawn_task(tracker, step, async move {
            if !t.gate(step) {
                return None;
            }
            t.attempt(step, generator.generate(&path, file_id)).await
        })
    }

    fn spawn_compression(
        &self,
        tracker: &StepTracker,
        path: &Arc<Path>,
        file_id: FileId,
    ) -> TaskHandle<PathBuf> {
        let step = FlowStep::Compression;
        let compressor = self.collaborators.compressor.clone();
        let settings = self.settings.compression.clone();
        let path = path.clone();
        let t = tracker.clone();
        spawn_task(tracker, step, async move {
            if !t.gate(step) {
                return None;
            }
            let progress = t.progress().clone();
            let on_progress = move |p: EncodeProgress| {
                progress.processing(step.name(), p.percent(), Some(p.sub_progress()));
            };
            t.attempt(step, compressor.compress(&path, file_id, &settings, &on_progress))
                .await
        })
    }

    fn spawn_focal_length(
        &self,
        tracker: &StepTracker,
        thumbnails: TaskHandle<Vec<PathBuf>>,
        exif_basic: TaskHandle<MetadataMap>,
        exif_extended: TaskHandle<MetadataMap>,
    ) -> TaskHandle<f64> {
        let step = FlowStep::FocalLength;
        let detector = self.collaborators.focal_length.clone();
        let t = tracker.clone();
        spawn_task(tracker, step, async move {
            if !t.gate(step) {
                return None;
            }
            let (thumbnails, basic, extended) = tokio::join!(thumbnails, exif_basic, exif_extended);

            if exif_focal_length(basic.as_ref(), extended.as_ref()).is_some() {
                t.skip(step, SkipReason::AlreadySatisfied);
                return None;
            }
            let Some(thumbnails) = thumbnails.filter(|paths| !paths.is_empty()) else {
                t.skip(step, SkipReason::MissingInput(FlowStep::Thumbnails.name().into()));
                return None;
            };
            let Some(detector) = detector else {
                t.skip(step, SkipReason::Unconfigured);
                return None;
            };
            t.attempt(step, detector.detect(&thumbnails)).await.flatten()
        })
    }

    fn spawn_ai_analysis(
        &self,
        tracker: &StepTracker,
        compression: TaskHandle<PathBuf>,
    ) -> TaskHandle<MetadataMap> {
        let step = FlowStep::AiAnalysis;
        let analyzer = self.collaborators.ai_analyzer.clone();
        let t = tracker.clone();
        spawn_task(tracker, step, async move {
            if !t.gate(step) {
                return None;
            }
            let Some(compressed) = compression.await else {
                t.skip(step, SkipReason::MissingInput(FlowStep::Compression.name().into()));
                return None;
            };
            let Some(analyzer) = analyzer else {
                t.skip(step, SkipReason::Unconfigured);
                return None;
            };
            t.attempt(step, analyzer.analyze(&compressed)).await
        })
    }

    fn spawn_ai_thumbnail(
        &self,
        tracker: &StepTracker,
        ai_analysis: TaskHandle<MetadataMap>,
        thumbnails: TaskHandle<Vec<PathBuf>>,
    ) -> TaskHandle<PathBuf> {
        let step = FlowStep::AiThumbnailSelection;
        let selector = self.collaborators.thumbnail_selector.clone();
        let t = tracker.clone();
        spawn_task(tracker, step, async move {
            if !t.gate(step) {
                return None;
            }
            let Some(analysis) = ai_analysis.await else {
                t.skip(step, SkipReason::MissingInput(FlowStep::AiAnalysis.name().into()));
                return None;
            };
            let Some(thumbnails) = thumbnails.await.filter(|paths| !paths.is_empty()) else {
                t.skip(step, SkipReason::MissingInput(FlowStep::Thumbnails.name().into()));
                return None;
            };
            let Some(selector) = selector else {
                t.skip(step, SkipReason::Unconfigured);
                return None;
            };
            t.attempt(step, selector.select(&analysis, &thumbnails))
                .await
                .flatten()
        })
    }

    /// The ordered tail; `Err` means a fatal failure was recorded.
    async fn tail(
        &self,
        tracker: &StepTracker,
        ctx: &mut FlowContext,
        user_id: &str,
        session: Option<&Session>,
    ) -> Result<(), StopReason> {
        let c = &self.collaborators;

        let step = FlowStep::ConsolidateMetadata;
        if tracker.gate(step) {
            let reports = ctx.source_reports();
            let metadata = tracker
                .execute(step, async { Ok::<_, rk_core::Error>(consolidate(&reports)) })
                .await
                .map_err(|e| fatal(tracker, step, e))?;
            ctx.metadata = Some(metadata);
        }

        let step = FlowStep::BuildRecord;
        if tracker.gate(step) {
            let errors = tracker.error_messages();
            let record = tracker
                .execute(step, async { Ok::<_, rk_core::Error>(MediaRecord::build(ctx, user_id, errors)) })
                .await
                .map_err(|e| fatal(tracker, step, e))?;
            ctx.record = Some(record);
        }

        let step = FlowStep::Persist;
        if tracker.gate(step) {
            if let Some((session, record)) = require(tracker, step, session, ctx.record.as_ref(), FlowStep::BuildRecord) {
                let id = tracker
                    .execute(step, c.store.persist(record, session))
                    .await
                    .map_err(|e| fatal(tracker, step, e))?;
                tracing::info!(file = %ctx.file_path.display(), record_id = %id, "Persisted record");
                ctx.record_id = Some(id);
            }
        }

        let step = FlowStep::Embeddings;
        if tracker.gate(step) {
            if let Some((session, record)) = require(tracker, step, session, ctx.record.as_ref(), FlowStep::BuildRecord) {
                if let Some(service) = configured(tracker, step, c.embeddings.as_ref()) {
                    let text = record.embedding_text();
                    let embedding = tracker
                        .execute(step, service.embed(&text, session))
                        .await
                        .map_err(|e| fatal(tracker, step, e))?;
                    ctx.embedding = Some(embedding);
                }
            }
        }

        let step = FlowStep::UploadThumbnails;
        if tracker.gate(step) {
            let thumbnails = ctx.thumbnails.as_ref().filter(|paths| !paths.is_empty());
            if let Some((session, thumbnails)) = require(tracker, step, session, thumbnails, FlowStep::Thumbnails) {
                if let Some(uploader) = configured(tracker, step, c.uploader.as_ref()) {
                    let urls = tracker
                        .execute(step, uploader.upload(ctx.record_id, thumbnails, session))
                        .await
                        .map_err(|e| fatal(tracker, step, e))?;
                    ctx.thumbnail_urls = Some(urls);
                }
            }
        }

        Ok(())
    }

    fn finish(
        &self,
        tracker: &StepTracker,
        ctx: FlowContext,
        stop: Option<StopReason>,
    ) -> PipelineRun<FlowContext> {
        let run = tracker.finish(ctx, stop);
        tracing::info!(
            file = %run.context.file_path.display(),
            file_id = %run.context.file_id,
            stop_reason = ?run.stop_reason,
            errors = run.step_errors.len(),
            skipped = run.skipped.len(),
            "Flow finished"
        );
        run
    }
}

/// Record `error` as the fatal failure of `step`.
fn fatal(tracker: &StepTracker, step: FlowStep, error: rk_core::Error) -> StopReason {
    tracing::error!(step = step.name(), error = %error, "Fatal step failure");
    tracker.record_error(step.name(), error);
    StopReason::FatalError
}

/// A session and an upstream input, or the skip reason for their absence.
fn require<'a, T: ?Sized>(
    tracker: &StepTracker,
    step: FlowStep,
    session: Option<&'a Session>,
    input: Option<&'a T>,
    upstream: FlowStep,
) -> Option<(&'a Session, &'a T)> {
    let Some(session) = session else {
        tracker.skip(step, SkipReason::Unauthenticated);
        return None;
    };
    let Some(input) = input else {
        tracker.skip(step, SkipReason::MissingInput(upstream.name().into()));
        return None;
    };
    Some((session, input))
}

fn configured<'a, T: ?Sized>(
    tracker: &StepTracker,
    step: FlowStep,
    collaborator: Option<&'a Arc<T>>,
) -> Option<&'a Arc<T>> {
    if collaborator.is_none() {
        tracker.skip(step, SkipReason::Unconfigured);
    }
    collaborator
}

fn spawn_extractor(
    tracker: &StepTracker,
    step: FlowStep,
    extractor: &Arc<dyn Extractor>,
    path: &Arc<Path>,
) -> TaskHandle<MetadataMap> {
    let extractor = extractor.clone();
    let path = path.clone();
    let t = tracker.clone();
    spawn_task(tracker, step, async move {
        if !t.gate(step) {
            return None;
        }
        tracing::trace!(step = step.name(), extractor = extractor.name(), "Extracting");
        t.attempt(step, extractor.extract(&path)).await
    })
}

/// Spawn `fut` on the runtime and share its output. A panic inside the task
/// is recorded as a failure of `step`.
fn spawn_task<T, F>(tracker: &StepTracker, step: FlowStep, fut: F) -> TaskHandle<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Option<T>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    let tracker = tracker.clone();
    async move {
        match handle.await {
            Ok(output) => output,
            Err(e) => {
                tracker.progress().failed(step.name());
                tracker.record_error(
                    step.name(),
                    rk_core::Error::pipeline(step.name(), format!("task panicked: {e}")),
                );
                None
            }
        }
    }
    .boxed()
    .shared()
}
