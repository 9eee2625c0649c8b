//! Integration tests for the ingest flow against fake collaborators.

mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{session, Harness, RecordingReporter};
use rk_core::{ProgressStatus, SubProgress};
use rk_pipeline::{
    FlowOrchestrator, FlowRequest, FlowSettings, FlowStep, MetadataField, MetadataSource,
    RunOptions, SkipReason, StopReason,
};
use tokio_util::sync::CancellationToken;

const FAN_OUT: [&str; 10] = [
    "container_metadata",
    "secondary_metadata",
    "exif_basic",
    "exif_extended",
    "codec_parameters",
    "hdr_parameters",
    "audio_tracks",
    "subtitle_tracks",
    "thumbnails",
    "compression",
];

fn orchestrator(harness: &Harness) -> FlowOrchestrator {
    FlowOrchestrator::new(harness.collaborators(), FlowSettings::default())
}

fn request(options: RunOptions) -> FlowRequest {
    FlowRequest::new("/ingest/A001_C002.mov")
        .with_options(Arc::new(options))
        .with_session(Some(session()))
        .with_user("editor")
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_fills_every_output() {
    let harness = Harness::new();
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert!(!run.stopped, "errors: {:?}", run.step_errors);
    assert_eq!(run.stop_reason, StopReason::None);
    assert!(run.step_errors.is_empty());

    let ctx = &run.context;
    assert_eq!(ctx.checksum.as_deref(), Some(common::FAKE_CHECKSUM));
    assert!(ctx.duplicate.is_none());
    assert!(ctx.container_metadata.is_some());
    assert_eq!(ctx.thumbnails.as_ref().map(Vec::len), Some(3));
    assert_eq!(ctx.compressed_path, Some(PathBuf::from("/ingest/A001_C002.proxy.mp4")));
    assert_eq!(ctx.focal_length, Some(35.0));
    assert_eq!(ctx.ai_thumbnail, Some(PathBuf::from("/tmp/thumbs/A001_C002_01.jpg")));
    assert!(ctx.record_id.is_some());
    assert_eq!(ctx.embedding.as_ref().map(Vec::len), Some(3));
    assert_eq!(ctx.thumbnail_urls.as_ref().map(Vec::len), Some(3));

    let metadata = ctx.metadata.as_ref().unwrap();
    assert_eq!(metadata.get_str(MetadataField::Make), Some("Canon"));
    assert_eq!(metadata.get_str(MetadataField::ContainerFormat), Some("mov"));
    assert_eq!(
        metadata.source_of(MetadataField::FocalLength),
        Some(MetadataSource::FocalLengthAi)
    );

    let record = ctx.record.as_ref().unwrap();
    assert_eq!(record.user_id, "editor");
    assert_eq!(record.audio_tracks.len(), 1);

    for step in FlowStep::ALL {
        assert!(
            run.completed.iter().any(|c| c == step.name()),
            "{step} did not complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Duplicate barrier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_short_circuits_before_fan_out() {
    let harness = Harness::new().with_duplicate();
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert!(run.stopped);
    assert_eq!(run.stop_reason, StopReason::DuplicateDetected);
    assert!(run.is_success());
    assert!(run.context.duplicate.is_some());
    assert!(run.context.record.is_none());

    assert_eq!(harness.calls.count("checksum"), 1);
    assert_eq!(harness.calls.count("duplicate_check"), 1);
    assert_eq!(harness.calls.total(), 2);
}

#[tokio::test]
async fn force_reprocess_runs_past_duplicate() {
    let harness = Harness::new().with_duplicate();
    let options = RunOptions::default().with_force_reprocess(true);
    let run = orchestrator(&harness).run(request(options)).await;

    assert!(!run.stopped);
    assert!(run.context.duplicate.is_some());
    assert!(run.context.record_id.is_some());
    for step in FAN_OUT {
        assert_eq!(harness.calls.count(step), 1, "{step}");
    }
    assert_eq!(harness.calls.count("upload_thumbnails"), 1);
}

#[tokio::test]
async fn disabling_checksum_disables_duplicate_check() {
    let harness = Harness::new().with_duplicate();
    let options = RunOptions::default().with_override("checksum", false);
    let run = orchestrator(&harness).run(request(options)).await;

    assert!(!run.stopped);
    assert_eq!(harness.calls.count("checksum"), 0);
    assert_eq!(harness.calls.count("duplicate_check"), 0);
    assert_eq!(run.skip_reason("checksum"), Some(&SkipReason::Disabled));
    assert_eq!(
        run.skip_reason("duplicate_check"),
        Some(&SkipReason::MissingInput("checksum".into()))
    );
    assert!(run.context.record.is_some());
}

#[tokio::test]
async fn checksum_failure_is_fatal() {
    let harness = Harness::new().failing("checksum");
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert_eq!(run.stop_reason, StopReason::FatalError);
    assert!(run.step_errors.contains_key("checksum"));
    assert_eq!(harness.calls.count("container_metadata"), 0);
    assert_eq!(harness.calls.count("duplicate_check"), 0);
}

// ---------------------------------------------------------------------------
// Toggles and degradation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_steps_are_never_invoked() {
    let harness = Harness::new();
    let options = RunOptions::default()
        .with_override("compression", false)
        .with_override("exif_basic", false)
        .with_override("embeddings", false);
    let run = orchestrator(&harness).run(request(options)).await;

    assert_eq!(harness.calls.count("compression"), 0);
    assert_eq!(harness.calls.count("exif_basic"), 0);
    assert_eq!(harness.calls.count("embeddings"), 0);
    assert_eq!(harness.calls.count("ai_analysis"), 0);
    assert_eq!(harness.calls.count("ai_thumbnail_selection"), 0);

    assert!(run.context.compressed_path.is_none());
    assert!(run.context.exif_basic.is_none());
    assert!(run.context.embedding.is_none());
    assert_eq!(run.skip_reason("compression"), Some(&SkipReason::Disabled));
    assert_eq!(
        run.skip_reason("ai_analysis"),
        Some(&SkipReason::MissingInput("compression".into()))
    );
    assert_eq!(
        run.skip_reason("ai_thumbnail_selection"),
        Some(&SkipReason::MissingInput("ai_analysis".into()))
    );
    assert_eq!(run.stop_reason, StopReason::None);
}

#[tokio::test]
async fn hdr_failure_still_produces_record() {
    let harness = Harness::new().failing("hdr_parameters");
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert_eq!(run.stop_reason, StopReason::None);
    assert!(run.step_errors.contains_key("hdr_parameters"));
    assert!(run.context.hdr_parameters.is_none());

    let record = run.context.record.as_ref().unwrap();
    assert!(record.step_errors.contains_key("hdr_parameters"));
    assert!(run.context.record_id.is_some());
}

#[tokio::test]
async fn extractor_panic_is_contained() {
    let harness = Harness::new().panicking("codec_parameters");
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert_eq!(run.stop_reason, StopReason::None);
    let err = run.step_errors.get("codec_parameters").unwrap();
    assert!(err.to_string().contains("panicked"), "{err}");
    assert!(run.context.codec_parameters.is_none());
    assert!(run.context.record_id.is_some());
}

#[tokio::test]
async fn exif_focal_length_satisfies_join() {
    let mut harness = Harness::new();
    harness.exif_focal_length = Some(50.0);
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert_eq!(harness.calls.count("focal_length"), 0);
    assert_eq!(run.skip_reason("focal_length"), Some(&SkipReason::AlreadySatisfied));
    let metadata = run.context.metadata.as_ref().unwrap();
    assert_eq!(metadata.get_f64(MetadataField::FocalLength), Some(50.0));
    assert_eq!(
        metadata.source_of(MetadataField::FocalLength),
        Some(MetadataSource::ExifBasic)
    );
}

#[tokio::test]
async fn missing_thumbnails_degrade_dependents() {
    let harness = Harness::new().failing("thumbnails");
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    let missing = Some(SkipReason::MissingInput("thumbnails".into()));
    assert_eq!(run.skip_reason("focal_length").cloned(), missing);
    assert_eq!(run.skip_reason("ai_thumbnail_selection").cloned(), missing);
    assert_eq!(run.skip_reason("upload_thumbnails").cloned(), missing);
    assert_eq!(harness.calls.count("ai_analysis"), 1);
    assert_eq!(run.stop_reason, StopReason::None);
}

#[tokio::test]
async fn no_session_skips_shared_storage_steps() {
    let harness = Harness::new();
    let request = request(RunOptions::default()).with_session(None);
    let run = orchestrator(&harness).run(request).await;

    for step in ["persist", "embeddings", "upload_thumbnails"] {
        assert_eq!(run.skip_reason(step), Some(&SkipReason::Unauthenticated), "{step}");
        assert_eq!(harness.calls.count(step), 0, "{step}");
    }
    assert!(run.context.record.is_some());
    assert_eq!(run.stop_reason, StopReason::None);
}

#[tokio::test]
async fn unconfigured_collaborators_are_skipped() {
    let harness = Harness::new();
    let mut collaborators = harness.collaborators();
    collaborators.ai_analyzer = None;
    collaborators.embeddings = None;
    let run = FlowOrchestrator::new(collaborators, FlowSettings::default())
        .run(request(RunOptions::default()))
        .await;

    assert_eq!(run.skip_reason("ai_analysis"), Some(&SkipReason::Unconfigured));
    assert_eq!(run.skip_reason("embeddings"), Some(&SkipReason::Unconfigured));
    assert_eq!(
        run.skip_reason("ai_thumbnail_selection"),
        Some(&SkipReason::MissingInput("ai_analysis".into()))
    );
    assert!(run.context.thumbnail_urls.is_some());
}

// ---------------------------------------------------------------------------
// Tail
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tail_failure_is_fatal_and_stops_tail() {
    let harness = Harness::new().failing("persist");
    let run = orchestrator(&harness).run(request(RunOptions::default())).await;

    assert!(run.stopped);
    assert_eq!(run.stop_reason, StopReason::FatalError);
    assert!(run.step_errors.contains_key("persist"));
    assert!(run.context.record.is_some());
    assert_eq!(harness.calls.count("embeddings"), 0);
    assert_eq!(harness.calls.count("upload_thumbnails"), 0);
}

#[tokio::test]
async fn ai_selection_runs_after_analysis_completes() {
    let harness = Harness::new();
    orchestrator(&harness).run(request(RunOptions::default())).await;

    let done = harness.calls.position("ai_analysis:done").unwrap();
    let select = harness.calls.position("ai_thumbnail_selection").unwrap();
    assert!(done < select, "order: {:?}", harness.calls.order());

    let persist = harness.calls.position("persist").unwrap();
    let embed = harness.calls.position("embeddings").unwrap();
    let upload = harness.calls.position("upload_thumbnails").unwrap();
    assert!(select < persist && persist < embed && embed < upload);
}

// ---------------------------------------------------------------------------
// Hardening
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_step_times_out() {
    let mut harness = Harness::new();
    harness.compress_delay = Duration::from_secs(5);
    let settings = FlowSettings {
        task_timeout: Duration::from_millis(100),
        ..FlowSettings::default()
    };
    let run = FlowOrchestrator::new(harness.collaborators(), settings)
        .run(request(RunOptions::default()))
        .await;

    assert!(matches!(
        run.step_errors.get("compression"),
        Some(rk_core::Error::Timeout { .. })
    ));
    assert!(run.context.compressed_path.is_none());
    assert!(run.context.record.is_some());
}

#[tokio::test]
async fn cancelled_flow_is_fatal() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = orchestrator(&harness)
        .run(request(RunOptions::default()).with_cancellation(cancel))
        .await;

    assert_eq!(run.stop_reason, StopReason::FatalError);
    assert!(matches!(
        run.step_errors.get("checksum"),
        Some(rk_core::Error::Cancelled)
    ));
    assert_eq!(harness.calls.total(), 0);
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_invoked_step_reports_start_and_one_terminal_event() {
    let harness = Harness::new().failing("hdr_parameters");
    let reporter = Arc::new(RecordingReporter::default());
    let orchestrator = orchestrator(&harness).with_reporter(reporter.clone());
    let req = request(RunOptions::default());
    let file_id = req.file_id;
    orchestrator.run(req).await;

    let events = reporter.events.lock();
    assert!(events.iter().all(|e| e.file_id == file_id));

    let mut by_step: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for event in events.iter() {
        by_step.entry(event.step_name.as_str()).or_default().push(event);
    }
    assert_eq!(by_step.len(), FlowStep::ALL.len());

    for (step, events) in &by_step {
        let first = events.first().unwrap();
        assert_eq!(first.status, ProgressStatus::Processing, "{step}");
        assert_eq!(first.percent, 0.0, "{step}");
        let terminal = events.iter().filter(|e| e.status.is_terminal()).count();
        assert_eq!(terminal, 1, "{step}");
        assert!(events.last().unwrap().status.is_terminal(), "{step}");
    }

    assert_eq!(by_step["hdr_parameters"].last().unwrap().status, ProgressStatus::Failed);

    let compression = &by_step["compression"];
    let sub: Vec<_> = compression
        .iter()
        .filter(|e| e.sub_progress.is_some())
        .collect();
    assert_eq!(sub.len(), 3);
    assert!(sub.iter().all(|e| e.percent <= 99.0));
    assert_eq!(sub[0].percent, 25.0);
    assert_eq!(
        sub[0].sub_progress,
        Some(SubProgress {
            frames: Some(75),
            fps: Some(120.0),
            speed: Some(4.0),
        })
    );
}
