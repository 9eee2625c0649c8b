//! Wiring: turns a [`Config`] and the discovered tools into the collaborators,
//! options and session the ingest flow runs with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rk_av::{
    ExifPass, ExifToolExtractor, FfmpegCompressor, FfmpegThumbnailer, FfprobeExtractor,
    FfprobeView, MediaInfoExtractor, Sha256Checksummer, ToolRegistry,
};
use rk_core::config::{CompressionConfig, Config};
use rk_core::FileId;
use rk_pipeline::collaborators::{
    AiAnalyzer, Compressor, EmbeddingService, Extractor, FocalLengthDetector, ThumbnailGenerator,
    ThumbnailSelector, ThumbnailUploader,
};
use rk_pipeline::{
    Collaborators, EncodeProgress, Extractors, FlowStep, MetadataMap, RunOptions, Session,
};

use crate::remote::{self, AiClient, EmbeddingsClient, UploadClient};
use crate::store::JsonRecordStore;

/// Stand-in for a collaborator whose external tool was not found. Every call
/// fails with a tool error so the step is recorded as failed, not skipped.
#[derive(Debug, Clone)]
struct MissingTool {
    tool: &'static str,
    label: String,
}

impl MissingTool {
    fn new(tool: &'static str, label: impl Into<String>) -> Self {
        Self {
            tool,
            label: label.into(),
        }
    }

    fn error(&self) -> rk_core::Error {
        rk_core::Error::tool(self.tool, format!("{} not found; is it installed and in PATH?", self.tool))
    }
}

#[async_trait]
impl Extractor for MissingTool {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(&self, _path: &Path) -> rk_core::Result<MetadataMap> {
        Err(self.error())
    }
}

#[async_trait]
impl ThumbnailGenerator for MissingTool {
    async fn generate(&self, _path: &Path, _file_id: FileId) -> rk_core::Result<Vec<PathBuf>> {
        Err(self.error())
    }
}

#[async_trait]
impl Compressor for MissingTool {
    async fn compress(
        &self,
        _path: &Path,
        _file_id: FileId,
        _settings: &CompressionConfig,
        _on_progress: &(dyn Fn(EncodeProgress) + Send + Sync),
    ) -> rk_core::Result<PathBuf> {
        Err(self.error())
    }
}

fn ffprobe_extractor(tools: &ToolRegistry, view: FfprobeView, label: &str) -> Arc<dyn Extractor> {
    match tools.require("ffprobe") {
        Ok(cfg) => Arc::new(FfprobeExtractor::new(cfg.command(), view)),
        Err(_) => Arc::new(MissingTool::new("ffprobe", label)),
    }
}

fn build_extractors(tools: &ToolRegistry) -> Extractors {
    let secondary: Arc<dyn Extractor> = match tools.require("mediainfo") {
        Ok(cfg) => Arc::new(MediaInfoExtractor::new(cfg.command())),
        Err(_) => Arc::new(MissingTool::new("mediainfo", "mediainfo")),
    };
    let (exif_basic, exif_extended): (Arc<dyn Extractor>, Arc<dyn Extractor>) =
        match tools.require("exiftool") {
            Ok(cfg) => (
                Arc::new(ExifToolExtractor::new(cfg.command(), ExifPass::Basic)),
                Arc::new(ExifToolExtractor::new(cfg.command(), ExifPass::Extended)),
            ),
            Err(_) => (
                Arc::new(MissingTool::new("exiftool", "exiftool")),
                Arc::new(MissingTool::new("exiftool", "exiftool:extended")),
            ),
        };

    Extractors {
        container: ffprobe_extractor(tools, FfprobeView::Container, "ffprobe:container"),
        secondary,
        exif_basic,
        exif_extended,
        codec: ffprobe_extractor(tools, FfprobeView::Codec, "ffprobe:codec"),
        hdr: ffprobe_extractor(tools, FfprobeView::Hdr, "ffprobe:hdr"),
        audio: ffprobe_extractor(tools, FfprobeView::Audio, "ffprobe:audio"),
        subtitles: ffprobe_extractor(tools, FfprobeView::Subtitles, "ffprobe:subtitles"),
    }
}

/// Build every collaborator the flow needs.
///
/// Missing tools become failing stand-ins; remote services without an
/// endpoint are left unset so their steps are skipped.
pub fn build_collaborators(config: &Config, tools: &ToolRegistry) -> rk_core::Result<Collaborators> {
    let ffprobe = tools.require("ffprobe").ok().map(|cfg| cfg.command());

    let (thumbnails, compressor): (Arc<dyn ThumbnailGenerator>, Arc<dyn Compressor>) =
        match tools.require("ffmpeg") {
            Ok(cfg) => (
                Arc::new(FfmpegThumbnailer::new(
                    cfg.command(),
                    ffprobe.clone(),
                    config.thumbnails.clone(),
                )),
                Arc::new(FfmpegCompressor::new(cfg.command(), ffprobe.clone())),
            ),
            Err(_) => (
                Arc::new(MissingTool::new("ffmpeg", "thumbnails")),
                Arc::new(MissingTool::new("ffmpeg", "compression")),
            ),
        };

    let store = Arc::new(JsonRecordStore::new(config.storage.store_dir.clone()));

    let needs_http = config.remote.ai_endpoint.is_some()
        || config.remote.embeddings_endpoint.is_some()
        || config.remote.upload_endpoint.is_some();
    let http = if needs_http {
        Some(remote::http_client(&config.remote)?)
    } else {
        None
    };

    let ai: Option<Arc<AiClient>> = match (&http, &config.remote.ai_endpoint) {
        (Some(http), Some(url)) => Some(Arc::new(AiClient::new(
            http.clone(),
            url.clone(),
            config.auth.api_token.clone(),
        ))),
        _ => None,
    };
    let embeddings: Option<Arc<dyn EmbeddingService>> =
        match (&http, &config.remote.embeddings_endpoint) {
            (Some(http), Some(url)) => Some(Arc::new(EmbeddingsClient::new(http.clone(), url.clone()))),
            _ => None,
        };
    let uploader: Option<Arc<dyn ThumbnailUploader>> = match (&http, &config.remote.upload_endpoint) {
        (Some(http), Some(url)) => Some(Arc::new(UploadClient::new(http.clone(), url.clone()))),
        _ => None,
    };

    Ok(Collaborators {
        checksummer: Arc::new(Sha256Checksummer),
        duplicates: store.clone(),
        extractors: build_extractors(tools),
        thumbnails,
        compressor,
        focal_length: ai.clone().map(|c| c as Arc<dyn FocalLengthDetector>),
        ai_analyzer: ai.clone().map(|c| c as Arc<dyn AiAnalyzer>),
        thumbnail_selector: ai.map(|c| c as Arc<dyn ThumbnailSelector>),
        store,
        embeddings,
        uploader,
    })
}

/// The session used by persist, embeddings and upload, if a token is set.
pub fn session(config: &Config) -> Option<Session> {
    config.auth.api_token.as_ref().map(|token| Session {
        user_id: user_id(config),
        token: token.clone(),
    })
}

/// Configured user, else the login name, else `local`.
pub fn user_id(config: &Config) -> String {
    config
        .auth
        .user_id
        .clone()
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "local".to_string())
}

/// Step toggles and flags given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub force_reprocess: bool,
}

/// Merge configured step toggles with command-line overrides.
///
/// Unknown step names are rejected so a typo cannot silently run a step the
/// caller meant to turn off.
pub fn run_options(config: &Config, overrides: &Overrides) -> rk_core::Result<RunOptions> {
    let mut options = RunOptions::default()
        .with_force_reprocess(config.pipeline.force_reprocess || overrides.force_reprocess);

    let configured = config.pipeline.steps.iter().map(|(name, on)| (name.as_str(), *on));
    let enabled = overrides.enable.iter().map(|name| (name.as_str(), true));
    let disabled = overrides.disable.iter().map(|name| (name.as_str(), false));

    for (name, on) in configured.chain(enabled).chain(disabled) {
        let step: FlowStep = name.parse()?;
        options = options.with_override(step.name(), on);
    }
    Ok(options)
}
