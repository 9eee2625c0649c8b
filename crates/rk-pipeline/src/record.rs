//! The media record assembled at the end of a flow.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rk_core::{BatchId, FileId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::MetadataMap;
use crate::consolidate::{ConsolidatedMetadata, MetadataField};
use crate::flow::FlowContext;

/// AI analysis keys folded into the embedding text, in order.
const ANALYSIS_TEXT_KEYS: &[&str] = &["title", "summary", "description", "tags", "objects", "scene"];

/// Camera and technical fields folded into the embedding text, in order.
const METADATA_TEXT_FIELDS: &[MetadataField] = &[
    MetadataField::Make,
    MetadataField::Model,
    MetadataField::LensModel,
    MetadataField::CreationDate,
    MetadataField::Codec,
    MetadataField::HdrFormat,
];

/// Everything known about one ingested file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub file_id: FileId,
    pub batch_id: Option<BatchId>,
    pub user_id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub metadata: ConsolidatedMetadata,
    #[serde(default)]
    pub audio_tracks: Vec<Value>,
    #[serde(default)]
    pub subtitle_tracks: Vec<Value>,
    pub compressed_path: Option<PathBuf>,
    #[serde(default)]
    pub thumbnails: Vec<PathBuf>,
    pub ai_analysis: Option<MetadataMap>,
    pub ai_thumbnail: Option<PathBuf>,
    /// Tolerated step failures, keyed by step name.
    #[serde(default)]
    pub step_errors: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    /// Assemble a record from a finished flow context.
    pub fn build(ctx: &FlowContext, user_id: &str, step_errors: BTreeMap<String, String>) -> Self {
        let file_name = ctx
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ctx.file_path.display().to_string());

        Self {
            file_id: ctx.file_id,
            batch_id: ctx.batch_id,
            user_id: user_id.to_string(),
            file_path: ctx.file_path.clone(),
            file_name,
            file_size: std::fs::metadata(&ctx.file_path).ok().map(|m| m.len()),
            checksum: ctx.checksum.clone(),
            metadata: ctx.metadata.clone().unwrap_or_default(),
            audio_tracks: track_list(ctx.audio_tracks.as_ref(), "audio_tracks"),
            subtitle_tracks: track_list(ctx.subtitle_tracks.as_ref(), "subtitle_tracks"),
            compressed_path: ctx.compressed_path.clone(),
            thumbnails: ctx.thumbnails.clone().unwrap_or_default(),
            ai_analysis: ctx.ai_analysis.clone(),
            ai_thumbnail: ctx.ai_thumbnail.clone(),
            step_errors,
            created_at: Utc::now(),
        }
    }

    /// Text handed to the embedding service.
    ///
    /// One `key: value` line per known attribute, starting with the file
    /// name; absent attributes are left out.
    pub fn embedding_text(&self) -> String {
        let mut lines = vec![format!("file: {}", self.file_name)];

        for &field in METADATA_TEXT_FIELDS {
            if let Some(value) = self.metadata.get(field) {
                lines.push(format!("{}: {}", field.name(), render(value)));
            }
        }

        if let Some(analysis) = &self.ai_analysis {
            for key in ANALYSIS_TEXT_KEYS {
                if let Some(value) = analysis.get(*key).filter(|v| !v.is_null()) {
                    lines.push(format!("{key}: {}", render(value)));
                }
            }
        }

        lines.join("\n")
    }
}

/// Track extractors return `{"<key>": [...]}`; fall back to an empty list.
fn track_list(map: Option<&MetadataMap>, key: &str) -> Vec<Value> {
    map.and_then(|m| m.get(key))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
