use std::path::PathBuf;

use rk_core::{BatchId, FileId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::collaborators::{DuplicateRecord, MetadataMap};
use crate::consolidate::{as_number, ConsolidatedMetadata, MetadataField, MetadataSource, SourceReport};
use crate::record::MediaRecord;

/// Typed state of one file's flow. A field stays `None` when its step was
/// disabled, skipped or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub file_path: PathBuf,
    pub file_id: FileId,
    pub batch_id: Option<BatchId>,

    pub checksum: Option<String>,
    pub duplicate: Option<DuplicateRecord>,

    pub container_metadata: Option<MetadataMap>,
    pub secondary_metadata: Option<MetadataMap>,
    pub exif_basic: Option<MetadataMap>,
    pub exif_extended: Option<MetadataMap>,
    pub codec_parameters: Option<MetadataMap>,
    pub hdr_parameters: Option<MetadataMap>,
    pub audio_tracks: Option<MetadataMap>,
    pub subtitle_tracks: Option<MetadataMap>,
    pub thumbnails: Option<Vec<PathBuf>>,
    pub compressed_path: Option<PathBuf>,

    pub focal_length: Option<f64>,
    pub ai_analysis: Option<MetadataMap>,
    pub ai_thumbnail: Option<PathBuf>,

    pub metadata: Option<ConsolidatedMetadata>,
    pub record: Option<MediaRecord>,
    pub record_id: Option<RecordId>,
    pub embedding: Option<Vec<f32>>,
    pub thumbnail_urls: Option<Vec<String>>,
}

impl FlowContext {
    pub fn new(file_path: PathBuf, file_id: FileId, batch_id: Option<BatchId>) -> Self {
        Self {
            file_path,
            file_id,
            batch_id,
            checksum: None,
            duplicate: None,
            container_metadata: None,
            secondary_metadata: None,
            exif_basic: None,
            exif_extended: None,
            codec_parameters: None,
            hdr_parameters: None,
            audio_tracks: None,
            subtitle_tracks: None,
            thumbnails: None,
            compressed_path: None,
            focal_length: None,
            ai_analysis: None,
            ai_thumbnail: None,
            metadata: None,
            record: None,
            record_id: None,
            embedding: None,
            thumbnail_urls: None,
        }
    }

    /// Consolidation inputs from every metadata source that produced output.
    pub fn source_reports(&self) -> Vec<SourceReport> {
        let mut reports: Vec<SourceReport> = [
            (MetadataSource::ContainerMetadata, &self.container_metadata),
            (MetadataSource::SecondaryMetadata, &self.secondary_metadata),
            (MetadataSource::ExifBasic, &self.exif_basic),
            (MetadataSource::ExifExtended, &self.exif_extended),
            (MetadataSource::CodecParameters, &self.codec_parameters),
            (MetadataSource::HdrParameters, &self.hdr_parameters),
        ]
        .into_iter()
        .filter_map(|(source, fields)| {
            fields
                .as_ref()
                .map(|fields| SourceReport::new(source, fields.clone()))
        })
        .collect();

        if let Some(focal) = self.focal_length {
            let mut fields = MetadataMap::new();
            fields.insert(MetadataField::FocalLength.name().into(), json!(focal));
            reports.push(SourceReport::new(MetadataSource::FocalLengthAi, fields));
        }

        reports
    }
}

/// A usable focal length from either EXIF source, extended first.
pub fn exif_focal_length(basic: Option<&MetadataMap>, extended: Option<&MetadataMap>) -> Option<f64> {
    let field = MetadataField::FocalLength;
    [extended, basic]
        .into_iter()
        .flatten()
        .filter_map(|fields| fields.get(field.name()))
        .find(|value| field.accepts(value))
        .and_then(as_number)
}
