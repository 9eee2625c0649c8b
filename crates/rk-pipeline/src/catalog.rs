//! The fixed catalog of steps run by the ingest flow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::run::RunOptions;
use crate::step::StepDescriptor;

/// One step of the ingest flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Checksum,
    DuplicateCheck,
    ContainerMetadata,
    SecondaryMetadata,
    ExifBasic,
    ExifExtended,
    CodecParameters,
    HdrParameters,
    AudioTracks,
    SubtitleTracks,
    Thumbnails,
    Compression,
    FocalLength,
    AiAnalysis,
    AiThumbnailSelection,
    ConsolidateMetadata,
    BuildRecord,
    Persist,
    Embeddings,
    UploadThumbnails,
}

impl FlowStep {
    /// Every step in dependency order.
    pub const ALL: [FlowStep; 20] = [
        Self::Checksum,
        Self::DuplicateCheck,
        Self::ContainerMetadata,
        Self::SecondaryMetadata,
        Self::ExifBasic,
        Self::ExifExtended,
        Self::CodecParameters,
        Self::HdrParameters,
        Self::AudioTracks,
        Self::SubtitleTracks,
        Self::Thumbnails,
        Self::Compression,
        Self::FocalLength,
        Self::AiAnalysis,
        Self::AiThumbnailSelection,
        Self::ConsolidateMetadata,
        Self::BuildRecord,
        Self::Persist,
        Self::Embeddings,
        Self::UploadThumbnails,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Checksum => "checksum",
            Self::DuplicateCheck => "duplicate_check",
            Self::ContainerMetadata => "container_metadata",
            Self::SecondaryMetadata => "secondary_metadata",
            Self::ExifBasic => "exif_basic",
            Self::ExifExtended => "exif_extended",
            Self::CodecParameters => "codec_parameters",
            Self::HdrParameters => "hdr_parameters",
            Self::AudioTracks => "audio_tracks",
            Self::SubtitleTracks => "subtitle_tracks",
            Self::Thumbnails => "thumbnails",
            Self::Compression => "compression",
            Self::FocalLength => "focal_length",
            Self::AiAnalysis => "ai_analysis",
            Self::AiThumbnailSelection => "ai_thumbnail_selection",
            Self::ConsolidateMetadata => "consolidate_metadata",
            Self::BuildRecord => "build_record",
            Self::Persist => "persist",
            Self::Embeddings => "embeddings",
            Self::UploadThumbnails => "upload_thumbnails",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Checksum => "SHA-256 of the file contents",
            Self::DuplicateCheck => "Look up the checksum among ingested records",
            Self::ContainerMetadata => "Container and stream summary via ffprobe",
            Self::SecondaryMetadata => "Second-opinion container metadata via mediainfo",
            Self::ExifBasic => "Camera tags via exiftool",
            Self::ExifExtended => "All embedded tag groups via exiftool",
            Self::CodecParameters => "Video codec, profile and pixel format",
            Self::HdrParameters => "Color transfer, primaries and HDR format",
            Self::AudioTracks => "Audio stream list",
            Self::SubtitleTracks => "Subtitle stream list",
            Self::Thumbnails => "Evenly spaced still frames",
            Self::Compression => "Proxy encode for analysis",
            Self::FocalLength => "Estimate focal length from thumbnails",
            Self::AiAnalysis => "Content analysis of the compressed proxy",
            Self::AiThumbnailSelection => "Pick the best thumbnail using the analysis",
            Self::ConsolidateMetadata => "Merge extractor output by source priority",
            Self::BuildRecord => "Assemble the media record",
            Self::Persist => "Write the record to the store",
            Self::Embeddings => "Compute a text embedding for search",
            Self::UploadThumbnails => "Upload thumbnails to shared storage",
        }
    }

    /// Every catalog step runs unless turned off.
    pub fn enabled_by_default(self) -> bool {
        true
    }

    /// Steps that write to shared storage and therefore need a session.
    pub fn requires_session(self) -> bool {
        matches!(self, Self::Persist | Self::Embeddings | Self::UploadThumbnails)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Listing view with enabled state resolved against `options`.
    pub fn descriptor(self, options: &RunOptions) -> StepDescriptor {
        StepDescriptor {
            name: self.name().to_string(),
            enabled: options.is_enabled(self.name(), self.enabled_by_default()),
            description: self.description().to_string(),
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlowStep {
    type Err = rk_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| rk_core::Error::not_found("step", s))
    }
}

/// Descriptors for the whole catalog in dependency order.
pub fn catalog(options: &RunOptions) -> Vec<StepDescriptor> {
    FlowStep::ALL.iter().map(|s| s.descriptor(options)).collect()
}
