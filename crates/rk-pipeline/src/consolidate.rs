//! Priority-based merge of extractor outputs into one metadata set.
//!
//! Each canonical field belongs to a class. Camera fields trust EXIF first,
//! technical fields trust the container probe first. For every field the
//! highest-priority source holding an acceptable value wins, and the winner
//! is recorded in the provenance map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::FlowStep;
use crate::collaborators::MetadataMap;

/// Where a metadata value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    ContainerMetadata,
    SecondaryMetadata,
    ExifBasic,
    ExifExtended,
    CodecParameters,
    HdrParameters,
    FocalLengthAi,
}

impl MetadataSource {
    pub fn name(self) -> &'static str {
        match self {
            Self::ContainerMetadata => "container_metadata",
            Self::SecondaryMetadata => "secondary_metadata",
            Self::ExifBasic => "exif_basic",
            Self::ExifExtended => "exif_extended",
            Self::CodecParameters => "codec_parameters",
            Self::HdrParameters => "hdr_parameters",
            Self::FocalLengthAi => "focal_length_ai",
        }
    }

    /// The flow step producing this source.
    pub fn step(self) -> FlowStep {
        match self {
            Self::ContainerMetadata => FlowStep::ContainerMetadata,
            Self::SecondaryMetadata => FlowStep::SecondaryMetadata,
            Self::ExifBasic => FlowStep::ExifBasic,
            Self::ExifExtended => FlowStep::ExifExtended,
            Self::CodecParameters => FlowStep::CodecParameters,
            Self::HdrParameters => FlowStep::HdrParameters,
            Self::FocalLengthAi => FlowStep::FocalLength,
        }
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field class; decides which priority order applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Camera,
    Technical,
}

impl FieldClass {
    pub fn priority(self) -> &'static [MetadataSource] {
        use MetadataSource::*;
        match self {
            Self::Camera => &[
                ExifExtended,
                ExifBasic,
                FocalLengthAi,
                SecondaryMetadata,
                ContainerMetadata,
                CodecParameters,
                HdrParameters,
            ],
            Self::Technical => &[
                ContainerMetadata,
                SecondaryMetadata,
                CodecParameters,
                HdrParameters,
                ExifExtended,
                ExifBasic,
                FocalLengthAi,
            ],
        }
    }
}

/// What counts as a usable value for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Non-empty string or any number.
    Text,
    /// Number, or numeric string, strictly above zero.
    Positive,
    /// Any finite number, or numeric string.
    Coordinate,
}

macro_rules! metadata_fields {
    ($($variant:ident => $name:literal, $class:ident, $kind:ident;)+) => {
        /// A canonical metadata field.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum MetadataField {
            $($variant,)+
        }

        impl MetadataField {
            pub const ALL: &'static [MetadataField] = &[$(Self::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            pub fn class(self) -> FieldClass {
                match self {
                    $(Self::$variant => FieldClass::$class,)+
                }
            }

            fn kind(self) -> FieldKind {
                match self {
                    $(Self::$variant => FieldKind::$kind,)+
                }
            }
        }
    };
}

metadata_fields! {
    Make => "make", Camera, Text;
    Model => "model", Camera, Text;
    LensModel => "lens_model", Camera, Text;
    FocalLength => "focal_length", Camera, Positive;
    Iso => "iso", Camera, Positive;
    Aperture => "aperture", Camera, Positive;
    ExposureTime => "exposure_time", Camera, Positive;
    CreationDate => "creation_date", Camera, Text;
    GpsLatitude => "gps_latitude", Camera, Coordinate;
    GpsLongitude => "gps_longitude", Camera, Coordinate;
    ContainerFormat => "container_format", Technical, Text;
    Codec => "codec", Technical, Text;
    Profile => "profile", Technical, Text;
    Width => "width", Technical, Positive;
    Height => "height", Technical, Positive;
    FrameRate => "frame_rate", Technical, Positive;
    Duration => "duration", Technical, Positive;
    BitRate => "bit_rate", Technical, Positive;
    BitDepth => "bit_depth", Technical, Positive;
    PixelFormat => "pixel_format", Technical, Text;
    ColorSpace => "color_space", Technical, Text;
    ColorTransfer => "color_transfer", Technical, Text;
    ColorPrimaries => "color_primaries", Technical, Text;
    HdrFormat => "hdr_format", Technical, Text;
    AudioCodec => "audio_codec", Technical, Text;
    AudioChannels => "audio_channels", Technical, Positive;
    SampleRate => "sample_rate", Technical, Positive;
}

impl MetadataField {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Whether `value` is usable for this field.
    pub fn accepts(self, value: &Value) -> bool {
        match (self.kind(), value) {
            (_, Value::Null) => false,
            (FieldKind::Text, Value::String(s)) => !s.trim().is_empty(),
            (FieldKind::Text, Value::Number(_)) => true,
            (FieldKind::Positive, v) => as_number(v).is_some_and(|n| n > 0.0),
            (FieldKind::Coordinate, v) => as_number(v).is_some_and(f64::is_finite),
            _ => false,
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One source's output, keyed by canonical field names.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: MetadataSource,
    pub fields: MetadataMap,
}

impl SourceReport {
    pub fn new(source: MetadataSource, fields: MetadataMap) -> Self {
        Self { source, fields }
    }
}

/// The merged metadata with the winning source of every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedMetadata {
    pub fields: BTreeMap<MetadataField, Value>,
    pub provenance: BTreeMap<MetadataField, MetadataSource>,
}

impl ConsolidatedMetadata {
    pub fn get(&self, field: MetadataField) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn get_str(&self, field: MetadataField) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: MetadataField) -> Option<f64> {
        self.get(field).and_then(as_number)
    }

    pub fn source_of(&self, field: MetadataField) -> Option<MetadataSource> {
        self.provenance.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Merge `reports` by per-class source priority.
///
/// The result does not depend on the order of `reports` as long as each
/// source appears at most once. Keys that are not canonical fields are
/// ignored.
pub fn consolidate(reports: &[SourceReport]) -> ConsolidatedMetadata {
    let by_source: BTreeMap<MetadataSource, &MetadataMap> = reports
        .iter()
        .rev()
        .map(|r| (r.source, &r.fields))
        .collect();

    let mut merged = ConsolidatedMetadata::default();
    for &field in MetadataField::ALL {
        let winner = field.class().priority().iter().find_map(|source| {
            by_source
                .get(source)
                .and_then(|fields| fields.get(field.name()))
                .filter(|value| field.accepts(value))
                .map(|value| (*source, value))
        });
        if let Some((source, value)) = winner {
            merged.fields.insert(field, value.clone());
            merged.provenance.insert(field, source);
        }
    }

    tracing::debug!(
        fields = merged.fields.len(),
        sources = by_source.len(),
        "Consolidated metadata"
    );
    merged
}
