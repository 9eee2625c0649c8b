//! Metadata extractors backed by external CLI tools.

pub mod exiftool;
pub mod ffprobe;
pub mod mediainfo;

pub use exiftool::{ExifPass, ExifToolExtractor};
pub use ffprobe::{FfprobeExtractor, FfprobeView};
pub use mediainfo::MediaInfoExtractor;

use rk_pipeline::MetadataMap;
use serde_json::Value;

/// Insert `value` under `key` when present.
pub(crate) fn insert_opt<T: Into<Value>>(map: &mut MetadataMap, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}
