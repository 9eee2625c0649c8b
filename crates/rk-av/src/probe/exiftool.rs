//! ExifTool-backed camera metadata extractors.
//!
//! The basic pass reads the common EXIF tags (`exiftool -json -n`). The
//! extended pass reads every group including duplicates and embedded
//! QuickTime keys (`-G -a -ee`), which is slower but finds lens and focal
//! length data that cameras store outside the EXIF block.

use std::path::Path;

use async_trait::async_trait;
use rk_pipeline::collaborators::Extractor;
use rk_pipeline::MetadataMap;
use serde_json::Value;

use crate::command::ToolCommand;

/// Which exiftool pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExifPass {
    Basic,
    Extended,
}

/// Canonical key and the exiftool tag names it is read from, in preference order.
type TagTable = &'static [(&'static str, &'static [&'static str])];

const BASIC_TAGS: TagTable = &[
    ("make", &["Make"]),
    ("model", &["Model"]),
    ("lens_model", &["LensModel"]),
    ("focal_length", &["FocalLength"]),
    ("iso", &["ISO"]),
    ("aperture", &["FNumber", "Aperture"]),
    ("exposure_time", &["ExposureTime"]),
    ("creation_date", &["DateTimeOriginal", "CreateDate"]),
    ("gps_latitude", &["GPSLatitude"]),
    ("gps_longitude", &["GPSLongitude"]),
];

const EXTENDED_TAGS: TagTable = &[
    ("make", &["Make", "AndroidMake"]),
    ("model", &["Model", "AndroidModel"]),
    ("lens_model", &["LensModel", "LensID", "Lens", "LensType"]),
    ("focal_length", &["FocalLength", "FocalLengthIn35mmFormat"]),
    ("iso", &["ISO", "ISOSpeed"]),
    ("aperture", &["FNumber", "Aperture", "ApertureValue"]),
    ("exposure_time", &["ExposureTime", "ShutterSpeed"]),
    ("creation_date", &["DateTimeOriginal", "CreationDate", "CreateDate", "MediaCreateDate"]),
    ("gps_latitude", &["GPSLatitude"]),
    ("gps_longitude", &["GPSLongitude"]),
];

impl ExifPass {
    fn args(self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["-json", "-n"],
            Self::Extended => &["-json", "-n", "-G", "-a", "-ee"],
        }
    }

    fn tags(self) -> TagTable {
        match self {
            Self::Basic => BASIC_TAGS,
            Self::Extended => EXTENDED_TAGS,
        }
    }
}

/// An extractor backed by the `exiftool` CLI.
#[derive(Debug, Clone)]
pub struct ExifToolExtractor {
    command: ToolCommand,
    pass: ExifPass,
}

impl ExifToolExtractor {
    pub fn new(command: ToolCommand, pass: ExifPass) -> Self {
        Self { command, pass }
    }
}

#[async_trait]
impl Extractor for ExifToolExtractor {
    fn name(&self) -> &str {
        match self.pass {
            ExifPass::Basic => "exiftool",
            ExifPass::Extended => "exiftool:extended",
        }
    }

    async fn extract(&self, path: &Path) -> rk_core::Result<MetadataMap> {
        let mut cmd = self.command.clone();
        cmd.args(self.pass.args().iter().copied());
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd.execute().await?;
        let tags = parse(&output.stdout)?;
        Ok(map_tags(&tags, self.pass.tags()))
    }
}

/// exiftool prints a one-element array per input file.
fn parse(stdout: &str) -> rk_core::Result<MetadataMap> {
    let value: Value = serde_json::from_str(stdout)
        .map_err(|e| rk_core::Error::extract("exiftool", format!("JSON parse error: {e}")))?;
    value
        .as_array()
        .and_then(|files| files.first())
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| rk_core::Error::extract("exiftool", "expected an array of objects"))
}

/// Map raw tags to canonical keys. Grouped names (`QuickTime:Make`) match on
/// the part after the colon; the first usable candidate wins.
fn map_tags(tags: &MetadataMap, table: TagTable) -> MetadataMap {
    let mut map = MetadataMap::new();
    for (key, candidates) in table {
        let found = candidates.iter().find_map(|candidate| {
            tags.iter()
                .filter(|(name, _)| tag_name(name) == *candidate)
                .map(|(_, value)| value)
                .find(|value| usable(value))
        });
        if let Some(value) = found {
            map.insert((*key).to_string(), value.clone());
        }
    }
    map
}

fn tag_name(raw: &str) -> &str {
    raw.rsplit_once(':').map_or(raw, |(_, name)| name)
}

fn usable(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn basic_pass_maps_common_tags() {
        let stdout = r#"[{
            "SourceFile": "/ingest/A001.mov",
            "Make": "Canon",
            "Model": "EOS R5",
            "ISO": 800,
            "FNumber": 2.8,
            "ExposureTime": 0.02,
            "CreateDate": "2024:05:01 10:00:00",
            "GPSLatitude": -33.8688
        }]"#;
        let map = map_tags(&parse(stdout).unwrap(), BASIC_TAGS);
        assert_eq!(map["make"], "Canon");
        assert_eq!(map["iso"], 800);
        assert_eq!(map["aperture"], 2.8);
        assert_eq!(map["creation_date"], "2024:05:01 10:00:00");
        assert_eq!(map["gps_latitude"], -33.8688);
        assert!(!map.contains_key("focal_length"));
    }

    #[test]
    fn extended_pass_reads_grouped_tags() {
        let tags = json!({
            "SourceFile": "/ingest/A001.mov",
            "QuickTime:Make": "",
            "Keys:Make": "Apple",
            "ExifIFD:LensModel": "iPhone 15 Pro back camera 6.765mm f/1.78",
            "ExifIFD:FocalLength": 6.8,
            "QuickTime:MediaCreateDate": "2024:05:01 10:00:00"
        });
        let map = map_tags(tags.as_object().unwrap(), EXTENDED_TAGS);
        assert_eq!(map["make"], "Apple");
        assert_eq!(map["focal_length"], 6.8);
        assert!(map["lens_model"].as_str().unwrap().starts_with("iPhone"));
        assert_eq!(map["creation_date"], "2024:05:01 10:00:00");
    }

    #[test]
    fn candidate_order_wins() {
        let tags = json!({"CreateDate": "later", "DateTimeOriginal": "earlier"});
        let map = map_tags(tags.as_object().unwrap(), BASIC_TAGS);
        assert_eq!(map["creation_date"], "earlier");
    }

    #[test]
    fn empty_output_is_extract_error() {
        assert!(matches!(parse("[]"), Err(rk_core::Error::Extract { .. })));
        assert!(matches!(parse("{"), Err(rk_core::Error::Extract { .. })));
    }

    #[test]
    fn grouped_tag_name() {
        assert_eq!(tag_name("QuickTime:Make"), "Make");
        assert_eq!(tag_name("Make"), "Make");
    }
}
