//! MediaInfo-backed secondary metadata extractor.
//!
//! Shells out to `mediainfo --Output=JSON <file>`. MediaInfo reads container
//! and HDR signalling that ffprobe sometimes misses, so its output backs up
//! the ffprobe views during consolidation.

use std::path::Path;

use async_trait::async_trait;
use rk_pipeline::collaborators::Extractor;
use rk_pipeline::MetadataMap;
use serde::Deserialize;

use crate::command::ToolCommand;
use crate::probe::insert_opt;

/// An extractor backed by the `mediainfo` CLI.
#[derive(Debug, Clone)]
pub struct MediaInfoExtractor {
    command: ToolCommand,
}

impl MediaInfoExtractor {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    /// Create an extractor that finds mediainfo on `PATH`.
    pub fn from_path() -> Option<Self> {
        which::which("mediainfo")
            .ok()
            .map(|p| Self::new(ToolCommand::new(p)))
    }
}

#[async_trait]
impl Extractor for MediaInfoExtractor {
    fn name(&self) -> &str {
        "mediainfo"
    }

    async fn extract(&self, path: &Path) -> rk_core::Result<MetadataMap> {
        let mut cmd = self.command.clone();
        cmd.arg("--Output=JSON");
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd.execute().await?;
        parse(&output.stdout).map(secondary_fields)
    }
}

fn parse(stdout: &str) -> rk_core::Result<MiOutput> {
    serde_json::from_str(stdout)
        .map_err(|e| rk_core::Error::extract("mediainfo", format!("JSON parse error: {e}")))
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MiOutput {
    media: MiMedia,
}

#[derive(Debug, Deserialize)]
struct MiMedia {
    #[serde(default)]
    track: Vec<MiTrack>,
}

#[derive(Debug, Default, Deserialize)]
struct MiTrack {
    #[serde(rename = "@type")]
    track_type: String,

    #[serde(rename = "Format")]
    format: Option<String>,

    #[serde(rename = "Format_Profile")]
    format_profile: Option<String>,

    #[serde(rename = "Duration")]
    duration: Option<String>,

    #[serde(rename = "OverallBitRate")]
    overall_bit_rate: Option<String>,

    #[serde(rename = "Encoded_Date")]
    encoded_date: Option<String>,

    #[serde(rename = "Width")]
    width: Option<String>,

    #[serde(rename = "Height")]
    height: Option<String>,

    #[serde(rename = "FrameRate")]
    frame_rate: Option<String>,

    #[serde(rename = "BitDepth")]
    bit_depth: Option<String>,

    #[serde(rename = "ColorSpace")]
    color_space: Option<String>,

    #[serde(rename = "colour_primaries")]
    colour_primaries: Option<String>,

    #[serde(rename = "transfer_characteristics")]
    transfer_characteristics: Option<String>,

    #[serde(rename = "HDR_Format")]
    hdr_format: Option<String>,

    #[serde(rename = "Channels")]
    channels: Option<String>,

    #[serde(rename = "SamplingRate")]
    sample_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn secondary_fields(mi: MiOutput) -> MetadataMap {
    let mut map = MetadataMap::new();
    let mut seen_video = false;
    let mut seen_audio = false;

    for track in mi.media.track {
        match track.track_type.as_str() {
            "General" => {
                insert_opt(&mut map, "container_format", track.format);
                insert_opt(&mut map, "duration", track.duration.and_then(|s| parse_numeric::<f64>(&s)));
                insert_opt(
                    &mut map,
                    "bit_rate",
                    track.overall_bit_rate.and_then(|s| parse_numeric::<u64>(&s)),
                );
                insert_opt(&mut map, "creation_date", track.encoded_date.map(clean_date));
            }
            "Video" if !seen_video => {
                seen_video = true;
                insert_opt(&mut map, "codec", track.format);
                insert_opt(&mut map, "profile", track.format_profile);
                insert_opt(&mut map, "width", track.width.and_then(|s| parse_numeric::<u32>(&s)));
                insert_opt(&mut map, "height", track.height.and_then(|s| parse_numeric::<u32>(&s)));
                insert_opt(&mut map, "frame_rate", track.frame_rate.and_then(|s| parse_numeric::<f64>(&s)));
                insert_opt(&mut map, "bit_depth", track.bit_depth.and_then(|s| parse_numeric::<u32>(&s)));
                insert_opt(&mut map, "color_space", track.color_space);
                insert_opt(&mut map, "color_primaries", track.colour_primaries);
                insert_opt(&mut map, "color_transfer", track.transfer_characteristics);
                insert_opt(&mut map, "hdr_format", track.hdr_format);
            }
            "Audio" if !seen_audio => {
                seen_audio = true;
                insert_opt(&mut map, "audio_codec", track.format);
                insert_opt(&mut map, "audio_channels", track.channels.and_then(|s| parse_numeric::<u32>(&s)));
                insert_opt(&mut map, "sample_rate", track.sample_rate.and_then(|s| parse_numeric::<u32>(&s)));
            }
            _ => {}
        }
    }
    map
}

/// MediaInfo prefixes dates with the time zone name (`UTC 2024-05-01 10:00:00`).
fn clean_date(raw: String) -> String {
    raw.strip_prefix("UTC ").map(str::to_string).unwrap_or(raw)
}

/// Parse a numeric string that may contain spaces or trailing units.
fn parse_numeric<T: std::str::FromStr>(s: &str) -> Option<T> {
    let cleaned: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ' ')
        .filter(|c| !c.is_whitespace())
        .collect();
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "media": {
            "track": [
                {
                    "@type": "General",
                    "Format": "MPEG-4",
                    "Duration": "12.512",
                    "OverallBitRate": "98000000",
                    "Encoded_Date": "UTC 2024-05-01 10:00:00"
                },
                {
                    "@type": "Video",
                    "Format": "HEVC",
                    "Format_Profile": "Main 10",
                    "Width": "3840",
                    "Height": "2160",
                    "FrameRate": "23.976",
                    "BitDepth": "10",
                    "colour_primaries": "BT.2020",
                    "transfer_characteristics": "PQ",
                    "HDR_Format": "SMPTE ST 2086"
                },
                {
                    "@type": "Audio",
                    "Format": "AAC",
                    "Channels": "2",
                    "SamplingRate": "48000"
                },
                {
                    "@type": "Audio",
                    "Format": "AC-3",
                    "Channels": "6"
                }
            ]
        }
    }"#;

    #[test]
    fn maps_general_video_and_first_audio() {
        let map = secondary_fields(parse(SAMPLE).unwrap());
        assert_eq!(map["container_format"], "MPEG-4");
        assert_eq!(map["duration"], 12.512);
        assert_eq!(map["creation_date"], "2024-05-01 10:00:00");
        assert_eq!(map["codec"], "HEVC");
        assert_eq!(map["width"], 3840);
        assert_eq!(map["hdr_format"], "SMPTE ST 2086");
        assert_eq!(map["color_transfer"], "PQ");
        assert_eq!(map["audio_codec"], "AAC");
        assert_eq!(map["audio_channels"], 2);
    }

    #[test]
    fn missing_tracks_leave_keys_out() {
        let map = secondary_fields(parse(r#"{"media": {"track": []}}"#).unwrap());
        assert!(map.is_empty());
    }

    #[test]
    fn numeric_parsing() {
        assert_eq!(parse_numeric::<u32>("3 840"), Some(3840));
        assert_eq!(parse_numeric::<u64>("1234"), Some(1234));
        assert_eq!(parse_numeric::<f64>("23.976"), Some(23.976));
        assert_eq!(parse_numeric::<u32>("abc"), None);
    }
}
