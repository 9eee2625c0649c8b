//! FFprobe-backed extractors.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps one slice of the output into canonical metadata keys. Five flow
//! steps read ffprobe: the container, codec, HDR, audio and subtitle views.

use std::path::Path;

use async_trait::async_trait;
use rk_pipeline::collaborators::Extractor;
use rk_pipeline::MetadataMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::command::ToolCommand;
use crate::probe::insert_opt;

/// Which part of the ffprobe output an extractor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfprobeView {
    Container,
    Codec,
    Hdr,
    Audio,
    Subtitles,
}

impl FfprobeView {
    fn label(self) -> &'static str {
        match self {
            Self::Container => "ffprobe:container",
            Self::Codec => "ffprobe:codec",
            Self::Hdr => "ffprobe:hdr",
            Self::Audio => "ffprobe:audio",
            Self::Subtitles => "ffprobe:subtitles",
        }
    }
}

/// An extractor backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeExtractor {
    command: ToolCommand,
    view: FfprobeView,
}

impl FfprobeExtractor {
    pub fn new(command: ToolCommand, view: FfprobeView) -> Self {
        Self { command, view }
    }

    /// Create an extractor that finds ffprobe on `PATH`.
    pub fn from_path(view: FfprobeView) -> Option<Self> {
        which::which("ffprobe")
            .ok()
            .map(|p| Self::new(ToolCommand::new(p), view))
    }
}

#[async_trait]
impl Extractor for FfprobeExtractor {
    fn name(&self) -> &str {
        self.view.label()
    }

    async fn extract(&self, path: &Path) -> rk_core::Result<MetadataMap> {
        let output = probe(&self.command, path).await?;
        Ok(match self.view {
            FfprobeView::Container => container_fields(&output),
            FfprobeView::Codec => codec_fields(&output),
            FfprobeView::Hdr => hdr_fields(&output),
            FfprobeView::Audio => audio_fields(&output),
            FfprobeView::Subtitles => subtitle_fields(&output),
        })
    }
}

/// Run ffprobe on `path` and parse its JSON.
pub async fn probe(command: &ToolCommand, path: &Path) -> rk_core::Result<FfprobeOutput> {
    let mut cmd = command.clone();
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    cmd.arg(path.to_string_lossy().as_ref());

    let output = cmd.execute().await?;
    parse(&output.stdout)
}

/// Media duration in seconds according to ffprobe.
pub async fn probe_duration(command: &ToolCommand, path: &Path) -> rk_core::Result<Option<f64>> {
    Ok(probe(command, path).await?.duration())
}

pub fn parse(stdout: &str) -> rk_core::Result<FfprobeOutput> {
    serde_json::from_str(stdout)
        .map_err(|e| rk_core::Error::extract("ffprobe", format!("JSON parse error: {e}")))
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

impl FfprobeOutput {
    pub fn duration(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
    }

    fn video(&self) -> Option<&FfprobeStream> {
        self.streams_of("video").next()
    }

    fn streams_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a FfprobeStream> + 'a {
        self.streams
            .iter()
            .filter(move |s| s.codec_type.as_deref() == Some(kind))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    bits_per_raw_sample: Option<String>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    sample_rate: Option<String>,
    color_space: Option<String>,
    color_primaries: Option<String>,
    color_transfer: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    side_data_type: Option<String>,
    dv_profile: Option<u8>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

fn container_fields(output: &FfprobeOutput) -> MetadataMap {
    let mut map = MetadataMap::new();
    let format = &output.format;
    insert_opt(&mut map, "container_format", format.format_name.clone());
    insert_opt(&mut map, "duration", output.duration());
    insert_opt(
        &mut map,
        "bit_rate",
        format.bit_rate.as_deref().and_then(|s| s.parse::<u64>().ok()),
    );
    insert_opt(&mut map, "creation_date", format_tag(format, &["creation_time"]));
    insert_opt(
        &mut map,
        "make",
        format_tag(format, &["com.apple.quicktime.make", "make"]),
    );
    insert_opt(
        &mut map,
        "model",
        format_tag(format, &["com.apple.quicktime.model", "model"]),
    );

    if let Some(video) = output.video() {
        insert_opt(&mut map, "codec", video.codec_name.clone());
        insert_opt(&mut map, "width", video.width);
        insert_opt(&mut map, "height", video.height);
        insert_opt(
            &mut map,
            "frame_rate",
            video.r_frame_rate.as_deref().and_then(parse_frame_rate),
        );
    }
    map
}

fn codec_fields(output: &FfprobeOutput) -> MetadataMap {
    let mut map = MetadataMap::new();
    let Some(video) = output.video() else {
        return map;
    };
    insert_opt(&mut map, "codec", video.codec_name.clone());
    insert_opt(&mut map, "profile", video.profile.clone());
    insert_opt(&mut map, "pixel_format", video.pix_fmt.clone());
    insert_opt(
        &mut map,
        "bit_depth",
        video
            .bits_per_raw_sample
            .as_deref()
            .and_then(|s| s.parse::<u32>().ok()),
    );
    insert_opt(
        &mut map,
        "frame_rate",
        video.r_frame_rate.as_deref().and_then(parse_frame_rate),
    );
    insert_opt(&mut map, "width", video.width);
    insert_opt(&mut map, "height", video.height);
    map
}

fn hdr_fields(output: &FfprobeOutput) -> MetadataMap {
    let mut map = MetadataMap::new();
    let Some(video) = output.video() else {
        return map;
    };
    insert_opt(&mut map, "color_space", video.color_space.clone());
    insert_opt(&mut map, "color_primaries", video.color_primaries.clone());
    insert_opt(&mut map, "color_transfer", video.color_transfer.clone());
    map.insert("hdr_format".into(), json!(detect_hdr(video)));
    map
}

fn audio_fields(output: &FfprobeOutput) -> MetadataMap {
    let tracks: Vec<Value> = output
        .streams_of("audio")
        .map(|s| {
            json!({
                "index": s.index,
                "codec": s.codec_name,
                "channels": s.channels,
                "channel_layout": s.channel_layout,
                "sample_rate": s.sample_rate.as_deref().and_then(|r| r.parse::<u32>().ok()),
                "language": s.tags.language,
                "title": s.tags.title,
                "default": s.disposition.default == 1,
            })
        })
        .collect();

    let mut map = MetadataMap::new();
    if let Some(first) = output.streams_of("audio").next() {
        insert_opt(&mut map, "audio_codec", first.codec_name.clone());
        insert_opt(&mut map, "audio_channels", first.channels);
        insert_opt(
            &mut map,
            "sample_rate",
            first.sample_rate.as_deref().and_then(|r| r.parse::<u32>().ok()),
        );
    }
    map.insert("audio_tracks".into(), Value::Array(tracks));
    map
}

fn subtitle_fields(output: &FfprobeOutput) -> MetadataMap {
    let tracks: Vec<Value> = output
        .streams_of("subtitle")
        .map(|s| {
            json!({
                "index": s.index,
                "codec": s.codec_name,
                "language": s.tags.language,
                "title": s.tags.title,
                "forced": s.disposition.forced == 1,
                "default": s.disposition.default == 1,
            })
        })
        .collect();

    let mut map = MetadataMap::new();
    map.insert("subtitle_tracks".into(), Value::Array(tracks));
    map
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn format_tag(format: &FfprobeFormat, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| format.tags.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn detect_hdr(stream: &FfprobeStream) -> &'static str {
    let dolby_vision = stream
        .side_data_list
        .iter()
        .any(|sd| sd.side_data_type.as_deref() == Some("DOVI configuration record") && sd.dv_profile.is_some());
    if dolby_vision {
        return "dolby_vision";
    }

    match stream.color_transfer.as_deref() {
        Some("smpte2084") => "hdr10",
        Some("arib-std-b67") => "hlg",
        _ => "sdr",
    }
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den != 0.0).then(|| num / den);
    }
    rate_str.parse().ok()
}
