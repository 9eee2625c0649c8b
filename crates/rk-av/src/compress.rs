//! Proxy compression with ffmpeg.
//!
//! Encodes an H.264/AAC MP4 proxy capped at the configured height and streams
//! ffmpeg's `-progress pipe:2` output back as [`EncodeProgress`] updates.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rk_core::config::CompressionConfig;
use rk_core::FileId;
use rk_pipeline::collaborators::Compressor;
use rk_pipeline::EncodeProgress;

use crate::command::ToolCommand;
use crate::probe::ffprobe;

/// Minimum time between forwarded progress updates.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Encode timeout; long sources take a while at slow presets.
const ENCODE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// A [`Compressor`] that shells out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegCompressor {
    ffmpeg: ToolCommand,
    /// Used to read the source duration for percentages.
    ffprobe: Option<ToolCommand>,
}

impl FfmpegCompressor {
    pub fn new(ffmpeg: ToolCommand, ffprobe: Option<ToolCommand>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    fn build_command(&self, input: &Path, output: &Path, settings: &CompressionConfig) -> ToolCommand {
        let mut cmd = self.ffmpeg.clone();
        cmd.timeout(ENCODE_TIMEOUT);
        cmd.args(["-y", "-progress", "pipe:2", "-nostats", "-i"]);
        cmd.arg(input.to_string_lossy().as_ref());
        cmd.args(["-map", "0:v:0", "-map", "0:a?"]);
        cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"]);
        cmd.args(["-crf", &settings.crf.to_string()]);
        cmd.args(["-preset", &settings.preset]);
        cmd.args(["-vf", &scale_filter(settings.max_height)]);
        cmd.args(["-c:a", "aac", "-b:a", &settings.audio_bitrate, "-ac", "2"]);
        cmd.args(["-movflags", "+faststart"]);
        cmd.arg(output.to_string_lossy().as_ref());
        cmd
    }
}

#[async_trait]
impl Compressor for FfmpegCompressor {
    async fn compress(
        &self,
        path: &Path,
        file_id: FileId,
        settings: &CompressionConfig,
        on_progress: &(dyn Fn(EncodeProgress) + Send + Sync),
    ) -> rk_core::Result<PathBuf> {
        let duration = match &self.ffprobe {
            Some(ffprobe) => ffprobe::probe_duration(ffprobe, path).await.unwrap_or_else(|e| {
                tracing::debug!(file = %path.display(), error = %e, "No duration; progress will not have a percentage");
                None
            }),
            None => None,
        };

        let output = output_path(path, file_id, settings.output_dir.as_deref());
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(
            "Compressing {:?} -> {:?} (crf={}, preset={}, max_height={})",
            path,
            output,
            settings.crf,
            settings.preset,
            settings.max_height,
        );

        let cmd = self.build_command(path, &output, settings);
        let mut parser = ProgressParser::new(duration);
        let mut last_sent: Option<Instant> = None;
        cmd.execute_with_stderr_callback(
            |line| {
                let Some(progress) = parser.feed(line) else {
                    return;
                };
                let now = Instant::now();
                let due = last_sent.map_or(true, |t| now.duration_since(t) >= PROGRESS_INTERVAL);
                if due || progress.fraction >= 1.0 {
                    on_progress(progress);
                    last_sent = Some(now);
                }
            },
            None,
        )
        .await?;

        Ok(output)
    }
}

/// `<output_dir or temp>/<file_id>/<stem>_proxy.mp4`.
///
/// Card dumps reuse clip names, so each flow gets its own directory.
pub fn output_path(input: &Path, file_id: FileId, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    let dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::temp_dir().join("reelkeeper").join("proxies"));
    dir.join(file_id.to_string()).join(format!("{stem}_proxy.mp4"))
}

/// Cap the height, keep the aspect ratio, keep both dimensions even.
fn scale_filter(max_height: u32) -> String {
    format!("scale=-2:'min({max_height},ih)'")
}

/// Accumulates `key=value` lines from ffmpeg's progress stream and yields one
/// update per `progress=` line.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    out_time_us: Option<i64>,
    frame: Option<u64>,
    fps: Option<f64>,
    speed: Option<f64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            ..Self::default()
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<EncodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            // Both keys carry microseconds.
            "out_time_us" | "out_time_ms" => self.out_time_us = value.parse().ok(),
            "frame" => self.frame = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "speed" => self.speed = value.trim_end_matches('x').parse().ok(),
            "progress" => return Some(self.snapshot(value == "end")),
            _ => {}
        }
        None
    }

    fn snapshot(&self, finished: bool) -> EncodeProgress {
        let fraction = if finished {
            1.0
        } else {
            match (self.out_time_us, self.duration_secs) {
                (Some(us), Some(duration)) => (us.max(0) as f64 / 1_000_000.0 / duration).clamp(0.0, 1.0),
                _ => 0.0,
            }
        };
        EncodeProgress {
            fraction,
            frames: self.frame,
            fps: self.fps,
            speed: self.speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, block: &str) -> Vec<EncodeProgress> {
        block.lines().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn parses_progress_blocks() {
        let mut parser = ProgressParser::new(Some(10.0));
        let updates = feed_all(
            &mut parser,
            "frame=120\nfps=59.94\nout_time_us=2500000\nspeed=2.5x\nprogress=continue\n\
             frame=240\nout_time_us=5000000\nspeed=N/A\nprogress=continue\n",
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].fraction, 0.25);
        assert_eq!(updates[0].frames, Some(120));
        assert_eq!(updates[0].fps, Some(59.94));
        assert_eq!(updates[0].speed, Some(2.5));
        assert_eq!(updates[1].fraction, 0.5);
        assert_eq!(updates[1].speed, None);
    }

    #[test]
    fn end_reports_complete() {
        let mut parser = ProgressParser::new(Some(10.0));
        let updates = feed_all(&mut parser, "out_time_us=9000000\nprogress=end\n");
        assert_eq!(updates[0].fraction, 1.0);
    }

    #[test]
    fn unknown_duration_has_zero_fraction() {
        let mut parser = ProgressParser::new(None);
        let updates = feed_all(&mut parser, "frame=10\nout_time_us=1000000\nprogress=continue\n");
        assert_eq!(updates[0].fraction, 0.0);
        assert_eq!(updates[0].frames, Some(10));
    }

    #[test]
    fn overshoot_is_clamped() {
        let mut parser = ProgressParser::new(Some(1.0));
        let updates = feed_all(&mut parser, "out_time_us=3000000\nprogress=continue\n");
        assert_eq!(updates[0].fraction, 1.0);
    }

    #[test]
    fn proxy_path_uses_output_dir() {
        let id = FileId::new();
        let path = output_path(Path::new("/ingest/A001_C002.mov"), id, Some(Path::new("/proxies")));
        assert_eq!(path, PathBuf::from(format!("/proxies/{id}/A001_C002_proxy.mp4")));

        let default = output_path(Path::new("/ingest/A001_C002.mov"), id, None);
        assert!(default.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn same_clip_name_on_two_cards_gets_two_proxies() {
        let dir = Some(Path::new("/proxies"));
        let card_a = output_path(Path::new("/cardA/C0001.MP4"), FileId::new(), dir);
        let card_b = output_path(Path::new("/cardB/C0001.MP4"), FileId::new(), dir);
        assert_ne!(card_a, card_b);
        assert_eq!(card_a.file_name(), card_b.file_name());
    }

    #[test]
    fn command_carries_settings() {
        let compressor = FfmpegCompressor::new(ToolCommand::new(PathBuf::from("ffmpeg")), None);
        let settings = CompressionConfig::default();
        let cmd = compressor.build_command(Path::new("/in.mov"), Path::new("/out.mp4"), &settings);
        let debug = format!("{cmd:?}");
        assert!(debug.contains("\"-crf\", \"28\""));
        assert!(debug.contains("\"veryfast\""));
        assert!(debug.contains("min(720,ih)"));
        assert!(debug.contains("pipe:2"));
    }
}
