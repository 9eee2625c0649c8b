//! Thumbnail extraction with ffmpeg.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rk_core::config::ThumbnailConfig;
use rk_core::FileId;
use rk_pipeline::collaborators::ThumbnailGenerator;

use crate::command::ToolCommand;
use crate::probe::ffprobe;

/// Grabs evenly spaced JPEG frames from a video.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    ffmpeg: ToolCommand,
    ffprobe: Option<ToolCommand>,
    settings: ThumbnailConfig,
}

impl FfmpegThumbnailer {
    pub fn new(ffmpeg: ToolCommand, ffprobe: Option<ToolCommand>, settings: ThumbnailConfig) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            settings,
        }
    }

    /// Frames for one flow live in their own directory so clips that share a
    /// name do not overwrite each other.
    fn output_dir(&self, file_id: FileId) -> PathBuf {
        self.settings
            .output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reelkeeper").join("thumbnails"))
            .join(file_id.to_string())
    }

    fn frame_path(&self, input: &Path, file_id: FileId, index: usize) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".into());
        self.output_dir(file_id).join(format!("{stem}_{index:02}.jpg"))
    }
}

#[async_trait]
impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(&self, path: &Path, file_id: FileId) -> rk_core::Result<Vec<PathBuf>> {
        let duration = match &self.ffprobe {
            Some(ffprobe) => ffprobe::probe_duration(ffprobe, path).await?,
            None => None,
        };
        let timestamps = timestamps(duration, self.settings.count);

        tokio::fs::create_dir_all(self.output_dir(file_id)).await?;

        let mut thumbnails = Vec::with_capacity(timestamps.len());
        for (i, at) in timestamps.into_iter().enumerate() {
            let out = self.frame_path(path, file_id, i);
            let mut cmd = self.ffmpeg.clone();
            cmd.args(["-y", "-v", "error", "-ss"]);
            cmd.arg(format!("{at:.3}"));
            cmd.arg("-i");
            cmd.arg(path.to_string_lossy().as_ref());
            cmd.args(["-frames:v", "1", "-q:v", "3", "-vf"]);
            cmd.arg(format!("scale={}:-2", self.settings.width));
            cmd.arg(out.to_string_lossy().as_ref());
            cmd.execute().await?;
            thumbnails.push(out);
        }

        tracing::debug!(file = %path.display(), count = thumbnails.len(), "Thumbnails written");
        Ok(thumbnails)
    }
}

/// `count` timestamps spread over the interior of the clip, avoiding the
/// first and last frames. Without a duration only the first frame is taken.
fn timestamps(duration: Option<f64>, count: u32) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    match duration {
        Some(d) if d > 0.0 => (1..=count)
            .map(|i| d * f64::from(i) / f64::from(count + 1))
            .collect(),
        _ => vec![0.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evenly_spaced() {
        assert_eq!(timestamps(Some(12.0), 3), vec![3.0, 6.0, 9.0]);
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(timestamps(Some(12.0), 0).is_empty());
    }

    #[test]
    fn unknown_duration_takes_first_frame() {
        assert_eq!(timestamps(None, 5), vec![0.0]);
    }

    fn thumbnailer() -> FfmpegThumbnailer {
        FfmpegThumbnailer::new(
            ToolCommand::new(PathBuf::from("ffmpeg")),
            None,
            ThumbnailConfig::default(),
        )
    }

    #[test]
    fn default_dir_is_under_temp() {
        let dir = thumbnailer().output_dir(FileId::new());
        assert!(dir.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn same_clip_name_on_two_cards_gets_separate_frames() {
        let thumbnailer = thumbnailer();
        let card_a = thumbnailer.frame_path(Path::new("/cardA/C0001.MP4"), FileId::new(), 0);
        let card_b = thumbnailer.frame_path(Path::new("/cardB/C0001.MP4"), FileId::new(), 0);
        assert_ne!(card_a, card_b);
        assert_eq!(card_a.file_name().unwrap(), "C0001_00.jpg");
    }
}
