//! # rk-av
//!
//! External tool adapters for the reelkeeper ingest flow.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg,
//!   ffprobe, mediainfo and exiftool.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support, plus line-by-line stderr streaming for progress output.
//! - **Extractors** ([`probe`]) -- implement
//!   [`rk_pipeline::collaborators::Extractor`] by shelling out to CLI tools.
//! - **Media operations** -- proxy compression with progress
//!   ([`FfmpegCompressor`]), thumbnails ([`FfmpegThumbnailer`]) and content
//!   checksums ([`Sha256Checksummer`]).

pub mod checksum;
pub mod command;
pub mod compress;
pub mod probe;
pub mod thumbnails;
pub mod tools;

// ---- Re-exports for convenience ----

pub use checksum::Sha256Checksummer;
pub use command::{ToolCommand, ToolOutput};
pub use compress::{FfmpegCompressor, ProgressParser};
pub use probe::{ExifPass, ExifToolExtractor, FfprobeExtractor, FfprobeView, MediaInfoExtractor};
pub use thumbnails::FfmpegThumbnailer;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
