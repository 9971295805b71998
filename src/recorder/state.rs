//! Recording session state
//!
//! Defines the recording configuration, the per-session bookkeeping and the
//! summary handed back when a recording is finalized.

use crate::frame::{PixelFormat, Resolution};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output codec and container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// MPEG-4 Part 2 in an AVI container
    Mpeg4,
}

impl VideoCodec {
    /// Get the file extension for this codec's container
    pub fn extension(&self) -> &'static str {
        match self {
            VideoCodec::Mpeg4 => "avi",
        }
    }

    /// Get the FFmpeg encoder name
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::Mpeg4 => "mpeg4",
        }
    }
}

/// Configuration for recordings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    /// Directory recordings are written to
    pub output_dir: PathBuf,

    /// Frame rate written into the container
    pub frame_rate: u32,

    /// Target bitrate in bits per second
    pub bitrate: u64,

    /// Output codec
    pub codec: VideoCodec,

    /// Fixed output size. When unset the size of the latest frame is used.
    pub frame_size: Option<Resolution>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            frame_rate: 25,
            bitrate: 1_000_000,
            codec: VideoCodec::Mpeg4,
            frame_size: None,
        }
    }
}

/// The user's Downloads directory, falling back to home, then the working directory
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Build `recording_<yyyyMMdd_HHmmss>_<NNN>.<ext>`
pub fn recording_file_name(started_at: DateTime<Local>, sequence: u32, codec: VideoCodec) -> String {
    format!(
        "recording_{}_{:03}.{}",
        started_at.format("%Y%m%d_%H%M%S"),
        sequence,
        codec.extension()
    )
}

/// Parameters an encoder is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub path: PathBuf,
    /// Always even in both dimensions
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub bitrate: u64,
    pub codec: VideoCodec,
    pub input_format: PixelFormat,
}

impl EncoderSettings {
    /// Create settings, truncating the resolution to even dimensions
    pub fn new(
        path: impl Into<PathBuf>,
        resolution: Resolution,
        frame_rate: u32,
        bitrate: u64,
        codec: VideoCodec,
    ) -> Self {
        Self {
            path: path.into(),
            resolution: resolution.to_even(),
            frame_rate,
            bitrate,
            codec,
            input_format: PixelFormat::Rgb24,
        }
    }

    /// Size in bytes of one input frame
    pub fn frame_len(&self) -> usize {
        self.resolution.width as usize
            * self.resolution.height as usize
            * self.input_format.bytes_per_pixel()
    }
}

/// Bookkeeping for one open recording
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub settings: EncoderSettings,

    /// Sequence number within this application run, starting at 1
    pub sequence: u32,

    /// Local time the recording was started
    pub started_at: DateTime<Local>,

    /// Frames handed to the encoder so far
    pub frames_written: u64,
}

impl RecordingSession {
    pub fn new(settings: EncoderSettings, sequence: u32, started_at: DateTime<Local>) -> Self {
        Self {
            settings,
            sequence,
            started_at,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// Finish the session
    pub fn end(self) -> RecordingSummary {
        let duration_ms = (Local::now() - self.started_at).num_milliseconds().max(0) as u64;
        RecordingSummary {
            path: self.settings.path,
            sequence: self.sequence,
            resolution: self.settings.resolution,
            frames_written: self.frames_written,
            duration_ms,
        }
    }
}

/// Result of a finalized recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Path to the finalized file
    pub path: PathBuf,

    pub sequence: u32,

    pub resolution: Resolution,

    /// Number of frames written
    pub frames_written: u64,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}
