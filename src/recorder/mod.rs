//! Recording system module
//!
//! This module implements the file recording side of the pipeline:
//! - VideoEncoder / EncoderFactory seam with an FFmpeg implementation
//! - Recorder owning one open encoder session
//! - Session state, naming and configuration

pub mod encoder;
pub mod state;
pub mod writer;

pub use encoder::{EncoderFactory, FfmpegEncoderFactory, VideoEncoder};
pub use state::{EncoderSettings, RecordingConfig, RecordingSession, RecordingSummary, VideoCodec};
pub use writer::Recorder;
