//! Recorder
//!
//! An open [`Recorder`] owns one encoder session. Closing consumes it, so a
//! recording can only be finalized once.

use crate::frame::Frame;
use crate::recorder::encoder::{EncoderFactory, VideoEncoder};
use crate::recorder::state::{EncoderSettings, RecordingSession, RecordingSummary};
use crate::utils::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use std::path::Path;

/// An open recording
pub struct Recorder {
    session: RecordingSession,
    encoder: Box<dyn VideoEncoder>,
}

impl Recorder {
    /// Open a new recording session
    pub fn open(
        factory: &dyn EncoderFactory,
        settings: EncoderSettings,
        sequence: u32,
        started_at: DateTime<Local>,
    ) -> PipelineResult<Self> {
        tracing::info!(
            "Opening recording #{} at {} to {:?}",
            sequence,
            settings.resolution,
            settings.path
        );

        let encoder = factory.open(&settings)?;
        Ok(Self {
            session: RecordingSession::new(settings, sequence, started_at),
            encoder,
        })
    }

    pub fn path(&self) -> &Path {
        self.session.path()
    }

    /// Encode one frame, resizing it to the session size when needed
    pub fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        let target = self.session.settings.resolution;
        if frame.resolution() == target {
            self.encoder.write_frame(frame)?;
        } else {
            let resized = resize_frame(frame, target.width, target.height)?;
            self.encoder.write_frame(&resized)?;
        }

        self.session.frames_written += 1;
        if self.session.frames_written.is_multiple_of(250) {
            tracing::debug!(
                "Recorded {} frames to {:?}",
                self.session.frames_written,
                self.session.path()
            );
        }
        Ok(())
    }

    /// Finalize the output file
    pub fn close(self) -> PipelineResult<RecordingSummary> {
        let Recorder { session, encoder } = self;
        let result = encoder.finish();
        let summary = session.end();

        match result {
            Ok(()) => {
                tracing::info!(
                    "Recording saved: {:?} ({} frames, {}ms)",
                    summary.path,
                    summary.frames_written,
                    summary.duration_ms
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Failed to finalize {:?}: {}", summary.path, e);
                Err(e)
            }
        }
    }
}

fn resize_frame(frame: &Frame, width: u32, height: u32) -> PipelineResult<Frame> {
    let source: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.data()).ok_or_else(|| {
            PipelineError::Encode(format!("frame {} has a short pixel buffer", frame.sequence()))
        })?;

    let resized = imageops::resize(&source, width, height, FilterType::Triangle);
    frame
        .with_pixels(width, height, resized.into_raw())
        .map_err(|e| PipelineError::Encode(e.to_string()))
}
