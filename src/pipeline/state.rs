//! Pipeline state and notifications

use crate::frame::Frame;
use crate::recorder::state::RecordingSummary;
use crate::utils::error::ErrorResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Current state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    /// No stream
    #[default]
    Idle,
    /// Stream is live, nothing is being recorded
    Streaming,
    /// Stream is live and every frame is recorded
    StreamingRecording,
}

impl PipelineState {
    pub fn is_streaming(&self) -> bool {
        !matches!(self, PipelineState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, PipelineState::StreamingRecording)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Streaming => "streaming",
            PipelineState::StreamingRecording => "streaming+recording",
        };
        f.write_str(name)
    }
}

/// Notifications delivered to the presentation layer
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A new frame is ready for display
    FrameReady(Arc<Frame>),
    /// The pipeline moved to a new state
    StateChanged(PipelineState),
    /// A recording was finalized
    RecordingSaved(RecordingSummary),
    /// Something failed outside of a command call
    Error(ErrorResponse),
    /// Shutdown finished; no further events follow
    ShutdownComplete,
}
