//! Stream trait definitions
//!
//! Transport-agnostic seams between the network side and the pipeline.

use crate::frame::Frame;
use crate::stream::url::StreamUrl;
use crate::utils::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Opens connections to a camera
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and return a reader positioned at the first frame
    async fn connect(&self, url: &StreamUrl) -> PipelineResult<Box<dyn FrameReader>>;
}

/// Yields decoded frames from one connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` when the camera closed the stream.
    ///
    /// Must be cancel-safe: the decode loop drops this future when asked to stop.
    async fn next_frame(&mut self) -> PipelineResult<Option<Frame>>;
}

/// Receives frames emitted by a running stream
pub trait FrameObserver: Send + Sync {
    /// Called on the decode task for every frame. Must return promptly.
    fn on_frame(&self, frame: &Arc<Frame>);

    /// Called once if the stream ends without being asked to stop
    fn on_stream_lost(&self, _error: &PipelineError) {}
}
