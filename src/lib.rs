//! IP Camcorder - live MJPEG camera viewing and recording.
//!
//! This is the core library: it connects to an IP camera, keeps the latest
//! frame available for display and records the stream to a video file on
//! request. Presentation layers drive it through [`SessionController`].

pub mod config;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod recorder;
pub mod stream;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use frame::{Frame, PixelFormat, Resolution};
pub use pipeline::{PipelineEvent, PipelineState, SessionController};
pub use recorder::RecordingSummary;
pub use utils::error::{ErrorResponse, PipelineError, PipelineResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ip_camcorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IP Camcorder v{}", env!("CARGO_PKG_VERSION"));
}
