//! Live pipeline
//!
//! Connects a camera stream to the display and, on request, a recorder.

pub mod bus;
pub mod controller;
pub mod state;

pub use bus::FrameBus;
pub use controller::SessionController;
pub use state::{PipelineEvent, PipelineState};
