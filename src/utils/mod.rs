//! Shared utilities

pub mod error;

pub use error::{ErrorKind, ErrorResponse, PipelineError, PipelineResult};
