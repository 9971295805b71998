//! Pipeline configuration
//!
//! All values are fixed at startup. Nothing here is persisted.

use crate::recorder::state::RecordingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time to wait for the first frame of a new stream
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Default notification channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Stream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// Connectivity probe timeout in milliseconds
    pub probe_timeout_ms: u64,
}

impl StreamConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

/// Top-level configuration for a [`SessionController`](crate::pipeline::SessionController)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    pub recording: RecordingConfig,
    /// Capacity of the notification broadcast channel
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            recording: RecordingConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
