//! Session controller
//!
//! The command surface for the presentation layer. Every start/stop request
//! goes through here; state is read back from the frame bus.

use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::pipeline::bus::FrameBus;
use crate::pipeline::state::{PipelineEvent, PipelineState};
use crate::recorder::encoder::{EncoderFactory, FfmpegEncoderFactory};
use crate::recorder::state::{recording_file_name, EncoderSettings, RecordingSummary};
use crate::recorder::Recorder;
use crate::stream::mjpeg::HttpConnector;
use crate::stream::source::{StreamHandle, StreamSource};
use crate::stream::traits::Connector;
use crate::stream::url::StreamUrl;
use crate::utils::error::{PipelineError, PipelineResult};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Orchestrates the stream, the frame bus and the recorder
pub struct SessionController {
    config: PipelineConfig,
    source: StreamSource,
    encoders: Arc<dyn EncoderFactory>,
    bus: Arc<FrameBus>,
    stream: Option<StreamHandle>,
    /// Last recording sequence number handed out in this run
    sequence: u32,
    /// Set by `shutdown`; no command is accepted afterwards
    shut_down: bool,
}

impl SessionController {
    /// Create a controller using HTTP MJPEG input and FFmpeg output
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let connector = Arc::new(HttpConnector::new()?);
        let encoders = Arc::new(FfmpegEncoderFactory::new());
        Ok(Self::with_backends(config, connector, encoders))
    }

    /// Create a controller with custom input and output backends
    pub fn with_backends(
        config: PipelineConfig,
        connector: Arc<dyn Connector>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        let source = StreamSource::new(connector, config.stream.probe_timeout());
        let bus = Arc::new(FrameBus::new(config.event_capacity));
        Self {
            config,
            source,
            encoders,
            bus,
            stream: None,
            sequence: 0,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the current pipeline state
    pub fn state(&self) -> PipelineState {
        self.bus.state()
    }

    /// Subscribe to pipeline notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.bus.subscribe()
    }

    /// Most recent frame, if streaming
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.bus.latest()
    }

    /// URL of the active stream
    pub fn stream_url(&self) -> Option<&StreamUrl> {
        self.stream.as_ref().map(|stream| stream.url())
    }

    /// Connect to a camera and start streaming
    pub async fn start_streaming(&mut self, url: &str) -> PipelineResult<()> {
        self.ensure_running()?;
        let url = StreamUrl::parse(url).inspect_err(|e| tracing::warn!("{}", e))?;

        self.reap_lost_stream().await;
        if self.stream.is_some() {
            return Err(PipelineError::PreconditionFailed("stream already active"));
        }

        let mut handle = self.source.start(url, self.bus.clone()).await?;
        self.bus.go_live(handle.take_first_frame());

        // The stream may have died between the probe and going live
        if !handle.is_running() {
            let reason = handle
                .last_error()
                .unwrap_or_else(|| "stream ended".to_string());
            self.bus.go_offline();
            handle.stop().await;
            return Err(PipelineError::Connection(reason));
        }

        self.stream = Some(handle);
        self.bus
            .notify(PipelineEvent::StateChanged(PipelineState::Streaming));
        Ok(())
    }

    /// Start recording the live stream to a new file
    pub fn start_recording(&mut self) -> PipelineResult<PathBuf> {
        self.ensure_running()?;
        match self.state() {
            PipelineState::Idle => {
                return Err(PipelineError::PreconditionFailed("stream not active"));
            }
            PipelineState::StreamingRecording => {
                return Err(PipelineError::PreconditionFailed("already recording"));
            }
            PipelineState::Streaming => {}
        }

        self.sequence += 1;
        let sequence = self.sequence;
        let started_at = Local::now();
        let recording = &self.config.recording;
        let path = recording
            .output_dir
            .join(recording_file_name(started_at, sequence, recording.codec));

        let encoders = self.encoders.clone();
        let open_path = path.clone();
        let fixed_size = recording.frame_size;
        let (frame_rate, bitrate, codec) = (recording.frame_rate, recording.bitrate, recording.codec);

        self.bus
            .start_recording(move |latest| {
                let resolution = fixed_size
                    .or_else(|| latest.map(|frame| frame.resolution()))
                    .ok_or(PipelineError::PreconditionFailed("no frame received yet"))?;
                let settings = EncoderSettings::new(open_path, resolution, frame_rate, bitrate, codec);
                Recorder::open(encoders.as_ref(), settings, sequence, started_at)
            })
            .inspect_err(|e| tracing::warn!("Failed to start recording: {}", e))?;

        tracing::info!("Recording started: {:?}", path);
        self.bus.notify(PipelineEvent::StateChanged(
            PipelineState::StreamingRecording,
        ));
        Ok(path)
    }

    /// Stop recording and finalize the file
    pub fn stop_recording(&mut self) -> PipelineResult<RecordingSummary> {
        let recorder = self
            .bus
            .take_recorder()
            .ok_or(PipelineError::PreconditionFailed("not recording"))?;

        tracing::info!("Stopping recording: {:?}", recorder.path());
        let result = self.bus.finish_recording(recorder);
        self.bus.notify(PipelineEvent::StateChanged(self.state()));
        result
    }

    /// Stop the stream, stopping any recording first
    pub async fn stop_streaming(&mut self) -> PipelineResult<()> {
        self.reap_lost_stream().await;
        let Some(handle) = self.stream.take() else {
            return Err(PipelineError::PreconditionFailed("stream not active"));
        };

        let mut result = Ok(());
        if self.state().is_recording() {
            if let Err(e) = self.stop_recording() {
                tracing::warn!("Recording did not finalize cleanly: {}", e);
                result = Err(e);
            }
        }

        // Anything that raced in after the check above
        if let Some(recorder) = self.bus.go_offline() {
            if let Err(e) = self.bus.finish_recording(recorder) {
                tracing::warn!("Recording did not finalize cleanly: {}", e);
            }
        }
        handle.stop().await;

        self.bus
            .notify(PipelineEvent::StateChanged(PipelineState::Idle));
        result
    }

    /// Stop everything. Recording is finalized before the stream is torn down.
    ///
    /// The controller accepts no further commands; calling this again does
    /// nothing.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        tracing::info!("Shutting down pipeline from state {}", self.state());

        if self.state().is_recording() {
            match self.stop_recording() {
                Ok(summary) => tracing::info!("Recording saved to {:?}", summary.path),
                Err(e) => tracing::warn!("Recording did not finalize cleanly: {}", e),
            }
        }

        if let Some(handle) = self.stream.take() {
            let was_live = self.state().is_streaming();
            if let Some(recorder) = self.bus.go_offline() {
                if let Err(e) = self.bus.finish_recording(recorder) {
                    tracing::warn!("Recording did not finalize cleanly: {}", e);
                }
            }
            handle.stop().await;
            if was_live {
                self.bus
                    .notify(PipelineEvent::StateChanged(PipelineState::Idle));
            }
        }

        self.bus.notify(PipelineEvent::ShutdownComplete);
        tracing::info!("Pipeline shut down");
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        if self.shut_down {
            return Err(PipelineError::PreconditionFailed("pipeline shut down"));
        }
        Ok(())
    }

    /// Join a stream that ended on its own
    async fn reap_lost_stream(&mut self) {
        let lost = self
            .stream
            .as_ref()
            .is_some_and(|stream| !stream.is_running());
        if !lost {
            return;
        }

        if let Some(handle) = self.stream.take() {
            tracing::info!(
                "Cleaning up lost stream {}: {}",
                handle.url(),
                handle.last_error().unwrap_or_default()
            );
            handle.stop().await;
        }
    }
}
