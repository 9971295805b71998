//! In-memory connector and encoder used by unit tests

use crate::frame::{Frame, PixelFormat, Resolution};
use crate::recorder::encoder::{EncoderFactory, VideoEncoder};
use crate::recorder::state::EncoderSettings;
use crate::stream::traits::{Connector, FrameReader};
use crate::stream::url::StreamUrl;
use crate::utils::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Ordered log shared between fakes to check cross-component ordering
pub type Timeline = Arc<Mutex<Vec<&'static str>>>;

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// What a fake camera does next
#[derive(Debug)]
pub enum Feed {
    Frame,
    Fail(String),
}

/// Drives one fake connection. Dropping it ends the stream.
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<Feed>,
}

impl FeedHandle {
    pub fn send_frames(&self, count: usize) {
        for _ in 0..count {
            let _ = self.tx.send(Feed::Frame);
        }
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Feed::Fail(message.to_string()));
    }
}

/// Connector serving queued in-memory streams
pub struct FakeConnector {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Feed>>>,
    connects: AtomicUsize,
    resolution: Resolution,
    timeline: Timeline,
}

impl FakeConnector {
    pub fn new(resolution: Resolution, timeline: Timeline) -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            resolution,
            timeline,
        }
    }

    /// Queue the stream served by the next successful connect
    pub fn add_stream(&self) -> FeedHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push_back(rx);
        FeedHandle { tx }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &StreamUrl) -> PipelineResult<Box<dyn FrameReader>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| PipelineError::Connection("connection refused".to_string()))?;

        Ok(Box::new(FakeReader {
            rx,
            next_sequence: 0,
            resolution: self.resolution,
            timeline: self.timeline.clone(),
        }))
    }
}

struct FakeReader {
    rx: mpsc::UnboundedReceiver<Feed>,
    next_sequence: u64,
    resolution: Resolution,
    timeline: Timeline,
}

#[async_trait]
impl FrameReader for FakeReader {
    async fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match self.rx.recv().await {
            Some(Feed::Frame) => {
                let Resolution { width, height } = self.resolution;
                let data = vec![(self.next_sequence % 256) as u8; (width * height * 3) as usize];
                let frame = Frame::new(width, height, PixelFormat::Rgb24, data, self.next_sequence)
                    .map_err(|e| PipelineError::Connection(e.to_string()))?;
                self.next_sequence += 1;
                Ok(Some(frame))
            }
            Some(Feed::Fail(message)) => Err(PipelineError::Connection(message)),
            None => Ok(None),
        }
    }
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.timeline.lock().push("source stopped");
    }
}

/// What a fake encoder observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    Opened(EncoderSettings),
    Frame { sequence: u64, resolution: Resolution },
    Finished,
}

#[derive(Default)]
struct FakeEncoderState {
    events: Mutex<Vec<EncoderEvent>>,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    fail_finish: AtomicBool,
}

/// Encoder factory recording every call
#[derive(Clone, Default)]
pub struct FakeEncoderFactory {
    state: Arc<FakeEncoderState>,
    timeline: Option<Timeline>,
}

impl FakeEncoderFactory {
    pub fn with_timeline(timeline: Timeline) -> Self {
        Self {
            state: Arc::default(),
            timeline: Some(timeline),
        }
    }

    pub fn fail_open(&self) {
        self.state.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_finish(&self) {
        self.state.fail_finish.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EncoderEvent> {
        self.state.events.lock().clone()
    }

    pub fn opened(&self) -> Vec<EncoderSettings> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EncoderEvent::Opened(settings) => Some(settings),
                _ => None,
            })
            .collect()
    }

    pub fn written_sequences(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EncoderEvent::Frame { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect()
    }

    pub fn written_sizes(&self) -> Vec<Resolution> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EncoderEvent::Frame { resolution, .. } => Some(resolution),
                _ => None,
            })
            .collect()
    }

    pub fn finish_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == EncoderEvent::Finished)
            .count()
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn open(&self, settings: &EncoderSettings) -> PipelineResult<Box<dyn VideoEncoder>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(PipelineError::EncoderInit("codec unavailable".to_string()));
        }
        self.state
            .events
            .lock()
            .push(EncoderEvent::Opened(settings.clone()));
        Ok(Box::new(FakeEncoder {
            state: self.state.clone(),
            timeline: self.timeline.clone(),
        }))
    }
}

struct FakeEncoder {
    state: Arc<FakeEncoderState>,
    timeline: Option<Timeline>,
}

impl VideoEncoder for FakeEncoder {
    fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Encode("broken pipe".to_string()));
        }
        self.state.events.lock().push(EncoderEvent::Frame {
            sequence: frame.sequence(),
            resolution: frame.resolution(),
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> PipelineResult<()> {
        self.state.events.lock().push(EncoderEvent::Finished);
        if let Some(timeline) = &self.timeline {
            timeline.lock().push("encoder closed");
        }
        if self.state.fail_finish.load(Ordering::SeqCst) {
            return Err(PipelineError::Encode("trailer not written".to_string()));
        }
        Ok(())
    }
}
