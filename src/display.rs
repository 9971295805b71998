//! Display consumer
//!
//! Runs on its own task and follows `FrameReady` notifications. Rendering
//! never touches the frame bus lock; it works on an `Arc` snapshot.

use crate::frame::Frame;
use crate::pipeline::state::PipelineEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Something that can show a frame
pub trait DisplaySink: Send + 'static {
    fn render(&mut self, frame: &Frame);
}

/// The frame currently on screen
#[derive(Debug, Default)]
pub struct DisplaySlot {
    current: Option<Arc<Frame>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `frame`, releasing the previous snapshot first
    pub fn adopt(&mut self, frame: Arc<Frame>) -> &Frame {
        drop(self.current.take());
        &**self.current.insert(frame)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

/// Render frames from `events` until shutdown
pub fn spawn_display<S: DisplaySink>(
    mut events: broadcast::Receiver<PipelineEvent>,
    mut sink: S,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut slot = DisplaySlot::new();
        loop {
            match events.recv().await {
                Ok(PipelineEvent::FrameReady(frame)) => {
                    sink.render(slot.adopt(frame));
                }
                Ok(PipelineEvent::StateChanged(state)) => {
                    if !state.is_streaming() {
                        slot.clear();
                    }
                }
                Ok(PipelineEvent::ShutdownComplete) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Display lagged, skipped {} events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Display task stopped");
    })
}

/// Sink that logs the display frame rate instead of drawing
pub struct FrameRateLogger {
    interval: Duration,
    window_start: Instant,
    frames: u32,
}

impl FrameRateLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            frames: 0,
        }
    }
}

impl Default for FrameRateLogger {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl DisplaySink for FrameRateLogger {
    fn render(&mut self, frame: &Frame) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.interval {
            tracing::info!(
                "Displaying {}x{} at {:.1} fps (frame #{})",
                frame.width(),
                frame.height(),
                self.frames as f64 / elapsed.as_secs_f64(),
                frame.sequence()
            );
            self.window_start = Instant::now();
            self.frames = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::pipeline::state::PipelineState;
    use parking_lot::Mutex;

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame::new(2, 2, PixelFormat::Rgb24, vec![0u8; 12], sequence).unwrap())
    }

    struct RecordingSink(Arc<Mutex<Vec<u64>>>);

    impl DisplaySink for RecordingSink {
        fn render(&mut self, frame: &Frame) {
            self.0.lock().push(frame.sequence());
        }
    }

    #[test]
    fn test_adopt_releases_previous_snapshot() {
        let first = frame(1);
        let mut slot = DisplaySlot::new();
        slot.adopt(first.clone());
        assert_eq!(Arc::strong_count(&first), 2);

        let shown = slot.adopt(frame(2));
        assert_eq!(shown.sequence(), 2);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[tokio::test]
    async fn test_display_renders_until_shutdown() {
        let (tx, rx) = broadcast::channel(16);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let task = spawn_display(rx, RecordingSink(rendered.clone()));

        tx.send(PipelineEvent::FrameReady(frame(1))).unwrap();
        tx.send(PipelineEvent::StateChanged(PipelineState::Streaming)).unwrap();
        tx.send(PipelineEvent::FrameReady(frame(2))).unwrap();
        tx.send(PipelineEvent::ShutdownComplete).unwrap();
        task.await.unwrap();

        assert_eq!(*rendered.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_display_skips_when_lagging() {
        let (tx, rx) = broadcast::channel(2);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        for sequence in 0..5 {
            tx.send(PipelineEvent::FrameReady(frame(sequence))).unwrap();
        }
        drop(tx);

        spawn_display(rx, RecordingSink(rendered.clone())).await.unwrap();

        // Only the newest frames are still buffered
        assert_eq!(*rendered.lock(), vec![3, 4]);
    }
}
