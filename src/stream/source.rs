//! Stream source
//!
//! Owns the decode task for one camera connection. Frames are fanned out to
//! registered [`FrameObserver`]s on the decode task itself.

use crate::frame::Frame;
use crate::stream::traits::{Connector, FrameObserver, FrameReader};
use crate::stream::url::StreamUrl;
use crate::utils::error::{PipelineError, PipelineResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    observers: RwLock<Vec<(u64, Arc<dyn FrameObserver>)>>,
}

/// Observers of one stream
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<RegistryInner>,
}

impl ObserverRegistry {
    /// Register an observer for as long as the returned guard lives
    pub fn register(&self, observer: Arc<dyn FrameObserver>) -> ObserverGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().push((id, observer));
        ObserverGuard {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, frame: &Arc<Frame>) {
        for (_, observer) in self.inner.observers.read().iter() {
            observer.on_frame(frame);
        }
    }

    fn emit_lost(&self, error: &PipelineError) {
        for (_, observer) in self.inner.observers.read().iter() {
            observer.on_stream_lost(error);
        }
    }
}

/// Unregisters its observer when dropped
pub struct ObserverGuard {
    registry: Weak<RegistryInner>,
    id: u64,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.observers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// One-shot observer used by the connectivity probe
struct ProbeObserver {
    tx: Mutex<Option<oneshot::Sender<Arc<Frame>>>>,
}

impl FrameObserver for ProbeObserver {
    fn on_frame(&self, frame: &Arc<Frame>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(frame.clone());
        }
    }
}

#[derive(Default)]
struct StreamStatus {
    running: AtomicBool,
    frames: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Starts camera streams
pub struct StreamSource {
    connector: Arc<dyn Connector>,
    probe_timeout: Duration,
}

impl StreamSource {
    pub fn new(connector: Arc<dyn Connector>, probe_timeout: Duration) -> Self {
        Self {
            connector,
            probe_timeout,
        }
    }

    /// Connect, wait for a first frame, then hand frames to `observer`.
    ///
    /// Connecting and probing share one deadline of `probe_timeout`.
    pub async fn start(
        &self,
        url: StreamUrl,
        observer: Arc<dyn FrameObserver>,
    ) -> PipelineResult<StreamHandle> {
        tracing::info!("Starting stream from {}", url);
        let deadline = Instant::now() + self.probe_timeout;

        let reader = match tokio::time::timeout_at(deadline, self.connector.connect(&url)).await {
            Ok(reader) => reader?,
            Err(_) => {
                tracing::warn!("Timed out connecting to {}", url);
                return Err(PipelineError::StreamUnavailable(self.probe_timeout));
            }
        };

        let registry = ObserverRegistry::default();
        let status = Arc::new(StreamStatus::default());
        status.running.store(true, Ordering::SeqCst);
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut task = tokio::spawn(run_decode_loop(
            reader,
            registry.clone(),
            stop_rx,
            status.clone(),
        ));

        let probed = await_first_frame(&registry, &mut task, deadline, self.probe_timeout).await;

        let first_frame = match probed {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Stream probe failed for {}: {}", url, e);
                let _ = stop_tx.send(true);
                if !task.is_finished() {
                    let _ = task.await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Stream {} is live ({}x{})",
            url,
            first_frame.width(),
            first_frame.height()
        );

        let observer = registry.register(observer);
        Ok(StreamHandle {
            url,
            status,
            stop_tx,
            task: Some(task),
            first_frame: Some(first_frame),
            _observer: observer,
        })
    }
}

/// Wait for the first frame through a temporary observer.
///
/// The observer is unregistered before this returns, whatever the outcome.
async fn await_first_frame(
    registry: &ObserverRegistry,
    task: &mut JoinHandle<PipelineResult<()>>,
    deadline: Instant,
    timeout: Duration,
) -> PipelineResult<Arc<Frame>> {
    let (tx, first_frame) = oneshot::channel();
    let _probe = registry.register(Arc::new(ProbeObserver {
        tx: Mutex::new(Some(tx)),
    }));

    tokio::select! {
        frame = first_frame => frame.map_err(|_| {
            PipelineError::Connection("stream ended before the first frame".to_string())
        }),
        joined = task => Err(match joined {
            Ok(Err(e)) => e,
            Ok(Ok(())) => PipelineError::Connection("stream ended before the first frame".to_string()),
            Err(e) => PipelineError::Connection(format!("decode task failed: {}", e)),
        }),
        _ = tokio::time::sleep_until(deadline) => Err(PipelineError::StreamUnavailable(timeout)),
    }
}

/// A running stream
pub struct StreamHandle {
    url: StreamUrl,
    status: Arc<StreamStatus>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<PipelineResult<()>>>,
    first_frame: Option<Arc<Frame>>,
    _observer: ObserverGuard,
}

impl StreamHandle {
    pub fn url(&self) -> &StreamUrl {
        &self.url
    }

    /// False once the decode task has exited
    pub fn is_running(&self) -> bool {
        self.status.running.load(Ordering::SeqCst)
    }

    /// Frames decoded so far, including the probe frame
    pub fn frames_decoded(&self) -> u64 {
        self.status.frames.load(Ordering::Relaxed)
    }

    /// Why the stream ended, if it ended on its own
    pub fn last_error(&self) -> Option<String> {
        self.status.last_error.lock().clone()
    }

    /// The frame that satisfied the probe
    pub fn take_first_frame(&mut self) -> Option<Arc<Frame>> {
        self.first_frame.take()
    }

    /// Stop the decode task and wait for it to exit.
    ///
    /// No frame is emitted after this returns.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Stream {} had already ended: {}", self.url, e),
                Err(e) => tracing::error!("Decode task for {} failed: {}", self.url, e),
            }
        }
        tracing::info!(
            "Stream {} stopped after {} frames",
            self.url,
            self.frames_decoded()
        );
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            // Not joined; the task exits at its next stop check
            let _ = self.stop_tx.send(true);
        }
    }
}

async fn run_decode_loop(
    mut reader: Box<dyn FrameReader>,
    registry: ObserverRegistry,
    mut stop_rx: watch::Receiver<bool>,
    status: Arc<StreamStatus>,
) -> PipelineResult<()> {
    let result = loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break Ok(()),

            next = reader.next_frame() => match next {
                Ok(Some(frame)) => {
                    let count = status.frames.fetch_add(1, Ordering::Relaxed) + 1;
                    if count.is_multiple_of(500) {
                        tracing::debug!("Decoded {} frames", count);
                    }
                    registry.emit(&Arc::new(frame));
                }
                Ok(None) => break Err(PipelineError::Connection("camera closed the stream".to_string())),
                Err(e) => break Err(e),
            },
        }
    };

    // Close the connection before reporting the stream as stopped
    drop(reader);
    status.running.store(false, Ordering::SeqCst);

    if let Err(e) = &result {
        tracing::warn!("Stream lost: {}", e);
        *status.last_error.lock() = Some(e.to_string());
        registry.emit_lost(e);
    }
    result
}
