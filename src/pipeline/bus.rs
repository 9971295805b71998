//! Frame bus
//!
//! The single shared slot between the decode task and everything else: the
//! live flag, the latest frame and the open recorder sit behind one mutex so
//! a publish cycle (record, then replace the display frame) is atomic.

use crate::frame::Frame;
use crate::pipeline::state::{PipelineEvent, PipelineState};
use crate::recorder::state::RecordingSummary;
use crate::recorder::Recorder;
use crate::stream::traits::FrameObserver;
use crate::utils::error::{ErrorResponse, PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Default)]
struct BusSlot {
    live: bool,
    latest: Option<Arc<Frame>>,
    recorder: Option<Recorder>,
}

/// Hands frames from the stream to the display and the recorder
pub struct FrameBus {
    slot: Mutex<BusSlot>,
    events: broadcast::Sender<PipelineEvent>,
}

impl FrameBus {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            slot: Mutex::new(BusSlot::default()),
            events,
        }
    }

    /// Subscribe to pipeline notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> PipelineState {
        let slot = self.slot.lock();
        match (slot.live, slot.recorder.is_some()) {
            (false, _) => PipelineState::Idle,
            (true, false) => PipelineState::Streaming,
            (true, true) => PipelineState::StreamingRecording,
        }
    }

    /// Snapshot of the most recent frame
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().latest.clone()
    }

    /// Run one publish cycle for `frame`
    pub fn publish(&self, frame: Arc<Frame>) {
        let failed = {
            let mut slot = self.slot.lock();
            if !slot.live {
                return;
            }

            let failed = match slot.recorder.as_mut().map(|recorder| recorder.write_frame(&frame)) {
                Some(Err(e)) => slot.recorder.take().map(|recorder| (recorder, e)),
                _ => None,
            };
            slot.latest = Some(frame.clone());
            failed
        };

        self.notify(PipelineEvent::FrameReady(frame));

        if let Some((recorder, error)) = failed {
            tracing::error!("Recording to {:?} failed: {}", recorder.path(), error);
            if let Err(e) = self.finish_recording(recorder) {
                tracing::warn!("Partial recording could not be finalized: {}", e);
            }
            self.notify(PipelineEvent::Error(ErrorResponse::from(&error)));
            self.notify(PipelineEvent::StateChanged(self.state()));
        }
    }

    /// Start accepting frames
    pub(crate) fn go_live(&self, first_frame: Option<Arc<Frame>>) {
        {
            let mut slot = self.slot.lock();
            slot.live = true;
            slot.latest = first_frame.clone();
        }
        if let Some(frame) = first_frame {
            self.notify(PipelineEvent::FrameReady(frame));
        }
    }

    /// Stop accepting frames, handing back a recorder that was still open
    pub(crate) fn go_offline(&self) -> Option<Recorder> {
        let mut slot = self.slot.lock();
        slot.live = false;
        slot.latest = None;
        slot.recorder.take()
    }

    /// Like [`go_offline`](Self::go_offline), but `None` if the bus was not live
    pub(crate) fn mark_lost(&self) -> Option<Option<Recorder>> {
        let mut slot = self.slot.lock();
        if !slot.live {
            return None;
        }
        slot.live = false;
        slot.latest = None;
        Some(slot.recorder.take())
    }

    /// Open a recorder and attach it.
    ///
    /// `open` receives the latest frame and runs outside the lock so frames
    /// keep flowing while the encoder starts.
    pub(crate) fn start_recording(
        &self,
        open: impl FnOnce(Option<Arc<Frame>>) -> PipelineResult<Recorder>,
    ) -> PipelineResult<()> {
        let latest = {
            let slot = self.slot.lock();
            if !slot.live {
                return Err(PipelineError::PreconditionFailed("stream not active"));
            }
            if slot.recorder.is_some() {
                return Err(PipelineError::PreconditionFailed("already recording"));
            }
            slot.latest.clone()
        };

        let recorder = open(latest)?;

        let mut slot = self.slot.lock();
        if slot.live && slot.recorder.is_none() {
            slot.recorder = Some(recorder);
            return Ok(());
        }

        let error = if slot.live {
            PipelineError::PreconditionFailed("already recording")
        } else {
            PipelineError::Connection("stream lost while the recording was starting".to_string())
        };
        drop(slot);
        if let Err(e) = recorder.close() {
            tracing::debug!("Discarded recording did not finalize: {}", e);
        }
        Err(error)
    }

    /// Detach the open recorder, if any
    pub(crate) fn take_recorder(&self) -> Option<Recorder> {
        self.slot.lock().recorder.take()
    }

    /// Finalize a detached recorder and announce the saved file
    pub(crate) fn finish_recording(&self, recorder: Recorder) -> PipelineResult<RecordingSummary> {
        let summary = recorder.close()?;
        self.notify(PipelineEvent::RecordingSaved(summary.clone()));
        Ok(summary)
    }
}

impl FrameObserver for FrameBus {
    fn on_frame(&self, frame: &Arc<Frame>) {
        self.publish(frame.clone());
    }

    fn on_stream_lost(&self, error: &PipelineError) {
        let Some(recorder) = self.mark_lost() else {
            return;
        };

        if let Some(recorder) = recorder {
            tracing::warn!(
                "Stream lost while recording, finalizing {:?}",
                recorder.path()
            );
            if let Err(e) = self.finish_recording(recorder) {
                self.notify(PipelineEvent::Error(ErrorResponse::from(&e)));
            }
        }

        self.notify(PipelineEvent::Error(ErrorResponse::from(error)));
        self.notify(PipelineEvent::StateChanged(PipelineState::Idle));
    }
}
