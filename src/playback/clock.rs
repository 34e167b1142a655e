//! Frame clock for playback progress
//!
//! [`RepeatingTask`] is a cancellable per-frame loop on the tokio timer.
//! [`PlaybackClock`] uses it to sample the element position every frame and
//! post it to the controller as a [`Event::ClockTick`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::element::PlaybackElement;
use super::state_machine::Event;

/// Default frame interval (~60fps)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// A body run once per frame until it breaks or the task is cancelled.
///
/// Dropping the task cancels it.
pub struct RepeatingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Spawn `body` on the current runtime, first frame immediately.
    pub fn spawn<F>(period: Duration, mut body: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = ticker.tick() => {
                        if body().is_break() {
                            break;
                        }
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop before the next frame. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Samples playback position every frame for one playback run.
pub struct PlaybackClock {
    run_id: Uuid,
    task: RepeatingTask,
}

impl PlaybackClock {
    /// Start sampling `element`, posting ticks tagged with `run_id` to `events`.
    ///
    /// Stops on its own once the reported position reaches the duration or
    /// the controller is gone.
    pub fn start(
        element: Arc<dyn PlaybackElement>,
        events: mpsc::Sender<Event>,
        run_id: Uuid,
        frame_interval: Duration,
    ) -> Self {
        log::debug!("Starting playback clock for run {}", run_id);
        let duration = element.duration();

        let task = RepeatingTask::spawn(frame_interval, move || {
            let position = element.current_time();
            let finished = position >= duration;

            match events.try_send(Event::ClockTick { run_id, position }) {
                Ok(()) => {}
                // Controller is behind; the next frame samples again.
                Err(TrySendError::Full(_)) => return ControlFlow::Continue(()),
                Err(TrySendError::Closed(_)) => return ControlFlow::Break(()),
            }

            if finished {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        Self { run_id, task }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stop(&self) {
        log::debug!("Stopping playback clock for run {}", self.run_id);
        self.task.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
