//! Playback controller loop
//!
//! Single-writer loop owning one view's [`PlaybackState`]. Events (user
//! toggles, clock ticks, preemption) arrive on an mpsc channel, go through
//! `reduce()`, and the resulting effects are executed here: element calls,
//! clock start/stop and state publication on a watch channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::clock::{PlaybackClock, DEFAULT_FRAME_INTERVAL};
use super::element::PlaybackElement;
use super::state_machine::{reduce, Effect, Event, PlaybackState};

/// Capacity of the controller event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Announcements a slow group member may fall behind by before it lags
const GROUP_CHANNEL_CAPACITY: usize = 16;

/// How simultaneous playback of several clips is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPolicy {
    /// Every clip plays independently.
    #[default]
    Concurrent,
    /// Starting one clip pauses every other clip in the same group.
    Exclusive,
}

/// Controllers sharing a group preempt each other when one starts playing.
#[derive(Debug, Clone)]
pub struct PlaybackGroup {
    tx: broadcast::Sender<Uuid>,
}

impl PlaybackGroup {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(GROUP_CHANNEL_CAPACITY);
        Self { tx }
    }

    fn announce(&self, controller: Uuid) {
        // No receivers just means nobody else is listening.
        let _ = self.tx.send(controller);
    }

    fn subscribe(&self) -> broadcast::Receiver<Uuid> {
        self.tx.subscribe()
    }
}

impl Default for PlaybackGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller options.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub frame_interval: Duration,
    /// Exclusive playback group, `None` for concurrent playback.
    pub group: Option<PlaybackGroup>,
}

impl ControllerConfig {
    /// Join `group` only when the policy asks for exclusive playback.
    pub fn for_policy(
        policy: PlaybackPolicy,
        group: &PlaybackGroup,
        frame_interval: Duration,
    ) -> Self {
        Self {
            frame_interval,
            group: match policy {
                PlaybackPolicy::Concurrent => None,
                PlaybackPolicy::Exclusive => Some(group.clone()),
            },
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            group: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    #[error("playback controller has shut down")]
    Closed,
}

/// Handle to a running controller loop. Dropping it shuts the loop down.
pub struct PlaybackController {
    id: Uuid,
    events: mpsc::Sender<Event>,
    state_rx: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PlaybackController {
    /// Start the controller loop for `element` on the current runtime.
    pub fn spawn(element: Arc<dyn PlaybackElement>, config: ControllerConfig) -> Self {
        let id = Uuid::new_v4();
        let initial = PlaybackState::new(element.duration());
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        log::debug!(
            "Spawning playback controller {} (duration {:.2}s)",
            id,
            initial.duration
        );

        let ctl = ControllerLoop {
            id,
            element,
            config,
            events: events.clone(),
            state_tx,
            cancel: cancel.clone(),
            state: initial,
            clock: None,
        };
        let handle = tokio::spawn(run_loop(ctl, rx));

        Self {
            id,
            events,
            state_rx,
            cancel,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Play/pause.
    pub async fn toggle(&self) -> Result<(), ControllerError> {
        self.send(Event::Toggle).await
    }

    async fn send(&self, event: Event) -> Result<(), ControllerError> {
        if self.cancel.is_cancelled() {
            return Err(ControllerError::Closed);
        }
        self.events
            .send(event)
            .await
            .map_err(|_| ControllerError::Closed)
    }

    /// Latest published state.
    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    /// Watch every published state.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }

    /// Stop the loop: cancels the clock and pauses the element.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            log::debug!("Shutting down playback controller {}", self.id);
        }
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ControllerLoop {
    id: Uuid,
    element: Arc<dyn PlaybackElement>,
    config: ControllerConfig,
    /// Sender handed to clocks
    events: mpsc::Sender<Event>,
    state_tx: watch::Sender<PlaybackState>,
    cancel: CancellationToken,
    state: PlaybackState,
    clock: Option<PlaybackClock>,
}

async fn run_loop(mut ctl: ControllerLoop, mut rx: mpsc::Receiver<Event>) {
    let mut group_rx = ctl.config.group.as_ref().map(PlaybackGroup::subscribe);

    loop {
        let event = tokio::select! {
            biased;

            _ = ctl.cancel.cancelled() => break,

            msg = rx.recv() => match msg {
                Some(event) => event,
                None => break,
            },

            signal = next_announcement(&mut group_rx) => match signal {
                GroupSignal::Announced(other) if other != ctl.id => Event::Preempted,
                // Any of the skipped announcements may have been a preemption
                GroupSignal::Lagged if ctl.state.is_playing() => Event::Preempted,
                _ => continue,
            },
        };

        ctl.dispatch(event);
    }

    ctl.teardown();
}

enum GroupSignal {
    Announced(Uuid),
    Lagged,
    Closed,
}

/// Next signal from the group; pending forever without a group.
async fn next_announcement(group: &mut Option<broadcast::Receiver<Uuid>>) -> GroupSignal {
    let Some(rx) = group.as_mut() else {
        return std::future::pending().await;
    };

    let result = rx.recv().await;
    match result {
        Ok(id) => GroupSignal::Announced(id),
        Err(RecvError::Lagged(skipped)) => {
            log::warn!("Playback group lagged, skipped {} announcements", skipped);
            GroupSignal::Lagged
        }
        Err(RecvError::Closed) => {
            *group = None;
            GroupSignal::Closed
        }
    }
}

impl ControllerLoop {
    /// Apply one event and any follow-up events its effects produce.
    fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            log::debug!("Playback {}: {:?} in {:?}", self.id, event, self.state.phase);
            let (next, effects) = reduce(&self.state, event);
            self.state = next;

            for effect in effects {
                if let Err(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                    break;
                }
            }
        }
    }

    /// Run one effect. A failed `Play` aborts the batch and reports back.
    fn execute(&mut self, effect: Effect) -> Result<(), Event> {
        match effect {
            Effect::Play => {
                if let Err(e) = self.element.play() {
                    log::error!("Playback {} failed to start: {}", self.id, e);
                    if let Some(run_id) = self.state.run_id() {
                        return Err(Event::PlaybackFailed {
                            run_id,
                            message: e.to_string(),
                        });
                    }
                }
            }
            Effect::Pause => self.element.pause(),
            Effect::Seek { position } => self.element.seek(position),
            Effect::StartClock { run_id } => {
                self.stop_clock();
                self.clock = Some(PlaybackClock::start(
                    self.element.clone(),
                    self.events.clone(),
                    run_id,
                    self.config.frame_interval,
                ));
            }
            Effect::StopClock => self.stop_clock(),
            Effect::Announce => {
                if let Some(group) = &self.config.group {
                    group.announce(self.id);
                }
            }
            Effect::EmitState => {
                self.state_tx.send_replace(self.state);
            }
        }
        Ok(())
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.stop();
        }
    }

    fn teardown(&mut self) {
        self.stop_clock();
        if self.state.is_playing() {
            self.element.pause();
        }
        log::debug!("Playback controller {} stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::element::{PlaybackError, TimelineElement};
    use crate::playback::state_machine::Phase;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct BrokenSpeaker {
        played: AtomicBool,
    }

    impl PlaybackElement for BrokenSpeaker {
        fn play(&self) -> Result<(), PlaybackError> {
            self.played.store(true, Ordering::SeqCst);
            Err(PlaybackError::Device("unplugged".into()))
        }
        fn pause(&self) {}
        fn seek(&self, _position: f64) {}
        fn current_time(&self) -> f64 {
            0.0
        }
        fn duration(&self) -> f64 {
            3.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_plays_and_pauses() {
        let element = Arc::new(TimelineElement::new(10.0));
        let controller = PlaybackController::spawn(element.clone(), ControllerConfig::default());
        let mut states = controller.subscribe();

        controller.toggle().await.unwrap();
        states.wait_for(|s| s.is_playing()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        controller.toggle().await.unwrap();
        let paused = *states.wait_for(|s| s.phase == Phase::Idle).await.unwrap();
        assert!(paused.current_time > 1.5 && paused.current_time <= 2.1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((element.current_time() - paused.current_time).abs() < 0.05);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_returns_to_idle() {
        let element = Arc::new(BrokenSpeaker {
            played: AtomicBool::new(false),
        });
        let controller = PlaybackController::spawn(element.clone(), ControllerConfig::default());

        controller.toggle().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(element.played.load(Ordering::SeqCst));
        assert_eq!(controller.state().phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_pauses_and_rejects_toggles() {
        let element = Arc::new(TimelineElement::new(10.0));
        let controller = PlaybackController::spawn(element.clone(), ControllerConfig::default());
        let mut states = controller.subscribe();
        controller.toggle().await.unwrap();
        states.wait_for(|s| s.is_playing()).await.unwrap();

        controller.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(controller.is_finished());
        assert_eq!(controller.toggle().await, Err(ControllerError::Closed));

        let frozen = element.current_time();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(element.current_time(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_behind_the_group_still_preempts() {
        let group = PlaybackGroup::new();
        let config = ControllerConfig::for_policy(
            PlaybackPolicy::Exclusive,
            &group,
            DEFAULT_FRAME_INTERVAL,
        );
        let controller = PlaybackController::spawn(Arc::new(TimelineElement::new(10.0)), config);
        let mut states = controller.subscribe();
        controller.toggle().await.unwrap();
        states.wait_for(|s| s.is_playing()).await.unwrap();

        // Another clip starts, then the channel overflows before this loop reads it.
        group.announce(Uuid::new_v4());
        for _ in 0..GROUP_CHANNEL_CAPACITY + 4 {
            group.announce(controller.id());
        }

        let state = *states.wait_for(|s| !s.is_playing()).await.unwrap();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.current_time < 1.0);
    }

    #[test]
    fn policy_parses_lowercase() {
        let policy: PlaybackPolicy = serde_json::from_str("\"exclusive\"").unwrap();
        assert_eq!(policy, PlaybackPolicy::Exclusive);
        let group = PlaybackGroup::new();
        let config = ControllerConfig::for_policy(
            PlaybackPolicy::Concurrent,
            &group,
            DEFAULT_FRAME_INTERVAL,
        );
        assert!(config.group.is_none());
    }
}
