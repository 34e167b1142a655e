//! Playback state machine
//!
//! All playback transitions go through the pure `reduce()` function, which
//! returns the next state plus the effects the controller loop must execute.
//! Clock ticks carry the id of the run that produced them so ticks from a
//! cancelled clock can be recognized and dropped.

use uuid::Uuid;

/// Phase of one clip's playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Playing {
        run_id: Uuid,
    },
    Ended,
}

/// Authoritative playback state of one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub phase: Phase,
    /// Seconds, always within `[0, duration]`.
    pub current_time: f64,
    /// Seconds; `0` when unknown or nothing is loaded.
    pub duration: f64,
}

impl PlaybackState {
    pub fn new(duration: f64) -> Self {
        let duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            0.0
        };
        Self {
            phase: Phase::Idle,
            current_time: 0.0,
            duration,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.phase, Phase::Playing { .. })
    }

    /// Id of the active clock run, if playing.
    pub fn run_id(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Playing { run_id } => Some(run_id),
            _ => None,
        }
    }

    /// Playback is only possible once a positive duration is known.
    pub fn can_play(&self) -> bool {
        self.duration > 0.0
    }

    fn clamp(&self, position: f64) -> f64 {
        if position.is_nan() {
            return self.current_time;
        }
        position.clamp(0.0, self.duration)
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Events that drive the playback state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// User pressed play/pause
    Toggle,
    /// Position sampled by the clock of run `run_id`
    ClockTick { run_id: Uuid, position: f64 },
    /// Another clip in the same exclusive group started playing
    Preempted,
    /// The playback element refused to start
    PlaybackFailed { run_id: Uuid, message: String },
}

/// Effects to be executed after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Play,
    Pause,
    Seek { position: f64 },
    StartClock { run_id: Uuid },
    StopClock,
    /// Tell the playback group this view started playing
    Announce,
    /// Publish the new state to observers
    EmitState,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore clock ticks and failures from stale runs
/// - `current_time` never moves backwards while playing
pub fn reduce(state: &PlaybackState, event: Event) -> (PlaybackState, Vec<Effect>) {
    use Effect::*;
    use Event::*;

    match (state.phase, event) {
        // -----------------
        // Idle / Ended
        // -----------------
        (Phase::Idle, Toggle) if !state.can_play() => (*state, vec![]),
        (Phase::Idle, Toggle) if state.current_time < state.duration => {
            let run_id = Uuid::new_v4();
            (
                PlaybackState {
                    phase: Phase::Playing { run_id },
                    ..*state
                },
                vec![Play, StartClock { run_id }, Announce, EmitState],
            )
        }
        (Phase::Idle, Toggle) | (Phase::Ended, Toggle) => restart(state),

        // -----------------
        // Playing
        // -----------------
        (Phase::Playing { .. }, Toggle) => (
            PlaybackState {
                phase: Phase::Idle,
                ..*state
            },
            vec![Pause, StopClock, EmitState],
        ),
        (Phase::Playing { run_id }, ClockTick { run_id: tick_run, position })
            if run_id == tick_run =>
        {
            if position >= state.duration {
                log::debug!("Playback run {} reached the end", run_id);
                (
                    PlaybackState {
                        phase: Phase::Ended,
                        current_time: state.duration,
                        duration: state.duration,
                    },
                    vec![Pause, StopClock, EmitState],
                )
            } else {
                let current_time = state.current_time.max(state.clamp(position));
                (
                    PlaybackState {
                        current_time,
                        ..*state
                    },
                    vec![EmitState],
                )
            }
        }
        (Phase::Playing { .. }, Preempted) => (
            PlaybackState {
                phase: Phase::Idle,
                ..*state
            },
            vec![Pause, StopClock, EmitState],
        ),
        (Phase::Playing { run_id }, PlaybackFailed { run_id: failed, message })
            if run_id == failed =>
        {
            log::warn!("Playback run {} failed: {}", run_id, message);
            (
                PlaybackState {
                    phase: Phase::Idle,
                    ..*state
                },
                vec![StopClock, EmitState],
            )
        }

        // -----------------
        // Stale ticks, stray preemption: no transition
        // -----------------
        _ => (*state, vec![]),
    }
}

/// Rewind to the start and play.
fn restart(state: &PlaybackState) -> (PlaybackState, Vec<Effect>) {
    let run_id = Uuid::new_v4();
    (
        PlaybackState {
            phase: Phase::Playing { run_id },
            current_time: 0.0,
            duration: state.duration,
        },
        vec![
            Effect::Seek { position: 0.0 },
            Effect::Play,
            Effect::StartClock { run_id },
            Effect::Announce,
            Effect::EmitState,
        ],
    )
}
