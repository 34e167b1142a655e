//! Clip playback
//!
//! A pure state machine (`state_machine`) decides, a controller loop
//! (`controller`) executes, a frame clock (`clock`) reports progress, and a
//! playback element (`element`, or the speaker in `audio::output`) produces
//! the sound.

pub mod clock;
pub mod controller;
pub mod element;
pub mod state_machine;

pub use clock::{PlaybackClock, RepeatingTask, DEFAULT_FRAME_INTERVAL};
pub use controller::{
    ControllerConfig, ControllerError, PlaybackController, PlaybackGroup, PlaybackPolicy,
};
pub use element::{PlaybackElement, PlaybackError, TimelineElement};
pub use state_machine::{reduce, Effect, Event, Phase, PlaybackState};
