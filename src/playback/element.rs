//! Playback elements
//!
//! A [`PlaybackElement`] is the thing that actually makes (or pretends to
//! make) sound. The controller drives it through play/pause/seek and the clock
//! samples its position.

use std::sync::Mutex;

use tokio::time::Instant;

/// Errors reported by a playback element.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("no audio output device found")]
    NoOutputDevice,
    #[error("audio output failed: {0}")]
    Device(String),
    #[error("nothing to play")]
    Empty,
}

/// Host playback capability for one clip.
pub trait PlaybackElement: Send + Sync + 'static {
    fn play(&self) -> Result<(), PlaybackError>;
    fn pause(&self);
    /// Move the playhead, in seconds. Out-of-range positions are clamped.
    fn seek(&self, position: f64);
    /// Current playhead in seconds.
    fn current_time(&self) -> f64;
    /// Total length in seconds.
    fn duration(&self) -> f64;
}

#[derive(Debug)]
struct Timeline {
    /// Position when `started_at` was taken (or the frozen position when paused).
    offset: f64,
    started_at: Option<Instant>,
}

/// Silent element that advances with the tokio clock.
///
/// Used on hosts without audio output and in tests, where paused tokio time
/// makes playback fully deterministic.
#[derive(Debug)]
pub struct TimelineElement {
    duration: f64,
    timeline: Mutex<Timeline>,
}

impl TimelineElement {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: if duration.is_finite() { duration.max(0.0) } else { 0.0 },
            timeline: Mutex::new(Timeline {
                offset: 0.0,
                started_at: None,
            }),
        }
    }

    fn position(&self, timeline: &Timeline) -> f64 {
        let elapsed = timeline
            .started_at
            .map_or(0.0, |at| at.elapsed().as_secs_f64());
        (timeline.offset + elapsed).min(self.duration)
    }

    fn with_timeline<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        match self.timeline.lock() {
            Ok(mut timeline) => f(&mut timeline),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl PlaybackElement for TimelineElement {
    fn play(&self) -> Result<(), PlaybackError> {
        if self.duration <= 0.0 {
            return Err(PlaybackError::Empty);
        }
        self.with_timeline(|t| {
            if t.started_at.is_none() {
                t.started_at = Some(Instant::now());
            }
        });
        Ok(())
    }

    fn pause(&self) {
        self.with_timeline(|t| {
            let position = self.position(t);
            t.offset = position;
            t.started_at = None;
        });
    }

    fn seek(&self, position: f64) {
        let position = position.clamp(0.0, self.duration);
        self.with_timeline(|t| {
            t.offset = position;
            if t.started_at.is_some() {
                t.started_at = Some(Instant::now());
            }
        });
    }

    fn current_time(&self) -> f64 {
        self.with_timeline(|t| self.position(t))
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn timeline_advances_only_while_playing() {
        let element = TimelineElement::new(5.0);
        element.play().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!((element.current_time() - 2.0).abs() < 1e-6);

        element.pause();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!((element.current_time() - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn timeline_stops_at_duration() {
        let element = TimelineElement::new(1.0);
        element.play().unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(element.current_time(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_rewinds_running_timeline() {
        let element = TimelineElement::new(10.0);
        element.play().unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        element.seek(0.0);
        assert!(element.current_time() < 1e-6);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!((element.current_time() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_timeline_refuses_to_play() {
        assert_eq!(TimelineElement::new(0.0).play(), Err(PlaybackError::Empty));
    }
}
