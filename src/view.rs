//! Waveform view for one clip
//!
//! Owns everything one on-screen clip needs: the in-flight decode, the
//! decoded buffer, its envelope, a playback controller and the surface it
//! paints on. The view repaints only when the envelope, the progress ratio or
//! the theme changed since the last paint.
//!
//! Teardown (explicit or on drop) cancels the decode, shuts the controller
//! down (which stops the clock) and releases the buffer.

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::ClipFetcher;
use crate::audio::{AudioDecoder, ClipLoader, DecodeStatus, SampleBuffer};
use crate::clip::ClipSource;
use crate::playback::{
    ControllerConfig, ControllerError, PlaybackController, PlaybackElement, PlaybackState,
};
use crate::waveform::{progress_ratio, Envelope, Surface, Theme, WaveformRenderer};

/// Creates the playback element for a freshly decoded buffer.
pub type ElementFactory =
    Box<dyn Fn(Arc<SampleBuffer>) -> Arc<dyn PlaybackElement> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("playback controls are disabled")]
    ControlsDisabled,
    #[error("clip load was cancelled")]
    Cancelled,
    #[error("clip could not be loaded: {0}")]
    LoadFailed(String),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Inputs of the last paint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderKey {
    generation: u64,
    ratio_bits: u64,
    theme: Theme,
}

pub struct WaveformView<S: Surface> {
    surface: S,
    theme: Theme,
    renderer: WaveformRenderer,
    controller_config: ControllerConfig,
    element_factory: ElementFactory,

    envelope: Envelope,
    /// Bumped whenever the envelope is replaced
    generation: u64,
    buffer: Option<Arc<SampleBuffer>>,
    controller: Option<PlaybackController>,

    status: Option<watch::Receiver<DecodeStatus>>,
    decode_cancel: CancellationToken,
    load_error: Option<String>,

    last_render: Option<RenderKey>,
}

impl<S: Surface> WaveformView<S> {
    pub fn new(
        surface: S,
        theme: Theme,
        controller_config: ControllerConfig,
        element_factory: ElementFactory,
    ) -> Self {
        Self {
            surface,
            theme,
            renderer: WaveformRenderer::new(),
            controller_config,
            element_factory,
            envelope: Envelope::default(),
            generation: 0,
            buffer: None,
            controller: None,
            status: None,
            decode_cancel: CancellationToken::new(),
            load_error: None,
            last_render: None,
        }
    }

    /// Start decoding `source` in the background, replacing any current clip.
    pub fn begin_load<F, D>(&mut self, loader: &ClipLoader<F, D>, source: ClipSource)
    where
        F: ClipFetcher,
        D: AudioDecoder,
    {
        self.release();
        self.decode_cancel = CancellationToken::new();
        self.status = Some(loader.spawn_load(source, self.decode_cancel.clone()));
    }

    /// Pick up a finished decode, if any. Returns true once the load settled.
    pub fn poll_loaded(&mut self) -> bool {
        let status = match &self.status {
            Some(rx) => (*rx.borrow()).clone(),
            None => return self.buffer.is_some() || self.load_error.is_some(),
        };
        self.settle(status)
    }

    /// Wait for the background decode to finish and install the result.
    pub async fn wait_loaded(&mut self) -> Result<(), ViewError> {
        let Some(rx) = self.status.as_mut() else {
            return self.load_result();
        };

        let settled = rx
            .wait_for(|s| !s.is_pending())
            .await
            .map(|status| (*status).clone());
        let status = match settled {
            Ok(status) => status,
            Err(_) => {
                self.status = None;
                return Err(ViewError::Cancelled);
            }
        };
        self.settle(status);
        self.load_result()
    }

    fn load_result(&self) -> Result<(), ViewError> {
        match (&self.buffer, &self.load_error) {
            (Some(_), _) => Ok(()),
            (None, Some(e)) => Err(ViewError::LoadFailed(e.clone())),
            (None, None) => Err(ViewError::Cancelled),
        }
    }

    fn settle(&mut self, status: DecodeStatus) -> bool {
        match status {
            DecodeStatus::Pending => false,
            DecodeStatus::Ready(buffer) => {
                self.status = None;
                self.load_buffer(buffer);
                true
            }
            DecodeStatus::Failed(message) => {
                self.status = None;
                log::warn!("Waveform disabled, clip failed to load: {}", message);
                self.load_error = Some(message);
                self.set_envelope(Envelope::default());
                true
            }
        }
    }

    /// Install an already decoded buffer: envelope plus a fresh controller.
    pub fn load_buffer(&mut self, buffer: Arc<SampleBuffer>) {
        self.controller = None;
        self.load_error = None;

        self.set_envelope(Envelope::from_buffer(&buffer, self.surface.width()));

        let element = build_element(&self.element_factory, buffer.clone());
        self.controller = Some(PlaybackController::spawn(
            element,
            self.controller_config.clone(),
        ));
        self.buffer = Some(buffer);
    }

    fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = envelope;
        self.generation += 1;
    }

    /// Repaint if anything visible changed. Returns whether it painted.
    pub fn refresh(&mut self) -> bool {
        let ratio = self
            .playback_state()
            .map_or(0.0, |s| progress_ratio(s.current_time, s.duration));

        let key = RenderKey {
            generation: self.generation,
            ratio_bits: ratio.to_bits(),
            theme: self.theme,
        };
        if self.last_render == Some(key) {
            return false;
        }

        self.renderer
            .render(&mut self.surface, &self.envelope, ratio, self.theme);
        self.last_render = Some(key);
        true
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Playback is offered only for a decoded clip with a known duration.
    pub fn controls_enabled(&self) -> bool {
        self.controller
            .as_ref()
            .is_some_and(|c| c.state().can_play())
    }

    /// Play/pause the clip.
    pub async fn toggle(&self) -> Result<(), ViewError> {
        match &self.controller {
            Some(controller) if self.controls_enabled() => Ok(controller.toggle().await?),
            _ => Err(ViewError::ControlsDisabled),
        }
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.controller.as_ref().map(PlaybackController::state)
    }

    /// Watch playback state changes, for hosts that repaint on change.
    pub fn subscribe(&self) -> Option<watch::Receiver<PlaybackState>> {
        self.controller.as_ref().map(PlaybackController::subscribe)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn buffer(&self) -> Option<&Arc<SampleBuffer>> {
        self.buffer.as_ref()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_some()
    }

    /// Cancel the decode, stop playback and release the decoded audio.
    pub fn teardown(&mut self) {
        if self.status.is_some() || self.controller.is_some() || self.buffer.is_some() {
            log::debug!("Tearing down waveform view");
        }
        self.release();
    }

    fn release(&mut self) {
        self.decode_cancel.cancel();
        self.status = None;
        if let Some(controller) = self.controller.take() {
            controller.shutdown();
        }
        self.buffer = None;
        self.load_error = None;
        self.set_envelope(Envelope::default());
    }
}

/// Element factories may block on device setup, so a multi-thread runtime
/// hands this worker's queued tasks to another thread meanwhile.
fn build_element(factory: &ElementFactory, buffer: Arc<SampleBuffer>) -> Arc<dyn PlaybackElement> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| factory(buffer))
        }
        _ => factory(buffer),
    }
}

impl<S: Surface> Drop for WaveformView<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
