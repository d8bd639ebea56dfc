//! Audio device surface.
//!
//! Capture, playback and routing live outside this crate. The orchestrator
//! only drives them through [`AudioDevice`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Audio device errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The device refused the operation.
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    /// The requested output route does not exist.
    #[error("unsupported output route: {0}")]
    UnsupportedRoute(OutputRoute),

    /// Playback failed.
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Where reply audio is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputRoute {
    /// Loudspeaker.
    Speaker,
    /// Earpiece.
    Receiver,
    /// Paired wireless headset.
    Bluetooth,
}

impl fmt::Display for OutputRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputRoute::Speaker => "speaker",
            OutputRoute::Receiver => "receiver",
            OutputRoute::Bluetooth => "bluetooth",
        };
        f.write_str(name)
    }
}

/// Capture and playback operations.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Start feeding microphone audio.
    async fn start_capture(&self) -> Result<(), AudioError>;

    /// Stop feeding microphone audio.
    async fn stop_capture(&self) -> Result<(), AudioError>;

    /// Mute or unmute capture.
    async fn set_muted(&self, muted: bool) -> Result<(), AudioError>;

    /// Choose the playback route.
    async fn set_output_route(&self, route: OutputRoute) -> Result<(), AudioError>;

    /// Queue decoded reply audio for playback.
    async fn play(&self, chunk: &[u8]) -> Result<(), AudioError>;

    /// Drop queued playback immediately.
    async fn stop_playback(&self) -> Result<(), AudioError>;

    /// Resolve once everything queued by `play` has been heard or dropped.
    ///
    /// Reply audio arrives faster than real time, so the assistant keeps the
    /// turn until this resolves. Devices without a playback queue resolve at
    /// once.
    async fn playback_drained(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Device that accepts every call and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudio;

#[async_trait]
impl AudioDevice for NullAudio {
    async fn start_capture(&self) -> Result<(), AudioError> {
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), AudioError> {
        Ok(())
    }

    async fn set_muted(&self, _muted: bool) -> Result<(), AudioError> {
        Ok(())
    }

    async fn set_output_route(&self, _route: OutputRoute) -> Result<(), AudioError> {
        Ok(())
    }

    async fn play(&self, _chunk: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }

    async fn stop_playback(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// One call made on a [`RecordingAudio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCall {
    /// `start_capture`
    StartCapture,
    /// `stop_capture`
    StopCapture,
    /// `set_muted`
    SetMuted(bool),
    /// `set_output_route`
    SetOutputRoute(OutputRoute),
    /// `play`, with the chunk length
    Play(usize),
    /// `stop_playback`
    StopPlayback,
}

/// Device that records every call, for tests.
///
/// Playback drains instantly unless [`RecordingAudio::holding_playback`] is
/// set, in which case played audio stays audible until `stop_playback` or
/// [`RecordingAudio::finish_playback`].
#[derive(Debug, Clone)]
pub struct RecordingAudio {
    calls: Arc<Mutex<Vec<AudioCall>>>,
    unsupported_route: Option<OutputRoute>,
    hold_playback: bool,
    playing: Arc<watch::Sender<bool>>,
}

impl Default for RecordingAudio {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            unsupported_route: None,
            hold_playback: false,
            playing: Arc::new(watch::channel(false).0),
        }
    }
}

impl RecordingAudio {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject this route in `set_output_route`.
    pub fn without_route(mut self, route: OutputRoute) -> Self {
        self.unsupported_route = Some(route);
        self
    }

    /// Keep played audio audible until it is stopped or finished.
    pub fn holding_playback(mut self) -> Self {
        self.hold_playback = true;
        self
    }

    /// Whether queued audio is still audible.
    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    /// Let held playback run out.
    pub fn finish_playback(&self) {
        self.playing.send_replace(false);
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<AudioCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: AudioCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl AudioDevice for RecordingAudio {
    async fn start_capture(&self) -> Result<(), AudioError> {
        self.record(AudioCall::StartCapture);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<(), AudioError> {
        self.record(AudioCall::StopCapture);
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.record(AudioCall::SetMuted(muted));
        Ok(())
    }

    async fn set_output_route(&self, route: OutputRoute) -> Result<(), AudioError> {
        if self.unsupported_route == Some(route) {
            return Err(AudioError::UnsupportedRoute(route));
        }
        self.record(AudioCall::SetOutputRoute(route));
        Ok(())
    }

    async fn play(&self, chunk: &[u8]) -> Result<(), AudioError> {
        self.record(AudioCall::Play(chunk.len()));
        if self.hold_playback {
            self.playing.send_replace(true);
        }
        Ok(())
    }

    async fn stop_playback(&self) -> Result<(), AudioError> {
        self.record(AudioCall::StopPlayback);
        self.playing.send_replace(false);
        Ok(())
    }

    async fn playback_drained(&self) -> Result<(), AudioError> {
        let mut playing = self.playing.subscribe();
        playing
            .wait_for(|playing| !*playing)
            .await
            .map_err(|_| AudioError::Playback("device closed".to_string()))?;
        Ok(())
    }
}
