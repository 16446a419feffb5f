//! Audio output: stream abstraction, decoding, cpal playback and remote fetch.

pub mod decode;
pub mod fetch;
pub mod playback;

use crate::error::{CompanionError, PlaybackFailure, Result};
use bytes::Bytes;
use std::sync::Arc;

pub use decode::{DecodedAudio, decode_to_mono_f32};
pub use fetch::{AudioFetcher, HttpFetcher};
pub use playback::{CpalBackend, CpalStream};

/// Per-stream playback options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    /// Linear gain, 0.0 to 1.0.
    pub volume: f32,
    /// Playback rate multiplier.
    pub rate: f32,
    pub looping: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 1.0,
            looping: false,
        }
    }
}

/// A constructed, not necessarily playing, audio stream.
///
/// Dropping a stream releases its output resources.
pub trait AudioStream: Send {
    /// Start playback. Failures carry the backend's diagnostic code.
    fn play(&mut self) -> std::result::Result<(), PlaybackFailure>;

    /// Halt playback. Safe to call more than once.
    fn stop(&mut self);

    /// Whether playback ran to the end (or the stream died).
    fn is_finished(&self) -> bool;
}

/// Factory for [`AudioStream`]s from encoded audio.
///
/// `open` and [`AudioStream::play`] may block (decoding, device setup), so
/// they are only called from the blocking pool via [`start_stream`].
pub trait AudioBackend: Send + Sync {
    /// Build a stream from encoded bytes.
    ///
    /// `hint` is a file extension used to help format probing.
    ///
    /// # Errors
    ///
    /// Returns an error when the data cannot be decoded or no output is available.
    fn open(
        &self,
        data: Bytes,
        hint: Option<&str>,
        settings: PlaybackSettings,
    ) -> Result<Box<dyn AudioStream>>;
}

/// Build a stream and start it, on the calling thread.
///
/// # Errors
///
/// Returns the backend's error, or [`CompanionError::Playback`] when the
/// stream was built but refused to start.
pub fn open_and_play(
    backend: &dyn AudioBackend,
    data: Bytes,
    hint: Option<&str>,
    settings: PlaybackSettings,
) -> Result<Box<dyn AudioStream>> {
    let mut stream = backend.open(data, hint, settings)?;
    stream.play().map_err(CompanionError::Playback)?;
    Ok(stream)
}

/// [`open_and_play`] on tokio's blocking pool.
///
/// # Errors
///
/// As [`open_and_play`], plus [`CompanionError::Audio`] if the blocking task
/// panicked or was cancelled.
pub async fn start_stream(
    backend: Arc<dyn AudioBackend>,
    data: Bytes,
    hint: Option<String>,
    settings: PlaybackSettings,
) -> Result<Box<dyn AudioStream>> {
    tokio::task::spawn_blocking(move || {
        open_and_play(backend.as_ref(), data, hint.as_deref(), settings)
    })
    .await
    .map_err(|e| CompanionError::Audio(format!("audio start task failed: {e}")))?
}
