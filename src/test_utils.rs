//! Test doubles shared by unit tests and the integration tests under `tests/`.
//!
//! Every double is cheaply cloneable and shares its state, so a test can
//! keep one clone for inspection after moving another into the runtime.

use crate::audio::{AudioBackend, AudioFetcher, AudioStream, PlaybackSettings};
use crate::entity::{Avatar, AvatarCommand, RecordingAvatar};
use crate::error::{CompanionError, PlaybackFailure, Result};
use crate::voice::{VoicePreset, VoiceRenderer};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Observable state of one [`FakeStream`].
#[derive(Debug, Default)]
pub struct StreamMonitor {
    label: String,
    hint: Option<String>,
    settings: Mutex<Option<PlaybackSettings>>,
    playing: AtomicBool,
    stopped: AtomicBool,
    finished: AtomicBool,
    released: AtomicBool,
}

impl StreamMonitor {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn hint(&self) -> Option<String> {
        self.hint.clone()
    }

    pub fn settings(&self) -> Option<PlaybackSettings> {
        *lock(&self.settings)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Simulate the clip playing to its end.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Stream handed out by [`FakeBackend`].
pub struct FakeStream {
    monitor: Arc<StreamMonitor>,
    start_failure: Option<PlaybackFailure>,
}

impl AudioStream for FakeStream {
    fn play(&mut self) -> std::result::Result<(), PlaybackFailure> {
        if let Some(failure) = self.start_failure.take() {
            return Err(failure);
        }
        self.monitor.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.monitor.playing.store(false, Ordering::SeqCst);
        self.monitor.stopped.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.monitor.finished.load(Ordering::SeqCst)
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.monitor.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BackendState {
    streams: Vec<Arc<StreamMonitor>>,
    fail_open: Option<String>,
    fail_start: Option<PlaybackFailure>,
}

/// Blocks `open` calls while held, like a slow decode or device start.
#[derive(Default)]
struct OpenGate {
    held: Mutex<bool>,
    released: Condvar,
}

/// In-memory [`AudioBackend`]. Stream labels are the UTF-8 payload bytes.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    gate: Arc<OpenGate>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with an audio error.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        lock(&self.state).fail_open = Some(message.into());
    }

    /// Make the next opened stream fail to start.
    pub fn fail_next_start(&self, failure: PlaybackFailure) {
        lock(&self.state).fail_start = Some(failure);
    }

    /// Streams successfully constructed so far.
    pub fn opened(&self) -> usize {
        lock(&self.state).streams.len()
    }

    /// Streams constructed and not yet dropped.
    pub fn live_streams(&self) -> usize {
        lock(&self.state)
            .streams
            .iter()
            .filter(|s| !s.is_released())
            .count()
    }

    pub fn live_labels(&self) -> Vec<String> {
        lock(&self.state)
            .streams
            .iter()
            .filter(|s| !s.is_released())
            .map(|s| s.label.clone())
            .collect()
    }

    /// Most recent stream with `label`.
    pub fn stream(&self, label: &str) -> Option<Arc<StreamMonitor>> {
        lock(&self.state)
            .streams
            .iter()
            .rev()
            .find(|s| s.label == label)
            .cloned()
    }

    /// Make every `open` block its thread until [`FakeBackend::release_opens`].
    pub fn hold_opens(&self) {
        *lock(&self.gate.held) = true;
    }

    pub fn release_opens(&self) {
        *lock(&self.gate.held) = false;
        self.gate.released.notify_all();
    }

    /// Mark every live stream as played to the end.
    pub fn finish_all(&self) {
        for stream in &lock(&self.state).streams {
            stream.finish();
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open(
        &self,
        data: Bytes,
        hint: Option<&str>,
        settings: PlaybackSettings,
    ) -> Result<Box<dyn AudioStream>> {
        let mut held = lock(&self.gate.held);
        while *held {
            held = self
                .gate
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        drop(held);

        let mut state = lock(&self.state);
        if let Some(message) = state.fail_open.take() {
            return Err(CompanionError::Audio(message));
        }
        let monitor = Arc::new(StreamMonitor {
            label: String::from_utf8_lossy(&data).into_owned(),
            hint: hint.map(str::to_owned),
            settings: Mutex::new(Some(settings)),
            ..StreamMonitor::default()
        });
        state.streams.push(Arc::clone(&monitor));
        Ok(Box::new(FakeStream {
            monitor,
            start_failure: state.fail_start.take(),
        }))
    }
}

/// [`AudioFetcher`] serving canned bodies after an optional delay.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    bodies: Arc<Mutex<HashMap<String, std::result::Result<Bytes, String>>>>,
    delay: Arc<Mutex<Duration>>,
    requests: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Bytes>) {
        lock(&self.bodies).insert(url.to_owned(), Ok(body.into()));
    }

    pub fn fail(&self, url: &str, message: impl Into<String>) {
        lock(&self.bodies).insert(url.to_owned(), Err(message.into()));
    }

    /// Delay every response; uses tokio time so paused clocks apply.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.bodies).get(url.as_str()) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(CompanionError::Fetch(message.clone())),
            None => Err(CompanionError::Fetch(format!("{url} returned 404 Not Found"))),
        }
    }
}

/// [`VoiceRenderer`] that returns the text itself as audio, or fails.
#[derive(Clone, Default)]
pub struct ScriptedVoice {
    fail: Arc<AtomicBool>,
    rendered: Arc<Mutex<Vec<(String, VoicePreset)>>>,
}

impl ScriptedVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let voice = Self::default();
        voice.fail.store(true, Ordering::SeqCst);
        voice
    }

    pub fn rendered(&self) -> Vec<(String, VoicePreset)> {
        lock(&self.rendered).clone()
    }
}

#[async_trait]
impl VoiceRenderer for ScriptedVoice {
    async fn render(&self, text: &str, preset: VoicePreset) -> Result<Bytes> {
        lock(&self.rendered).push((text.to_owned(), preset));
        if self.fail.load(Ordering::SeqCst) {
            return Err(CompanionError::Voice("synthesis unavailable".into()));
        }
        Ok(Bytes::from(format!("voice:{text}")))
    }
}

/// [`Avatar`] recording into shared storage, inspectable after being boxed.
#[derive(Clone, Default)]
pub struct SharedAvatar {
    inner: Arc<Mutex<RecordingAvatar>>,
}

impl SharedAvatar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<AvatarCommand> {
        lock(&self.inner).commands().to_vec()
    }

    pub fn count(&self, pred: impl Fn(&AvatarCommand) -> bool) -> usize {
        lock(&self.inner).count(pred)
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }
}

impl Avatar for SharedAvatar {
    fn apply(&mut self, command: AvatarCommand) {
        lock(&self.inner).apply(command);
    }
}
