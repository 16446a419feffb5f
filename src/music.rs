//! Music playback manager: at most one active stream.
//!
//! `play` always goes through `stop` first, so starting a new track
//! releases the previous one. Reading, fetching, decoding and starting a
//! track all happen off the actor in [`load_track`]; the scene hands the
//! started stream back through [`MusicPlayer::loaded`] together with the
//! [`FetchTicket`] it was issued. A ticket that no longer matches the
//! pending load (because `play` or `stop` ran in between) has its stream
//! stopped and dropped.

use crate::audio::{AudioBackend, AudioFetcher, AudioStream, PlaybackSettings, start_stream};
use crate::entity::{Avatar, AvatarCommand};
use crate::error::{CompanionError, PlaybackFailure, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Where a track comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioResource {
    Remote(Url),
    Local(PathBuf),
}

impl AudioResource {
    /// Accepts `http(s)://` URLs, `file://` URLs and plain paths.
    ///
    /// # Errors
    ///
    /// Returns [`CompanionError::Config`] for empty input, unsupported URL
    /// schemes, or `file://` URLs that do not map to a path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CompanionError::Config("empty audio resource".into()));
        }

        if let Ok(url) = Url::parse(raw) {
            match url.scheme() {
                "http" | "https" => return Ok(Self::Remote(url)),
                "file" => {
                    let path = url.to_file_path().map_err(|()| {
                        CompanionError::Config(format!("not a local file URL: {raw}"))
                    })?;
                    return Ok(Self::Local(path));
                }
                // Windows drive letters parse as one-letter schemes.
                scheme if scheme.len() > 1 => {
                    return Err(CompanionError::Config(format!(
                        "unsupported audio scheme '{scheme}'"
                    )));
                }
                _ => {}
            }
        }

        Ok(Self::Local(PathBuf::from(raw)))
    }

    /// File extension used as a decoder hint.
    pub fn extension(&self) -> Option<String> {
        let last = match self {
            Self::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_owned),
            Self::Local(path) => path.file_name().and_then(|n| n.to_str()).map(str::to_owned),
        }?;
        Path::new(&last)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

impl fmt::Display for AudioResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Identifies one in-flight track load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTicket(pub u64);

/// How a load issued by [`MusicPlayer::play`] ended.
#[derive(Debug)]
pub enum PlayOutcome {
    /// The stream is now the active handle.
    Started { resource: String },
    /// Nothing is playing; the error was already logged.
    Failed { resource: String, error: CompanionError },
}

/// Why the active handle was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stopped,
    Replaced,
    Finished,
    Shutdown,
}

struct ActiveTrack {
    resource: String,
    stream: Box<dyn AudioStream>,
}

struct PendingLoad {
    ticket: FetchTicket,
    resource: String,
}

/// Owner of the single music [`AudioStream`].
pub struct MusicPlayer {
    settings: PlaybackSettings,
    active: Option<ActiveTrack>,
    pending: Option<PendingLoad>,
    next_ticket: u64,
}

impl MusicPlayer {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            settings,
            active: None,
            pending: None,
            next_ticket: 0,
        }
    }

    /// Settings every track is opened with.
    pub fn settings(&self) -> PlaybackSettings {
        self.settings
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Label of the active track.
    pub fn now_playing(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.resource.as_str())
    }

    pub fn pending_load(&self) -> Option<FetchTicket> {
        self.pending.as_ref().map(|p| p.ticket)
    }

    /// Stop whatever is playing and issue a ticket for loading `resource`.
    ///
    /// The caller runs [`load_track`] and reports back through
    /// [`MusicPlayer::loaded`].
    pub fn play(
        &mut self,
        resource: &AudioResource,
        avatar: &mut dyn Avatar,
    ) -> (Option<StopReason>, FetchTicket) {
        let stopped = self.release(StopReason::Replaced, avatar);

        self.next_ticket += 1;
        let ticket = FetchTicket(self.next_ticket);
        tracing::info!(%resource, ticket = ticket.0, "loading music");
        self.pending = Some(PendingLoad {
            ticket,
            resource: resource.to_string(),
        });
        (stopped, ticket)
    }

    /// Deliver the result of the load issued with `ticket`.
    ///
    /// Returns `None` when the ticket is stale; a stream that arrives for a
    /// stale ticket is stopped and dropped.
    pub fn loaded(
        &mut self,
        ticket: FetchTicket,
        result: Result<Box<dyn AudioStream>>,
        avatar: &mut dyn Avatar,
    ) -> Option<PlayOutcome> {
        if self.pending_load() != Some(ticket) {
            tracing::debug!(?ticket, "discarding stale music load");
            if let Ok(mut stream) = result {
                stream.stop();
            }
            return None;
        }
        let pending = self.pending.take()?;
        let label = pending.resource;

        let outcome = match result {
            Ok(stream) => {
                debug_assert!(self.active.is_none(), "music stream started over an active one");
                avatar.apply(AvatarCommand::StartListening);
                tracing::info!(resource = %label, "music starting");
                self.active = Some(ActiveTrack {
                    resource: label.clone(),
                    stream,
                });
                PlayOutcome::Started { resource: label }
            }
            Err(error) => {
                match &error {
                    CompanionError::Playback(failure) => log_start_failure(&label, failure),
                    other => tracing::error!(resource = %label, error = %other, "could not load music"),
                }
                PlayOutcome::Failed {
                    resource: label,
                    error,
                }
            }
        };
        Some(outcome)
    }

    /// Halt and release the active stream and drop any pending load.
    ///
    /// Returns `None` (and touches nothing visible) when nothing was playing.
    pub fn stop(&mut self, avatar: &mut dyn Avatar) -> Option<StopReason> {
        self.pending = None;
        self.release(StopReason::Stopped, avatar)
    }

    /// Release the stream if it played to the end.
    pub fn poll(&mut self, avatar: &mut dyn Avatar) -> Option<StopReason> {
        if self.active.as_ref().is_some_and(|t| t.stream.is_finished()) {
            return self.release(StopReason::Finished, avatar);
        }
        None
    }

    pub fn shutdown(&mut self, avatar: &mut dyn Avatar) -> Option<StopReason> {
        self.pending = None;
        self.release(StopReason::Shutdown, avatar)
    }

    fn release(&mut self, reason: StopReason, avatar: &mut dyn Avatar) -> Option<StopReason> {
        let mut track = self.active.take()?;
        track.stream.stop();
        drop(track.stream);
        avatar.apply(AvatarCommand::StopListening);
        tracing::info!(resource = %track.resource, ?reason, "music stopped");
        Some(reason)
    }
}

/// Read or fetch `resource`, then decode and start it on the blocking pool.
///
/// # Errors
///
/// Returns the fetch or read error, [`CompanionError::Fetch`] for an empty
/// body, or whatever building and starting the stream failed with.
pub async fn load_track(
    resource: AudioResource,
    fetcher: Arc<dyn AudioFetcher>,
    backend: Arc<dyn AudioBackend>,
    settings: PlaybackSettings,
) -> Result<Box<dyn AudioStream>> {
    let data = match &resource {
        AudioResource::Remote(url) => fetcher.fetch(url).await?,
        AudioResource::Local(path) => Bytes::from(tokio::fs::read(path).await?),
    };
    if data.is_empty() {
        return Err(CompanionError::Fetch("no audio data received".into()));
    }
    start_stream(backend, data, resource.extension(), settings).await
}

fn log_start_failure(resource: &str, failure: &PlaybackFailure) {
    tracing::error!(
        resource,
        domain = %failure.domain,
        code = failure.code,
        status = failure.status().describe(),
        message = %failure.message,
        "audio playback failed to start"
    );
}
