//! Notifications emitted by the companion for UI and observability.
//!
//! Events are lightweight and published on a broadcast channel. Nobody has
//! to listen; a send without subscribers is dropped silently.

use crate::boredom::BoredBehavior;
use crate::entity::{Avatar, AvatarCommand, EntityId, EntityMode, Facing, Point};
use crate::music::StopReason;
use crate::speech::{EndReason, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events that describe what the companion is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompanionEvent {
    /// The entity switched behavioral mode.
    ModeChanged {
        entity: EntityId,
        from: EntityMode,
        to: EntityMode,
    },
    /// The entity's position or facing changed.
    Moved {
        entity: EntityId,
        position: Point,
        facing: Facing,
    },
    SpeechStarted {
        session: SessionId,
        text: String,
        duration_ms: u64,
    },
    /// A session was forcibly terminated by a click burst.
    SpeechStopped { session: SessionId },
    /// A session ended by completion, timeout or shutdown.
    SpeechFinished {
        session: SessionId,
        reason: EndReason,
    },
    MusicStarting { resource: String },
    MusicStopped { reason: StopReason },
    MusicFailed { resource: String, message: String },
    BoredBehaviorStarted { behavior: BoredBehavior },
    BoredBehaviorEnded { behavior: BoredBehavior },
    /// Secondary click on the entity; the host should show its menu.
    MenuRequested { x: f64, y: f64 },
    /// A presentation command for the avatar renderer.
    Avatar { command: AvatarCommand },
}

impl CompanionEvent {
    /// Dotted wire name used by host event envelopes.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModeChanged { .. } => "companion.mode_changed",
            Self::Moved { .. } => "companion.moved",
            Self::SpeechStarted { .. } => "speech.started",
            Self::SpeechStopped { .. } => "speech.stopped",
            Self::SpeechFinished { .. } => "speech.finished",
            Self::MusicStarting { .. } => "music.starting",
            Self::MusicStopped { .. } => "music.stopped",
            Self::MusicFailed { .. } => "music.failed",
            Self::BoredBehaviorStarted { .. } => "boredom.started",
            Self::BoredBehaviorEnded { .. } => "boredom.ended",
            Self::MenuRequested { .. } => "menu.requested",
            Self::Avatar { .. } => "avatar.command",
        }
    }
}

/// Cloneable publisher of [`CompanionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CompanionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: CompanionEvent) {
        tracing::trace!(event = event.name(), "companion event");
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// [`Avatar`] that forwards every command onto the event bus.
///
/// Used when the renderer lives in another process (the stdio host).
#[derive(Debug, Clone)]
pub struct EventAvatar {
    bus: EventBus,
}

impl EventAvatar {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl Avatar for EventAvatar {
    fn apply(&mut self, command: AvatarCommand) {
        self.bus.emit(CompanionEvent::Avatar { command });
    }
}
