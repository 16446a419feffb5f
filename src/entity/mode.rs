//! Behavioral mode register.
//!
//! This is deliberately a thin register rather than a hierarchical state
//! machine: it records which routine is conceptually active, runs the exit
//! action of the mode being left and the entry action of the mode being
//! entered, and dismisses the speech bubble on every real transition.
//! Starting the routine that belongs to a mode (sleeping, dancing, ...)
//! stays with the caller.

use crate::entity::avatar::{Avatar, AvatarCommand};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the companion is doing right now. Exactly one is active.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityMode {
    #[default]
    Idle,
    Moving,
    Walking,
    Falling,
    Sleeping,
    Dancing,
    Excited,
}

impl EntityMode {
    pub const ALL: [EntityMode; 7] = [
        EntityMode::Idle,
        EntityMode::Moving,
        EntityMode::Walking,
        EntityMode::Falling,
        EntityMode::Sleeping,
        EntityMode::Dancing,
        EntityMode::Excited,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Walking => "walking",
            Self::Falling => "falling",
            Self::Sleeping => "sleeping",
            Self::Dancing => "dancing",
            Self::Excited => "excited",
        }
    }

    /// Scripted motion owned by this mode, canceled when the mode is left.
    #[must_use]
    pub fn scripted_motion(self) -> Option<Motion> {
        match self {
            Self::Walking => Some(Motion::Walking),
            Self::Falling => Some(Motion::Falling),
            _ => None,
        }
    }
}

impl fmt::Display for EntityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancelable scripted motions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    Walking,
    Falling,
}

/// A mode change that actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: EntityMode,
    pub to: EntityMode,
}

/// Owner of the current [`EntityMode`].
#[derive(Debug, Default, Clone)]
pub struct ModeRegister {
    current: EntityMode,
}

impl ModeRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> EntityMode {
        self.current
    }

    /// Switch to `next`, running exit and entry actions against `avatar`.
    ///
    /// Returns `None` without touching the avatar when `next` is already
    /// the current mode.
    pub fn set_mode(&mut self, next: EntityMode, avatar: &mut dyn Avatar) -> Option<ModeTransition> {
        if next == self.current {
            return None;
        }

        avatar.apply(AvatarCommand::DismissSpeechBubble);

        if let Some(motion) = self.current.scripted_motion() {
            avatar.apply(AvatarCommand::CancelMotion { motion });
        }

        let transition = ModeTransition {
            from: self.current,
            to: next,
        };
        self.current = next;

        if next == EntityMode::Idle {
            avatar.apply(AvatarCommand::Smile);
        }

        tracing::debug!(from = %transition.from, to = %transition.to, "mode changed");
        Some(transition)
    }
}
