//! Presentation commands sent to whatever draws the companion.
//!
//! The controller never renders anything itself. Every visible side effect
//! (expressions, routines, speech bubbles, the listening pose) is expressed
//! as an [`AvatarCommand`] handed to an [`Avatar`] implementation.

use crate::entity::mode::Motion;
use crate::entity::Facing;
use serde::{Deserialize, Serialize};

/// Long-running animation routines started and stopped by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    Sleeping,
    Dancing,
    Excited,
    Rolling,
}

/// A single presentation instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AvatarCommand {
    /// Hide any visible speech bubble.
    DismissSpeechBubble,
    /// Cancel a scripted motion (walk/fall path).
    CancelMotion { motion: Motion },
    /// Friendly default expression.
    Smile,
    Blink,
    StartRoutine { routine: Routine },
    StopRoutine { routine: Routine },
    /// Show `text` in a bubble for `duration_ms`.
    ShowSpeech { text: String, duration_ms: u64 },
    /// Listening-to-music pose on.
    StartListening,
    StopListening,
    /// Mirror horizontally to face a direction.
    Face { facing: Facing },
}

/// Receiver of presentation commands.
pub trait Avatar: Send {
    fn apply(&mut self, command: AvatarCommand);
}

/// Avatar that keeps every command it receives.
///
/// Used by tests and by headless runs that want to inspect what would have
/// been drawn.
#[derive(Debug, Default, Clone)]
pub struct RecordingAvatar {
    commands: Vec<AvatarCommand>,
}

impl RecordingAvatar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[AvatarCommand] {
        &self.commands
    }

    /// How many recorded commands satisfy `pred`.
    pub fn count(&self, pred: impl Fn(&AvatarCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Avatar for RecordingAvatar {
    fn apply(&mut self, command: AvatarCommand) {
        self.commands.push(command);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn commands_serialize_with_kind_tag() {
        let json = serde_json::to_value(AvatarCommand::StartRoutine {
            routine: Routine::Sleeping,
        })
        .unwrap();
        assert_eq!(json["kind"], "start_routine");
        assert_eq!(json["routine"], "sleeping");
    }

    #[test]
    fn recording_avatar_counts() {
        let mut avatar = RecordingAvatar::new();
        avatar.apply(AvatarCommand::Blink);
        avatar.apply(AvatarCommand::Smile);
        avatar.apply(AvatarCommand::Blink);
        assert_eq!(avatar.count(|c| *c == AvatarCommand::Blink), 2);
        avatar.clear();
        assert!(avatar.commands().is_empty());
    }
}
