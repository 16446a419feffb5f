//! Versioned command/response/event envelopes exchanged with a host shell.

use crate::runtime::CompanionEvent;
use serde::{Deserialize, Serialize};

/// Contract version carried by every envelope.
pub const EVENT_VERSION: u32 = 1;

/// Commands a host can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "companion.click")]
    CompanionClick,
    #[serde(rename = "companion.speak")]
    CompanionSpeak,
    #[serde(rename = "companion.move")]
    CompanionMove,
    #[serde(rename = "companion.reset")]
    CompanionReset,
    #[serde(rename = "companion.fall")]
    CompanionFall,
    #[serde(rename = "companion.status")]
    CompanionStatus,
    #[serde(rename = "speech.finished")]
    SpeechFinished,
    #[serde(rename = "music.play")]
    MusicPlay,
    #[serde(rename = "music.stop")]
    MusicStop,
    #[serde(rename = "voice.set_preset")]
    VoiceSetPreset,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    pub const ALL: [CommandName; 13] = [
        Self::HostPing,
        Self::HostVersion,
        Self::CompanionClick,
        Self::CompanionSpeak,
        Self::CompanionMove,
        Self::CompanionReset,
        Self::CompanionFall,
        Self::CompanionStatus,
        Self::SpeechFinished,
        Self::MusicPlay,
        Self::MusicStop,
        Self::VoiceSetPreset,
        Self::RuntimeStop,
    ];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::CompanionClick => "companion.click",
            Self::CompanionSpeak => "companion.speak",
            Self::CompanionMove => "companion.move",
            Self::CompanionReset => "companion.reset",
            Self::CompanionFall => "companion.fall",
            Self::CompanionStatus => "companion.status",
            Self::SpeechFinished => "speech.finished",
            Self::MusicPlay => "music.play",
            Self::MusicStop => "music.stop",
            Self::VoiceSetPreset => "voice.set_preset",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// Backend -> host reply to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Host -> backend command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Reject foreign versions and blank request ids.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Backend -> host notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }

    /// Wrap a companion event under its dotted name with a fresh id.
    #[must_use]
    pub fn from_event(event: &CompanionEvent) -> Self {
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        Self::new(uuid::Uuid::new_v4().to_string(), event.name(), payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::speech::SessionId;

    #[test]
    fn command_names_match_serde_renames() {
        for command in CommandName::ALL {
            let json = serde_json::to_value(command).unwrap();
            assert_eq!(json, command.as_str());
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
        }
        assert_eq!(CommandName::parse("conversation.inject_text"), None);
    }

    #[test]
    fn payload_defaults_to_null() {
        let envelope: CommandEnvelope = serde_json::from_str(
            r#"{"v":1,"request_id":"r1","command":"companion.status"}"#,
        )
        .unwrap();
        assert_eq!(envelope.command, CommandName::CompanionStatus);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn validate_rejects_version_and_blank_id() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, serde_json::json!({}));
        envelope.v = 7;
        assert_eq!(
            envelope.validate().unwrap_err().kind,
            ContractErrorKind::UnsupportedVersion
        );

        let blank = CommandEnvelope::new("  ", CommandName::HostPing, serde_json::json!({}));
        assert_eq!(
            blank.validate().unwrap_err().kind,
            ContractErrorKind::InvalidEnvelope
        );
    }

    #[test]
    fn event_envelope_wraps_companion_event() {
        let envelope = EventEnvelope::from_event(&CompanionEvent::SpeechStopped {
            session: SessionId(4),
        });
        assert_eq!(envelope.v, EVENT_VERSION);
        assert_eq!(envelope.event, "speech.stopped");
        assert_eq!(envelope.payload["session"], 4);
        assert!(!envelope.event_id.is_empty());
    }
}
