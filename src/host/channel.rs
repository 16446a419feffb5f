//! Host command channel: routes [`CommandEnvelope`]s to a running companion
//! and republishes its events as [`EventEnvelope`]s.

use crate::controller::CompanionHandle;
use crate::dialogue::LineKind;
use crate::entity::{MovementDirection, Point};
use crate::error::{CompanionError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::music::AudioResource;
use crate::scene::PointerButton;
use crate::speech::SessionId;
use crate::voice::VoicePreset;
use tokio::sync::{broadcast, mpsc, oneshot};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            CompanionError::Command(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                CompanionError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| CompanionError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    companion: CompanionHandle,
}

#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    companion: CompanionHandle,
) -> (HostCommandClient, HostCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            companion,
        },
    )
}

impl HostCommandServer {
    /// Serve requests and forward companion events until every client is
    /// dropped.
    pub async fn run(mut self) {
        let mut companion_events = self.companion.subscribe();
        let mut events_open = true;
        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    let Some(request) = request else { break };
                    let response = match self.route(&request.envelope).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::warn!(
                                command = request.envelope.command.as_str(),
                                error = %e,
                                "host command failed"
                            );
                            ResponseEnvelope::error(request.envelope.request_id.clone(), e.to_string())
                        }
                    };
                    let _ = request.response_tx.send(Ok(response));
                }
                event = companion_events.recv(), if events_open => match event {
                    Ok(event) => {
                        let _ = self.event_tx.send(EventEnvelope::from_event(&event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "host event forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
            }
        }
    }

    /// Route one command envelope to the companion.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = envelope.request_id.clone();
        let payload = &envelope.payload;
        let companion = &self.companion;

        let body = match envelope.command {
            CommandName::HostPing => serde_json::json!({"pong": true}),
            CommandName::HostVersion => serde_json::json!({
                "contract_version": crate::host::contract::EVENT_VERSION,
                "package_version": env!("CARGO_PKG_VERSION"),
            }),
            CommandName::CompanionClick => {
                let point = parse_point(payload)?;
                let button = parse_button(payload)?;
                to_json(&companion.click(point, button).await?)?
            }
            CommandName::CompanionSpeak => {
                let text = parse_optional_text(payload, "companion.speak")?;
                let kind = parse_line_kind(payload)?;
                let outcome = match (text, kind) {
                    (Some(_), Some(_)) => {
                        return Err(CompanionError::Command(
                            "companion.speak takes payload.text or payload.kind, not both".to_owned(),
                        ));
                    }
                    (None, Some(kind)) => companion.speak_line(kind).await?,
                    (text, None) => companion.speak(text).await?,
                };
                to_json(&outcome)?
            }
            CommandName::CompanionMove => {
                let direction = parse_direction(payload)?;
                let accepted = companion.move_entity(direction).await?;
                serde_json::json!({"accepted": accepted})
            }
            CommandName::CompanionReset => {
                serde_json::json!({"accepted": companion.reset().await?})
            }
            CommandName::CompanionFall => {
                serde_json::json!({"accepted": companion.fall().await?})
            }
            CommandName::CompanionStatus => to_json(&companion.status().await?)?,
            CommandName::SpeechFinished => {
                let session = parse_session(payload)?;
                serde_json::json!({"accepted": companion.speech_finished(session).await?})
            }
            CommandName::MusicPlay => {
                let raw = parse_non_empty_field(payload, "resource", "music.play")?;
                let resource = AudioResource::parse(&raw)?;
                to_json(&companion.play_music(resource).await?)?
            }
            CommandName::MusicStop => {
                serde_json::json!({"stopped": companion.stop_music().await?})
            }
            CommandName::VoiceSetPreset => {
                let preset = parse_preset(payload)?;
                let previous = companion.set_voice_preset(preset).await?;
                serde_json::json!({"preset": preset, "previous": previous})
            }
            CommandName::RuntimeStop => {
                companion.shutdown();
                self.emit_event("runtime.stopping", serde_json::json!({"request_id": id}));
                serde_json::json!({"accepted": true})
            }
        };

        Ok(ResponseEnvelope::ok(id, body))
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let _ = self.event_tx.send(EventEnvelope::new(
            uuid::Uuid::new_v4().to_string(),
            event,
            payload,
        ));
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| CompanionError::Command(format!("failed to encode response: {e}")))
}

fn parse_point(payload: &serde_json::Value) -> Result<Point> {
    let coordinate = |field: &str| {
        payload
            .get(field)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                CompanionError::Command(format!("companion.click requires numeric payload.{field}"))
            })
    };
    Ok(Point::new(coordinate("x")?, coordinate("y")?))
}

fn parse_button(payload: &serde_json::Value) -> Result<PointerButton> {
    match payload.get("button") {
        None | Some(serde_json::Value::Null) => Ok(PointerButton::Primary),
        Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
            CompanionError::Command(
                "companion.click payload.button must be \"primary\" or \"secondary\"".to_owned(),
            )
        }),
    }
}

fn parse_direction(payload: &serde_json::Value) -> Result<MovementDirection> {
    let raw = parse_non_empty_field(payload, "direction", "companion.move")?;
    MovementDirection::parse(&raw).ok_or_else(|| {
        CompanionError::Command(format!(
            "companion.move: unknown direction `{raw}` (allowed: left, right, up, down)"
        ))
    })
}

fn parse_session(payload: &serde_json::Value) -> Result<SessionId> {
    payload
        .get("session")
        .and_then(serde_json::Value::as_u64)
        .map(SessionId)
        .ok_or_else(|| {
            CompanionError::Command("speech.finished requires numeric payload.session".to_owned())
        })
}

fn parse_line_kind(payload: &serde_json::Value) -> Result<Option<LineKind>> {
    match payload.get("kind") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .and_then(|raw| LineKind::parse(raw.trim()))
            .map(Some)
            .ok_or_else(|| {
                CompanionError::Command(format!(
                    "companion.speak: unknown kind {value} (allowed: greeting, joke, fact)"
                ))
            }),
    }
}

fn parse_preset(payload: &serde_json::Value) -> Result<VoicePreset> {
    let raw = parse_non_empty_field(payload, "preset", "voice.set_preset")?;
    VoicePreset::parse(&raw).ok_or_else(|| {
        let allowed: Vec<&str> = VoicePreset::ALL.iter().map(|p| p.as_str()).collect();
        CompanionError::Command(format!(
            "voice.set_preset: unknown preset `{raw}` (allowed: {})",
            allowed.join(", ")
        ))
    })
}

fn parse_optional_text(payload: &serde_json::Value, command: &str) -> Result<Option<String>> {
    match payload.get("text") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) => {
            let text = raw.trim();
            if text.is_empty() {
                return Err(CompanionError::Command(format!(
                    "{command} payload.text cannot be empty when provided"
                )));
            }
            Ok(Some(text.to_owned()))
        }
        Some(_) => Err(CompanionError::Command(format!(
            "{command} payload.text must be a string when provided"
        ))),
    }
}

fn parse_non_empty_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(CompanionError::Command(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(CompanionError::Command(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}
