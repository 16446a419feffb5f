//! Spoken-line synthesis.
//!
//! A [`VoiceRenderer`] turns text into encoded audio bytes that the scene
//! plays on its own voice stream. Rendering is optional: with voice
//! disabled the [`SilentVoice`] renderer is installed and lines are only
//! shown.

use crate::config::VoiceConfig;
use crate::error::{CompanionError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Voice character applied on top of the configured service voice.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePreset {
    #[default]
    Cute,
    Squeaky,
    Deep,
    Chipmunk,
    Robot,
}

impl VoicePreset {
    pub const ALL: [VoicePreset; 5] = [
        VoicePreset::Cute,
        VoicePreset::Squeaky,
        VoicePreset::Deep,
        VoicePreset::Chipmunk,
        VoicePreset::Robot,
    ];

    /// Pitch shift in semitones.
    pub fn pitch(self) -> f64 {
        match self {
            Self::Cute => 4.0,
            Self::Squeaky => 8.0,
            Self::Deep => -6.0,
            Self::Chipmunk => 12.0,
            Self::Robot => -2.0,
        }
    }

    /// Speaking rate multiplier.
    pub fn speaking_rate(self) -> f64 {
        match self {
            Self::Cute => 1.1,
            Self::Squeaky => 1.2,
            Self::Deep => 0.9,
            Self::Chipmunk => 1.4,
            Self::Robot => 0.85,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cute => "cute",
            Self::Squeaky => "squeaky",
            Self::Deep => "deep",
            Self::Chipmunk => "chipmunk",
            Self::Robot => "robot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == raw)
    }
}

impl fmt::Display for VoicePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text-to-audio backend.
#[async_trait]
pub trait VoiceRenderer: Send + Sync {
    /// Render `text` to encoded audio. Empty bytes mean "nothing to play".
    async fn render(&self, text: &str, preset: VoicePreset) -> Result<Bytes>;
}

/// Renderer used when voice output is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentVoice;

#[async_trait]
impl VoiceRenderer for SilentVoice {
    async fn render(&self, _text: &str, _preset: VoicePreset) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioSettings,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioSettings {
    audio_encoding: &'static str,
    pitch: f64,
    speaking_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisResponse {
    audio_content: String,
}

/// HTTP JSON synthesis service (Google Cloud Text-to-Speech wire format).
pub struct CloudVoiceRenderer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    language_code: String,
    voice_name: String,
}

impl CloudVoiceRenderer {
    /// Build a renderer from config.
    ///
    /// # Errors
    ///
    /// Returns [`CompanionError::Voice`] when no API key is configured or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &VoiceConfig, timeout: Duration) -> Result<Self> {
        let api_key = config.effective_api_key().ok_or_else(|| {
            CompanionError::Voice(format!(
                "no API key configured (set voice.api_key or {})",
                VoiceConfig::API_KEY_ENV
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompanionError::Voice(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            language_code: config.language_code.clone(),
            voice_name: config.voice_name.clone(),
        })
    }
}

#[async_trait]
impl VoiceRenderer for CloudVoiceRenderer {
    async fn render(&self, text: &str, preset: VoicePreset) -> Result<Bytes> {
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }

        let body = SynthesisRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &self.language_code,
                name: &self.voice_name,
            },
            audio_config: AudioSettings {
                audio_encoding: "MP3",
                pitch: preset.pitch(),
                speaking_rate: preset.speaking_rate(),
            },
        };

        tracing::debug!(%preset, chars = text.chars().count(), "requesting speech synthesis");
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| CompanionError::Voice(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read body".into());
            tracing::warn!(%status, body = %detail, "speech synthesis rejected");
            return Err(CompanionError::Voice(format!("service returned {status}")));
        }

        let parsed: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| CompanionError::Voice(format!("malformed response: {e}")))?;
        let audio = STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| CompanionError::Voice(format!("invalid audio content: {e}")))?;

        Ok(Bytes::from(audio))
    }
}
