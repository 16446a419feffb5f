//! Configuration types for the companion controller.

use crate::error::{CompanionError, Result};
use crate::voice::VoicePreset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Idle/boredom, movement and ambient animation timing.
    pub behavior: BehaviorConfig,
    /// Speech arbitration timing.
    pub speech: SpeechConfig,
    /// Music playback and remote fetch settings.
    pub audio: AudioConfig,
    /// Voice synthesis settings.
    pub voice: VoiceConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Autonomous behavior and movement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Seconds without activity before a bored behavior starts.
    pub bored_threshold_secs: f64,
    /// How long the sleeping routine runs before it is stopped.
    pub sleep_secs: f64,
    /// How long the dancing routine runs.
    pub dance_secs: f64,
    /// How long the excited routine runs.
    pub excite_secs: f64,
    /// How long the rolling routine runs.
    pub roll_secs: f64,
    /// Interval of the ambient blink loop.
    pub blink_interval_secs: f64,
    /// Simulation tick interval (boredom checks, stream polling).
    pub tick_interval_ms: u64,
    /// Minimum spacing between two accepted move inputs.
    pub move_delay_secs: f64,
    /// Distance covered by one move input.
    pub move_distance: f64,
    /// Line spoken shortly after the scene loads (empty = stay silent).
    pub startup_greeting: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            bored_threshold_secs: 10.0,
            sleep_secs: 5.0,
            dance_secs: 4.0,
            excite_secs: 3.0,
            roll_secs: 2.0,
            blink_interval_secs: 5.0,
            tick_interval_ms: 100,
            move_delay_secs: 0.01,
            move_distance: 8.0,
            startup_greeting: "Hello! I'm Fluffel!".to_owned(),
        }
    }
}

impl BehaviorConfig {
    pub fn bored_threshold(&self) -> Duration {
        secs(self.bored_threshold_secs)
    }

    pub fn blink_interval(&self) -> Duration {
        secs(self.blink_interval_secs)
    }

    pub fn move_delay(&self) -> Duration {
        secs(self.move_delay_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Speech arbitration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Display time per character of text.
    pub secs_per_char: f64,
    /// Lower clamp of the display duration.
    pub min_duration_secs: f64,
    /// Upper clamp of the display duration.
    pub max_duration_secs: f64,
    /// Extra time granted before the safety timer force-clears a session.
    pub safety_margin_secs: f64,
    /// Two clicks closer than this count as one burst.
    pub click_burst_window_secs: f64,
    /// Burst length that forcibly ends an in-flight session.
    pub click_burst_threshold: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            secs_per_char: 0.15,
            min_duration_secs: 2.0,
            max_duration_secs: 5.0,
            safety_margin_secs: 1.0,
            click_burst_window_secs: 0.5,
            click_burst_threshold: 5,
        }
    }
}

impl SpeechConfig {
    /// Display duration for `text`: `clamp(chars * secs_per_char, min, max)`.
    ///
    /// Written with `max`/`min` rather than `f64::clamp`, which panics on NaN bounds.
    pub fn duration_for(&self, text: &str) -> Duration {
        let estimate = text.chars().count() as f64 * self.secs_per_char;
        secs(estimate.max(self.min_duration_secs).min(self.max_duration_secs))
    }

    pub fn safety_margin(&self) -> Duration {
        secs(self.safety_margin_secs)
    }

    pub fn click_burst_window(&self) -> Duration {
        secs(self.click_burst_window_secs)
    }
}

/// Music playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Playback volume (0.0–1.0).
    pub volume: f32,
    /// Timeout for downloading remote audio.
    pub fetch_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            volume: 1.0,
            fetch_timeout_secs: 30,
        }
    }
}

/// Voice synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Whether spoken lines are also synthesized to audio.
    pub enabled: bool,
    /// Voice character.
    pub preset: VoicePreset,
    /// Synthesis endpoint.
    pub endpoint: String,
    /// API key for the synthesis endpoint. Falls back to `FLUFFEL_TTS_API_KEY`.
    pub api_key: Option<String>,
    /// BCP-47 language code sent to the synthesis service.
    pub language_code: String,
    /// Service voice name.
    pub voice_name: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            preset: VoicePreset::default(),
            endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize".to_owned(),
            api_key: None,
            language_code: "en-US".to_owned(),
            voice_name: "en-US-Standard-C".to_owned(),
        }
    }
}

impl VoiceConfig {
    /// Environment variable consulted when `api_key` is unset.
    pub const API_KEY_ENV: &'static str = "FLUFFEL_TTS_API_KEY";

    pub fn effective_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(Self::API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily rolling log files (None = stderr only).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "fluffel=info".to_owned(),
            directory: None,
        }
    }
}

/// Seconds to [`Duration`]; negative or non-finite values collapse to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl CompanionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| CompanionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CompanionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/fluffel/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("fluffel").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("fluffel")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/fluffel-config/config.toml")
        }
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CompanionError::Config`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let behavior = &self.behavior;
        let speech = &self.speech;
        for (name, value) in [
            ("behavior.bored_threshold_secs", behavior.bored_threshold_secs),
            ("behavior.sleep_secs", behavior.sleep_secs),
            ("behavior.dance_secs", behavior.dance_secs),
            ("behavior.excite_secs", behavior.excite_secs),
            ("behavior.roll_secs", behavior.roll_secs),
            ("behavior.blink_interval_secs", behavior.blink_interval_secs),
            ("behavior.move_delay_secs", behavior.move_delay_secs),
            ("behavior.move_distance", behavior.move_distance),
            ("speech.secs_per_char", speech.secs_per_char),
            ("speech.min_duration_secs", speech.min_duration_secs),
            ("speech.max_duration_secs", speech.max_duration_secs),
            ("speech.safety_margin_secs", speech.safety_margin_secs),
            ("speech.click_burst_window_secs", speech.click_burst_window_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CompanionError::Config(format!(
                    "{name} must be a finite, non-negative number, got {value}"
                )));
            }
        }
        if speech.min_duration_secs > speech.max_duration_secs {
            return Err(CompanionError::Config(format!(
                "speech.min_duration_secs ({}) exceeds speech.max_duration_secs ({})",
                speech.min_duration_secs, speech.max_duration_secs
            )));
        }
        if speech.click_burst_threshold == 0 {
            return Err(CompanionError::Config(
                "speech.click_burst_threshold must be at least 1".to_owned(),
            ));
        }
        if self.behavior.bored_threshold_secs <= 0.0 {
            return Err(CompanionError::Config(
                "behavior.bored_threshold_secs must be positive".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(CompanionError::Config(format!(
                "audio.volume must be within 0.0..=1.0, got {}",
                self.audio.volume
            )));
        }
        Ok(())
    }
}
