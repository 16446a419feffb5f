//! Process startup: logging initialization and runtime assembly from config.
//!
//! Binaries call [`init_logging`] first, then [`assemble_runtime`] to wire
//! the production collaborators (cpal output, HTTP fetch, cloud or silent
//! voice) into a [`CompanionRuntime`].

use crate::audio::{CpalBackend, HttpFetcher};
use crate::config::{CompanionConfig, LoggingConfig};
use crate::controller::{CompanionHandle, CompanionRuntime, RuntimeParts};
use crate::dialogue::StaticDialogue;
use crate::entity::{Avatar, Point};
use crate::error::Result;
use crate::runtime::EventBus;
use crate::scene::ScenePorts;
use crate::voice::{CloudVoiceRenderer, SilentVoice, VoiceRenderer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Where the companion appears when no host supplies a position.
pub const DEFAULT_CENTER: Point = Point::new(400.0, 300.0);

const LOG_FILE_PREFIX: &str = "fluffel.log";

/// Install the global subscriber.
///
/// Console output always goes to stderr. When `logging.directory` is set a
/// daily rolling file is written as well; keep the returned guard alive for
/// the lifetime of the process or buffered lines are lost.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
    guard
}

/// Voice renderer selected by configuration.
///
/// Falls back to [`SilentVoice`] when voice is disabled or the cloud client
/// cannot be built (for example without an API key).
pub fn voice_renderer(config: &CompanionConfig) -> Arc<dyn VoiceRenderer> {
    if !config.voice.enabled {
        return Arc::new(SilentVoice);
    }
    let timeout = Duration::from_secs(config.audio.fetch_timeout_secs.max(1));
    match CloudVoiceRenderer::from_config(&config.voice, timeout) {
        Ok(renderer) => Arc::new(renderer),
        Err(e) => {
            tracing::warn!(error = %e, "voice synthesis unavailable, lines will be text only");
            Arc::new(SilentVoice)
        }
    }
}

/// Build a runtime with the production audio stack around `avatar`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn assemble_runtime(
    config: &CompanionConfig,
    avatar: Box<dyn Avatar>,
    events: EventBus,
    center: Point,
) -> Result<(CompanionRuntime, CompanionHandle)> {
    let timeout = Duration::from_secs(config.audio.fetch_timeout_secs.max(1));
    let fetcher = HttpFetcher::new(timeout)?;

    let mut config = config.clone();
    if config.voice.enabled && config.voice.effective_api_key().is_none() {
        tracing::warn!(
            env = crate::config::VoiceConfig::API_KEY_ENV,
            "voice enabled without an API key; disabling voice"
        );
        config.voice.enabled = false;
    }

    let parts = RuntimeParts {
        ports: ScenePorts {
            avatar,
            dialogue: Box::new(StaticDialogue::new()),
        },
        backend: Arc::new(CpalBackend::new(&config.audio)),
        fetcher: Arc::new(fetcher),
        voice: voice_renderer(&config),
        events,
        rng: StdRng::from_entropy(),
        center,
    };
    Ok(CompanionRuntime::new(&config, parts))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn assembles_without_voice_key() {
        let mut config = CompanionConfig::default();
        config.voice.enabled = true;
        config.voice.api_key = Some("   ".to_owned());
        if std::env::var(crate::config::VoiceConfig::API_KEY_ENV).is_ok() {
            return;
        }
        let (_runtime, handle) = assemble_runtime(
            &config,
            Box::new(crate::entity::RecordingAvatar::new()),
            EventBus::default(),
            DEFAULT_CENTER,
        )
        .unwrap();
        assert!(!handle.is_shut_down());
    }
}
