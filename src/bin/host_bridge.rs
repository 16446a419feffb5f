//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` lines from stdin, drives a companion runtime and
//! writes `ResponseEnvelope` and `EventEnvelope` lines to stdout. Avatar
//! commands are forwarded as `avatar.command` events for the host to draw.
//!
//! All tracing output goes to stderr so that stdout stays a clean protocol
//! channel.

use fluffel::CompanionConfig;
use fluffel::host::stdio::run_stdio_bridge;
use fluffel::runtime::{EventAvatar, EventBus};
use fluffel::startup::{DEFAULT_CENTER, assemble_runtime, init_logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var_os("FLUFFEL_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(CompanionConfig::default_config_path);
    let config = if path.exists() {
        CompanionConfig::from_file(&path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?
    } else {
        CompanionConfig::default()
    };
    let _log_guard = init_logging(&config.logging);

    tracing::info!("fluffel-host starting");

    let events = EventBus::new(1024);
    let avatar = Box::new(EventAvatar::new(events.clone()));
    let (runtime, handle) = assemble_runtime(&config, avatar, events, DEFAULT_CENTER)?;
    let runtime_task = tokio::spawn(runtime.run());

    let result = run_stdio_bridge(handle.clone()).await;
    handle.shutdown();
    let _ = runtime_task.await;

    result.map_err(|e| {
        tracing::error!(error = %e, "fluffel-host exited with error");
        anyhow::anyhow!("fluffel-host failed: {e}")
    })?;

    tracing::info!("fluffel-host shut down cleanly");
    Ok(())
}
