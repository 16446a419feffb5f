//! CLI binary for fluffel.

use clap::{Parser, Subcommand};
use fluffel::audio::CpalBackend;
use fluffel::runtime::EventAvatar;
use fluffel::speech::EndReason;
use fluffel::startup::{DEFAULT_CENTER, assemble_runtime, init_logging};
use fluffel::{AudioResource, CompanionConfig, CompanionEvent, CompanionHandle, EventBus};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::info;

/// Fluffel: an animated desktop companion.
#[derive(Parser)]
#[command(name = "fluffel", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "FLUFFEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the companion headless, printing what it does.
    Run,

    /// Play a music resource (URL or local path) until it ends.
    Play { resource: String },

    /// Say a line and exit once it has been shown.
    Say { text: String },

    /// List available audio output devices.
    Devices,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(CompanionConfig::default_config_path);
    let config = load_config(&config_path, cli.config.is_some())?;
    let _log_guard = init_logging(&config.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Play { resource } => play(config, &resource).await,
        Command::Say { text } => say(config, text).await,
        Command::Devices => list_devices(),
        Command::InitConfig { force } => init_config(&config_path, force),
    }
}

fn load_config(path: &Path, explicit: bool) -> anyhow::Result<CompanionConfig> {
    if explicit || path.exists() {
        CompanionConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))
    } else {
        Ok(CompanionConfig::default())
    }
}

/// Start the runtime and stop it on Ctrl+C.
fn spawn_companion(
    config: &CompanionConfig,
) -> anyhow::Result<(CompanionHandle, tokio::task::JoinHandle<()>)> {
    let events = EventBus::default();
    let avatar = Box::new(EventAvatar::new(events.clone()));
    let (runtime, handle) = assemble_runtime(config, avatar, events, DEFAULT_CENTER)?;
    let task = tokio::spawn(runtime.run());

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c.shutdown();
        }
    });

    Ok((handle, task))
}

fn print_event(event: &CompanionEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{:<24} {json}", event.name()),
        Err(_) => println!("{}", event.name()),
    }
}

/// Print events until `done` matches one (returned) or the runtime stops.
async fn watch(
    handle: &CompanionHandle,
    mut events: broadcast::Receiver<CompanionEvent>,
    done: impl Fn(&CompanionEvent) -> bool,
) -> Option<CompanionEvent> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if done(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            },
            () = handle.stopped() => return None,
        }
    }
}

async fn run(config: CompanionConfig) -> anyhow::Result<()> {
    println!("Fluffel v{}", env!("CARGO_PKG_VERSION"));
    let (handle, task) = spawn_companion(&config)?;
    println!("Running. Press Ctrl+C to stop.\n");

    watch(&handle, handle.subscribe(), |_| false).await;
    handle.shutdown();
    task.await?;
    Ok(())
}

async fn play(config: CompanionConfig, raw: &str) -> anyhow::Result<()> {
    let resource = AudioResource::parse(raw)?;
    let (handle, task) = spawn_companion(&config)?;
    let events = handle.subscribe();

    let outcome = handle.play_music(resource).await?;
    info!(?outcome, "play requested");

    let last = watch(&handle, events, |event| {
        matches!(
            event,
            CompanionEvent::MusicStopped { .. } | CompanionEvent::MusicFailed { .. }
        )
    })
    .await;
    handle.shutdown();
    task.await?;
    if let Some(CompanionEvent::MusicFailed { message, .. }) = last {
        anyhow::bail!("could not play {raw}: {message}");
    }
    Ok(())
}

async fn say(mut config: CompanionConfig, text: String) -> anyhow::Result<()> {
    config.behavior.startup_greeting = String::new();
    let (handle, task) = spawn_companion(&config)?;
    let events = handle.subscribe();

    let outcome = handle.speak(Some(text)).await?;
    let fluffel::scene::SpeechOutcome::Started { session, .. } = outcome else {
        handle.shutdown();
        task.await?;
        anyhow::bail!("speech was not started: {outcome:?}");
    };

    watch(&handle, events, |event| match event {
        CompanionEvent::SpeechFinished { session: s, reason } => {
            *s == session && *reason != EndReason::Shutdown
        }
        CompanionEvent::SpeechStopped { session: s } => *s == session,
        _ => false,
    })
    .await;
    handle.shutdown();
    task.await?;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Output devices:");
    for name in CpalBackend::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    CompanionConfig::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
