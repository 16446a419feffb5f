//! Companion runtime actor.
//!
//! A single task owns the [`CompanionScene`] and serializes every input
//! through it: client commands, the periodic tick, timer deadlines and the
//! completions of spawned work. Track loading and voice playback decode and
//! open devices on the blocking pool, so the loop itself never blocks.
//! Clients talk to it through a cloneable [`CompanionHandle`].

use crate::audio::{AudioBackend, AudioFetcher, AudioStream, PlaybackSettings, start_stream};
use crate::config::CompanionConfig;
use crate::dialogue::LineKind;
use crate::entity::{MovementDirection, Point};
use crate::error::{CompanionError, Result};
use crate::music::{AudioResource, FetchTicket, load_track};
use crate::runtime::{CompanionEvent, EventBus};
use crate::scene::{
    ClickOutcome, CompanionScene, CompanionStatus, Effect, MusicOutcome, PointerButton,
    ScenePorts, SpeechOutcome,
};
use crate::speech::{EndReason, SessionId};
use crate::voice::{VoicePreset, VoiceRenderer};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const COMMAND_CAPACITY: usize = 64;

/// Everything the runtime needs besides configuration.
pub struct RuntimeParts {
    pub ports: ScenePorts,
    pub backend: Arc<dyn AudioBackend>,
    pub fetcher: Arc<dyn AudioFetcher>,
    pub voice: Arc<dyn VoiceRenderer>,
    pub events: EventBus,
    pub rng: StdRng,
    /// Spawn point, also the target of `reset`.
    pub center: Point,
}

enum Command {
    Click {
        point: Point,
        button: PointerButton,
        reply: oneshot::Sender<ClickOutcome>,
    },
    Speak {
        text: Option<String>,
        kind: Option<LineKind>,
        reply: oneshot::Sender<SpeechOutcome>,
    },
    SpeechFinished {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Move {
        direction: MovementDirection,
        reply: oneshot::Sender<bool>,
    },
    Fall {
        reply: oneshot::Sender<bool>,
    },
    Reset {
        reply: oneshot::Sender<bool>,
    },
    PlayMusic {
        resource: AudioResource,
        reply: oneshot::Sender<MusicOutcome>,
    },
    StopMusic {
        reply: oneshot::Sender<bool>,
    },
    SetVoicePreset {
        preset: VoicePreset,
        reply: oneshot::Sender<VoicePreset>,
    },
    Status {
        reply: oneshot::Sender<CompanionStatus>,
    },
}

enum Completion {
    MusicLoaded {
        ticket: FetchTicket,
        result: Result<Box<dyn AudioStream>>,
    },
    /// `None` when the renderer produced no audio.
    VoiceReady {
        session: SessionId,
        result: Result<Option<Box<dyn AudioStream>>>,
    },
}

/// Cloneable client of a running [`CompanionRuntime`].
#[derive(Clone)]
pub struct CompanionHandle {
    tx: mpsc::Sender<Command>,
    events: EventBus,
    cancel: CancellationToken,
}

impl CompanionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CompanionError::Channel("companion runtime has stopped".to_owned()))?;
        response
            .await
            .map_err(|e| CompanionError::Channel(format!("companion reply dropped: {e}")))
    }

    pub async fn click(&self, point: Point, button: PointerButton) -> Result<ClickOutcome> {
        self.request(|reply| Command::Click {
            point,
            button,
            reply,
        })
        .await
    }

    /// Speak `text`, or a random greeting when `None`.
    pub async fn speak(&self, text: Option<String>) -> Result<SpeechOutcome> {
        self.request(|reply| Command::Speak {
            text,
            kind: None,
            reply,
        })
        .await
    }

    /// Speak a line of `kind` chosen by the dialogue provider.
    pub async fn speak_line(&self, kind: LineKind) -> Result<SpeechOutcome> {
        self.request(|reply| Command::Speak {
            text: None,
            kind: Some(kind),
            reply,
        })
        .await
    }

    /// Report that the renderer finished displaying `session`.
    pub async fn speech_finished(&self, session: SessionId) -> Result<bool> {
        self.request(|reply| Command::SpeechFinished { session, reply })
            .await
    }

    pub async fn move_entity(&self, direction: MovementDirection) -> Result<bool> {
        self.request(|reply| Command::Move { direction, reply }).await
    }

    pub async fn fall(&self) -> Result<bool> {
        self.request(|reply| Command::Fall { reply }).await
    }

    pub async fn reset(&self) -> Result<bool> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn play_music(&self, resource: AudioResource) -> Result<MusicOutcome> {
        self.request(|reply| Command::PlayMusic { resource, reply })
            .await
    }

    pub async fn stop_music(&self) -> Result<bool> {
        self.request(|reply| Command::StopMusic { reply }).await
    }

    /// Voice for renders from now on. Returns the previous preset.
    pub async fn set_voice_preset(&self, preset: VoicePreset) -> Result<VoicePreset> {
        self.request(|reply| Command::SetVoicePreset { preset, reply })
            .await
    }

    pub async fn status(&self) -> Result<CompanionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.events.subscribe()
    }

    /// Ask the runtime to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the runtime has been asked to stop.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }
}

/// The actor owning the scene. Drive it with [`CompanionRuntime::run`].
pub struct CompanionRuntime {
    scene: CompanionScene,
    center: Point,
    tick_interval: Duration,
    commands: mpsc::Receiver<Command>,
    backend: Arc<dyn AudioBackend>,
    fetcher: Arc<dyn AudioFetcher>,
    voice: Arc<dyn VoiceRenderer>,
    tasks: JoinSet<Completion>,
    cancel: CancellationToken,
}

impl CompanionRuntime {
    pub fn new(config: &CompanionConfig, parts: RuntimeParts) -> (Self, CompanionHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let scene = CompanionScene::new(
            config,
            parts.ports,
            parts.events.clone(),
            parts.rng,
            Instant::now(),
        );

        let runtime = Self {
            scene,
            center: parts.center,
            tick_interval: config.behavior.tick_interval(),
            commands,
            backend: parts.backend,
            fetcher: parts.fetcher,
            voice: parts.voice,
            tasks: JoinSet::new(),
            cancel: cancel.clone(),
        };
        let handle = CompanionHandle {
            tx,
            events: parts.events,
            cancel,
        };
        (runtime, handle)
    }

    /// Load the scene and process inputs until shut down or every handle is dropped.
    pub async fn run(mut self) {
        self.scene.on_load(Instant::now(), self.center);

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.scene.next_deadline();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!("companion runtime cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::info!("all companion handles dropped");
                        break;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(completion) => self.complete(completion),
                        Err(error) => tracing::warn!(%error, "companion worker task failed"),
                    }
                }
                () = sleep_until(deadline) => self.scene.run_due_timers(Instant::now()),
                _ = ticker.tick() => self.scene.tick(Instant::now()),
            }
            self.dispatch_effects();
        }

        self.tasks.abort_all();
        self.scene.shutdown();
        self.cancel.cancel();
        tracing::info!("companion runtime stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = Instant::now();
        // Replies fail only when the caller gave up waiting.
        match command {
            Command::Click {
                point,
                button,
                reply,
            } => {
                let _ = reply.send(self.scene.click(now, point, button));
            }
            Command::Speak { text, kind, reply } => {
                let outcome = match (text, kind) {
                    (None, Some(kind)) => self.scene.speak_line(now, kind),
                    (text, _) => self.scene.speak(now, text),
                };
                let _ = reply.send(outcome);
            }
            Command::SpeechFinished { session, reply } => {
                let _ = reply.send(self.scene.finish_speech(session, EndReason::Completed));
            }
            Command::Move { direction, reply } => {
                let _ = reply.send(self.scene.move_entity(now, direction));
            }
            Command::Fall { reply } => {
                let _ = reply.send(self.scene.start_falling(now));
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.scene.reset_to_center(now, self.center));
            }
            Command::PlayMusic { resource, reply } => {
                let _ = reply.send(self.scene.play_music(resource));
            }
            Command::StopMusic { reply } => {
                let _ = reply.send(self.scene.stop_music());
            }
            Command::SetVoicePreset { preset, reply } => {
                let _ = reply.send(self.scene.set_voice_preset(preset));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.scene.status(now));
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::MusicLoaded { ticket, result } => {
                if self.scene.music_loaded(ticket, result).is_none() {
                    tracing::debug!(ticket = ticket.0, "discarded stale music load");
                }
            }
            Completion::VoiceReady { session, result } => {
                self.scene.voice_ready(session, result);
            }
        }
    }

    fn dispatch_effects(&mut self) {
        for effect in self.scene.take_effects() {
            match effect {
                Effect::LoadMusic {
                    ticket,
                    resource,
                    settings,
                } => {
                    let fetcher = Arc::clone(&self.fetcher);
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        let result = load_track(resource, fetcher, backend, settings).await;
                        Completion::MusicLoaded { ticket, result }
                    });
                }
                Effect::RenderVoice {
                    session,
                    text,
                    preset,
                } => {
                    let voice = Arc::clone(&self.voice);
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        let result = match voice.render(&text, preset).await {
                            Ok(data) if data.is_empty() => Ok(None),
                            Ok(data) => start_stream(
                                backend,
                                data,
                                Some("mp3".to_owned()),
                                PlaybackSettings::default(),
                            )
                            .await
                            .map(Some),
                            Err(error) => Err(error),
                        };
                        Completion::VoiceReady { session, result }
                    });
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
