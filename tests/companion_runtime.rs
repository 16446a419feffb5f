//! Runtime-level behavior driven through `CompanionHandle` on a paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use fluffel::controller::{CompanionRuntime, RuntimeParts};
use fluffel::dialogue::StaticDialogue;
use fluffel::music::StopReason;
use fluffel::scene::{ClickOutcome, MusicOutcome, ScenePorts, SpeechOutcome};
use fluffel::speech::EndReason;
use fluffel::test_utils::{FakeBackend, FakeFetcher, SharedAvatar};
use fluffel::voice::SilentVoice;
use fluffel::{
    AudioResource, AvatarCommand, CompanionConfig, CompanionEvent, CompanionHandle, EntityMode,
    EventBus, Point, PointerButton,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CENTER: Point = Point::new(300.0, 200.0);

struct Companion {
    handle: CompanionHandle,
    task: JoinHandle<()>,
    avatar: SharedAvatar,
    backend: FakeBackend,
    fetcher: FakeFetcher,
}

impl Companion {
    fn start(config: CompanionConfig) -> Self {
        let avatar = SharedAvatar::new();
        let backend = FakeBackend::new();
        let fetcher = FakeFetcher::new();
        let (runtime, handle) = CompanionRuntime::new(
            &config,
            RuntimeParts {
                ports: ScenePorts {
                    avatar: Box::new(avatar.clone()),
                    dialogue: Box::new(StaticDialogue::seeded(11)),
                },
                backend: Arc::new(backend.clone()),
                fetcher: Arc::new(fetcher.clone()),
                voice: Arc::new(SilentVoice),
                events: EventBus::new(4096),
                rng: StdRng::seed_from_u64(11),
                center: CENTER,
            },
        );
        Self {
            handle,
            task: tokio::spawn(runtime.run()),
            avatar,
            backend,
            fetcher,
        }
    }

    fn quiet() -> Self {
        let mut config = CompanionConfig::default();
        config.behavior.startup_greeting = String::new();
        Self::start(config)
    }

    async fn stop(self) -> (SharedAvatar, FakeBackend) {
        self.handle.shutdown();
        self.task.await.unwrap();
        (self.avatar, self.backend)
    }
}

fn drain(rx: &mut broadcast::Receiver<CompanionEvent>) -> Vec<CompanionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn startup_greeting_is_spoken_after_load() {
    let companion = Companion::start(CompanionConfig::default());
    let mut events = companion.handle.subscribe();

    tokio::time::sleep(Duration::from_millis(2_600)).await;
    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        CompanionEvent::SpeechStarted { text, .. } if text == "Hello! I'm Fluffel!"
    )));
    assert!(seen.iter().any(|e| matches!(e, CompanionEvent::Moved { position, .. } if *position == CENTER)));

    let (avatar, _) = companion.stop().await;
    assert_eq!(avatar.commands().first(), Some(&AvatarCommand::Smile));
}

#[tokio::test(start_paused = true)]
async fn rapid_clicks_override_and_speech_recovers() {
    let companion = Companion::quiet();
    let mut events = companion.handle.subscribe();

    let mut last = None;
    for _ in 0..5 {
        last = Some(
            companion
                .handle
                .click(CENTER, PointerButton::Primary)
                .await
                .unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let Some(ClickOutcome::Speech {
        speech: SpeechOutcome::Overridden { session },
    }) = last
    else {
        panic!("fifth click should override, got {last:?}");
    };
    assert!(!companion.handle.status().await.unwrap().speaking);

    // The next click after the burst starts fresh speech.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let next = companion
        .handle
        .click(CENTER, PointerButton::Primary)
        .await
        .unwrap();
    assert!(matches!(
        next,
        ClickOutcome::Speech {
            speech: SpeechOutcome::Started { .. }
        }
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let seen = drain(&mut events);
    let stopped = seen
        .iter()
        .filter(|e| matches!(e, CompanionEvent::SpeechStopped { .. }))
        .count();
    assert_eq!(stopped, 1);
    assert!(!seen.iter().any(|e| matches!(
        e,
        CompanionEvent::SpeechFinished { session: s, .. } if *s == session
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        CompanionEvent::SpeechFinished { reason: EndReason::Completed, .. }
    )));

    companion.stop().await;
}

#[tokio::test(start_paused = true)]
async fn slow_clicks_never_override() {
    let companion = Companion::quiet();
    companion
        .handle
        .speak(Some("x".repeat(40)))
        .await
        .unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(550)).await;
        if !companion.handle.status().await.unwrap().speaking {
            break;
        }
        let outcome = companion
            .handle
            .click(CENTER, PointerButton::Primary)
            .await
            .unwrap();
        assert!(
            matches!(
                outcome,
                ClickOutcome::Speech {
                    speech: SpeechOutcome::Counted {
                        consecutive_clicks: 1
                    }
                }
            ),
            "{outcome:?}"
        );
    }

    companion.stop().await;
}

#[tokio::test(start_paused = true)]
async fn falling_blocks_boredom_until_reset() {
    let companion = Companion::quiet();
    let mut events = companion.handle.subscribe();

    assert!(companion.handle.fall().await.unwrap());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, CompanionEvent::BoredBehaviorStarted { .. }))
    );
    assert_eq!(
        companion.handle.status().await.unwrap().mode,
        Some(EntityMode::Falling)
    );

    assert!(companion.handle.reset().await.unwrap());
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, CompanionEvent::BoredBehaviorStarted { .. }))
    );

    companion.stop().await;
}

#[tokio::test(start_paused = true)]
async fn local_tracks_replace_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp3");
    let b = dir.path().join("b.mp3");
    std::fs::write(&a, "track-a").unwrap();
    std::fs::write(&b, "track-b").unwrap();

    let companion = Companion::quiet();
    let mut events = companion.handle.subscribe();

    let first = companion
        .handle
        .play_music(AudioResource::parse(a.to_str().unwrap()).unwrap())
        .await
        .unwrap();
    assert!(matches!(first, MusicOutcome::Loading { .. }));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(companion.backend.live_labels(), vec!["track-a".to_owned()]);

    let second = companion
        .handle
        .play_music(AudioResource::parse(b.to_str().unwrap()).unwrap())
        .await
        .unwrap();
    assert!(matches!(second, MusicOutcome::Loading { .. }));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(companion.backend.live_labels(), vec!["track-b".to_owned()]);
    assert!(companion.backend.stream("track-a").unwrap().is_released());
    assert!(drain(&mut events).contains(&CompanionEvent::MusicStopped {
        reason: StopReason::Replaced
    }));

    let (avatar, backend) = companion.stop().await;
    assert_eq!(backend.live_streams(), 0);
    assert_eq!(
        avatar.count(|c| *c == AvatarCommand::StartListening),
        avatar.count(|c| *c == AvatarCommand::StopListening)
    );
}

#[tokio::test(start_paused = true)]
async fn finished_track_ends_listening_pose() {
    let companion = Companion::quiet();
    companion
        .fetcher
        .serve("https://music.example/song.mp3", "song");
    let mut events = companion.handle.subscribe();

    companion
        .handle
        .play_music(AudioResource::parse("https://music.example/song.mp3").unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(companion.backend.live_labels(), vec!["song".to_owned()]);

    companion.backend.finish_all();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(drain(&mut events).contains(&CompanionEvent::MusicStopped {
        reason: StopReason::Finished
    }));
    assert_eq!(companion.backend.live_streams(), 0);
    assert!(companion.handle.status().await.unwrap().music.is_none());

    companion.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_reports_and_keeps_running() {
    let companion = Companion::quiet();
    companion
        .fetcher
        .fail("https://music.example/missing.mp3", "404 Not Found");
    let mut events = companion.handle.subscribe();

    companion
        .handle
        .play_music(AudioResource::parse("https://music.example/missing.mp3").unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, CompanionEvent::MusicFailed { .. }))
    );
    assert_eq!(companion.backend.opened(), 0);
    assert!(companion.handle.status().await.unwrap().music.is_none());

    companion.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_local_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.mp3");

    let companion = Companion::quiet();
    let mut events = companion.handle.subscribe();
    companion
        .handle
        .play_music(AudioResource::parse(missing.to_str().unwrap()).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, CompanionEvent::MusicFailed { .. }))
    );
    let status = companion.handle.status().await.unwrap();
    assert!(status.music.is_none());
    assert!(!status.music_pending);

    companion.stop().await;
}
