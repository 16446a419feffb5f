//! The companion scene: every piece of behavioral state, mutated from one
//! execution context.
//!
//! [`CompanionScene`] is synchronous. It never sleeps, never awaits and
//! never touches audio files or devices; delays are [`TimerQueue`] entries
//! and slow work (loading tracks, voice synthesis) is requested through
//! [`Effect`]s that the runtime actor spawns and later feeds back in.

use crate::activity::ActivityClock;
use crate::audio::{AudioStream, PlaybackSettings};
use crate::boredom::{BoredBehavior, BoredomDetector};
use crate::config::{BehaviorConfig, CompanionConfig};
use crate::dialogue::{DialogueProvider, LineKind};
use crate::entity::{
    Avatar, AvatarCommand, Entity, EntityId, EntityMode, EntityRegistry, Facing, MovementDirection,
    Point,
};
use crate::error::Result;
use crate::music::{AudioResource, FetchTicket, MusicPlayer, PlayOutcome};
use crate::runtime::{CompanionEvent, EventBus};
use crate::speech::{
    EndReason, SessionId, SpeechArbiter, SpeechDecision, SpeechEnded, SpeechRequest,
};
use crate::timer::{TimerId, TimerQueue};
use crate::voice::VoicePreset;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

const FIRST_BLINK_DELAY: Duration = Duration::from_secs(2);
const ANNOUNCE_DELAY: Duration = Duration::from_secs(2);
const GREETING_DELAY: Duration = Duration::from_millis(2_500);
const RETURN_LINE_DELAY: Duration = Duration::from_millis(600);
const RETURN_LINE: &str = "I'm back!";

/// Pointer button of a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
    Primary,
    Secondary,
}

/// Asynchronous work the runtime must perform on the scene's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    LoadMusic {
        ticket: FetchTicket,
        resource: AudioResource,
        settings: PlaybackSettings,
    },
    RenderVoice {
        session: SessionId,
        text: String,
        preset: VoicePreset,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum DeferredAction {
    Blink(EntityId),
    BlinkLoop(EntityId),
    AnnouncePosition(EntityId),
    Say { entity: EntityId, text: String },
    SpeechDisplayEnded(SessionId),
    SpeechSafety(SessionId),
    StopBoredBehavior {
        entity: EntityId,
        behavior: BoredBehavior,
    },
}

/// What happened to a speak request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpeechOutcome {
    Started { session: SessionId, text: String },
    Counted { consecutive_clicks: u32 },
    Rejected,
    Overridden { session: SessionId },
}

/// What happened to a click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// Outside the entity's bounds, or no entity.
    Missed,
    MenuRequested,
    Speech { speech: SpeechOutcome },
}

/// What happened to a music request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MusicOutcome {
    /// The track is being read or fetched and started off the actor.
    Loading { ticket: FetchTicket },
    Started { resource: String },
    Failed { resource: String, message: String },
}

/// Point-in-time view of the scene for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionStatus {
    pub entity: Option<EntityId>,
    pub mode: Option<EntityMode>,
    pub position: Option<Point>,
    pub facing: Option<Facing>,
    pub speaking: bool,
    pub session: Option<SessionId>,
    pub consecutive_clicks: u32,
    pub music: Option<String>,
    pub music_pending: bool,
    pub voice_preset: VoicePreset,
    pub idle_secs: f64,
    pub pending_timers: usize,
}

/// Collaborators the scene drives.
pub struct ScenePorts {
    pub avatar: Box<dyn Avatar>,
    pub dialogue: Box<dyn DialogueProvider>,
}

pub struct CompanionScene {
    behavior: BehaviorConfig,
    voice_enabled: bool,
    voice_preset: VoicePreset,
    registry: EntityRegistry,
    companion: Option<EntityId>,
    activity: ActivityClock,
    boredom: BoredomDetector,
    speech: SpeechArbiter,
    speech_display: Option<(SessionId, TimerId)>,
    music: MusicPlayer,
    voice_stream: Option<(SessionId, Box<dyn AudioStream>)>,
    timers: TimerQueue<DeferredAction>,
    avatar: Box<dyn Avatar>,
    dialogue: Box<dyn DialogueProvider>,
    events: EventBus,
    rng: StdRng,
    effects: Vec<Effect>,
    last_move: Option<Instant>,
}

impl CompanionScene {
    pub fn new(
        config: &CompanionConfig,
        ports: ScenePorts,
        events: EventBus,
        rng: StdRng,
        now: Instant,
    ) -> Self {
        Self {
            behavior: config.behavior.clone(),
            voice_enabled: config.voice.enabled,
            voice_preset: config.voice.preset,
            registry: EntityRegistry::new(),
            companion: None,
            activity: ActivityClock::new(now),
            boredom: BoredomDetector::new(config.behavior.bored_threshold()),
            speech: SpeechArbiter::new(config.speech.clone()),
            speech_display: None,
            music: MusicPlayer::new(PlaybackSettings::default()),
            voice_stream: None,
            timers: TimerQueue::new(),
            avatar: ports.avatar,
            dialogue: ports.dialogue,
            events,
            rng,
            effects: Vec::new(),
            last_move: None,
        }
    }

    /// Spawn the companion at `center` and start the ambient schedule.
    pub fn on_load(&mut self, now: Instant, center: Point) -> EntityId {
        let id = self.registry.spawn(|id| Entity::new(id, center));
        self.companion = Some(id);
        self.activity.reset(now);
        self.avatar.apply(AvatarCommand::Smile);

        self.timers.schedule(now + FIRST_BLINK_DELAY, DeferredAction::Blink(id));
        let interval = self.behavior.blink_interval();
        if !interval.is_zero() {
            self.timers.schedule(now + interval, DeferredAction::BlinkLoop(id));
        }
        self.timers
            .schedule(now + ANNOUNCE_DELAY, DeferredAction::AnnouncePosition(id));

        let greeting = self.behavior.startup_greeting.trim();
        if !greeting.is_empty() {
            self.timers.schedule(
                now + GREETING_DELAY,
                DeferredAction::Say {
                    entity: id,
                    text: greeting.to_owned(),
                },
            );
        }

        tracing::info!(entity = %id, x = center.x, y = center.y, "companion loaded");
        id
    }

    pub fn companion(&self) -> Option<EntityId> {
        self.companion
    }

    pub fn entity(&self) -> Option<&Entity> {
        self.registry.get(self.companion?)
    }

    pub fn mode(&self) -> Option<EntityMode> {
        self.entity().map(Entity::mode)
    }

    pub fn is_speaking(&self) -> bool {
        self.speech.is_in_progress()
    }

    pub fn safety_timer_pending(&self) -> bool {
        self.speech
            .safety_timer()
            .is_some_and(|t| self.timers.is_pending(t))
    }

    pub fn last_activity(&self) -> Instant {
        self.activity.last_activity()
    }

    pub fn music_playing(&self) -> Option<&str> {
        self.music.now_playing()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drain the effects requested since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Periodic update: due timers, boredom, finished streams.
    pub fn tick(&mut self, now: Instant) {
        self.run_due_timers(now);
        self.check_boredom(now);
        self.poll_streams();
    }

    pub fn run_due_timers(&mut self, now: Instant) {
        while let Some((id, action)) = self.timers.pop_due(now) {
            tracing::trace!(timer = %id, ?action, "timer fired");
            self.fire(now, action);
        }
    }

    /// Switch the companion's mode, emitting a notification on change.
    pub fn set_mode(&mut self, mode: EntityMode) -> bool {
        match self.companion {
            Some(id) => self.set_entity_mode(id, mode),
            None => false,
        }
    }

    pub fn click(&mut self, now: Instant, point: Point, button: PointerButton) -> ClickOutcome {
        let hit = self.entity().is_some_and(|e| e.contains(point));
        if !hit {
            return ClickOutcome::Missed;
        }

        match button {
            PointerButton::Secondary => {
                self.events
                    .emit(CompanionEvent::MenuRequested { x: point.x, y: point.y });
                ClickOutcome::MenuRequested
            }
            PointerButton::Primary => {
                let speech = self.request_speech(now, SpeechRequest::click());
                self.activity.record(now);
                ClickOutcome::Speech { speech }
            }
        }
    }

    /// Scripted speak request; `None` lets the dialogue provider pick a greeting.
    pub fn speak(&mut self, now: Instant, text: Option<String>) -> SpeechOutcome {
        let request = match text {
            Some(text) => SpeechRequest::say(text),
            None => SpeechRequest::greeting(),
        };
        self.request_speech(now, request)
    }

    /// Speak a line of `kind` picked by the dialogue provider.
    pub fn speak_line(&mut self, now: Instant, kind: LineKind) -> SpeechOutcome {
        self.request_speech(now, SpeechRequest::line(kind))
    }

    pub fn voice_preset(&self) -> VoicePreset {
        self.voice_preset
    }

    /// Switch the voice for renders requested from now on. Returns the old preset.
    pub fn set_voice_preset(&mut self, preset: VoicePreset) -> VoicePreset {
        let previous = std::mem::replace(&mut self.voice_preset, preset);
        if previous != preset {
            tracing::info!(from = %previous, to = %preset, "voice preset changed");
        }
        previous
    }

    pub fn request_speech(&mut self, now: Instant, request: SpeechRequest) -> SpeechOutcome {
        let decision =
            self.speech
                .request(now, request, self.dialogue.as_mut(), &mut self.rng);

        match decision {
            SpeechDecision::Started(started) => {
                if let Some(stale) = started.stale_safety_timer {
                    self.timers.cancel(stale);
                }
                self.activity.record(now);

                let duration_ms = u64::try_from(started.duration.as_millis()).unwrap_or(u64::MAX);
                self.avatar.apply(AvatarCommand::ShowSpeech {
                    text: started.text.clone(),
                    duration_ms,
                });
                self.events.emit(CompanionEvent::SpeechStarted {
                    session: started.session,
                    text: started.text.clone(),
                    duration_ms,
                });

                let display = self.timers.schedule(
                    now + started.duration,
                    DeferredAction::SpeechDisplayEnded(started.session),
                );
                if let Some((_, old)) = self.speech_display.replace((started.session, display)) {
                    self.timers.cancel(old);
                }
                let safety = self.timers.schedule(
                    now + started.safety_after,
                    DeferredAction::SpeechSafety(started.session),
                );
                if let Some(previous) = self.speech.arm_safety_timer(started.session, safety) {
                    self.timers.cancel(previous);
                }

                if self.voice_enabled {
                    self.effects.push(Effect::RenderVoice {
                        session: started.session,
                        text: started.text.clone(),
                        preset: self.voice_preset,
                    });
                }

                SpeechOutcome::Started {
                    session: started.session,
                    text: started.text,
                }
            }
            SpeechDecision::Counted { consecutive_clicks } => {
                SpeechOutcome::Counted { consecutive_clicks }
            }
            SpeechDecision::Rejected => SpeechOutcome::Rejected,
            SpeechDecision::Overridden(ended) => {
                let session = ended.session;
                self.avatar.apply(AvatarCommand::DismissSpeechBubble);
                self.conclude_speech(&ended);
                self.events.emit(CompanionEvent::SpeechStopped { session });
                SpeechOutcome::Overridden { session }
            }
        }
    }

    /// Completion reported for `session`. Late or duplicate reports are ignored.
    pub fn finish_speech(&mut self, session: SessionId, reason: EndReason) -> bool {
        let Some(ended) = self.speech.finish(session, reason) else {
            return false;
        };
        self.conclude_speech(&ended);
        self.events.emit(CompanionEvent::SpeechFinished {
            session,
            reason: ended.reason,
        });
        true
    }

    /// Started voice stream for a render requested through
    /// [`Effect::RenderVoice`]. `Ok(None)` means the renderer produced no audio.
    pub fn voice_ready(
        &mut self,
        session: SessionId,
        result: Result<Option<Box<dyn AudioStream>>>,
    ) {
        let stream = match result {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(%session, %error, "voice unavailable, showing text only");
                return;
            }
        };
        let Some(mut stream) = stream else {
            return;
        };
        if self.speech.session().map(|s| s.id) != Some(session) {
            tracing::debug!(%session, "discarding voice for a finished session");
            stream.stop();
            return;
        }
        if let Some((_, mut previous)) = self.voice_stream.replace((session, stream)) {
            previous.stop();
        }
    }

    /// Throttled single-step move. Returns whether the input was accepted.
    pub fn move_entity(&mut self, now: Instant, direction: MovementDirection) -> bool {
        let Some(id) = self.companion else {
            return false;
        };
        if self
            .last_move
            .is_some_and(|last| now.saturating_duration_since(last) < self.behavior.move_delay())
        {
            return false;
        }
        self.last_move = Some(now);

        if self.mode() == Some(EntityMode::Idle) {
            self.set_entity_mode(id, EntityMode::Moving);
        }

        let distance = self.behavior.move_distance;
        let Some(entity) = self.registry.get_mut(id) else {
            return false;
        };
        if let Some(facing) = entity.step(direction, distance) {
            self.avatar.apply(AvatarCommand::Face { facing });
        }

        self.activity.record(now);
        self.announce_position(id);
        true
    }

    pub fn start_falling(&mut self, now: Instant) -> bool {
        let Some(id) = self.companion else {
            return false;
        };
        if self.mode() == Some(EntityMode::Falling) {
            return false;
        }
        self.set_entity_mode(id, EntityMode::Falling);
        self.activity.record(now);
        true
    }

    /// Return to `center`, idle and facing right, then say a line shortly after.
    pub fn reset_to_center(&mut self, now: Instant, center: Point) -> bool {
        let Some(id) = self.companion else {
            return false;
        };
        self.set_entity_mode(id, EntityMode::Idle);

        let Some(entity) = self.registry.get_mut(id) else {
            return false;
        };
        entity.set_position(center);
        if let Some(facing) = entity.face(Facing::Right) {
            self.avatar.apply(AvatarCommand::Face { facing });
        }

        self.announce_position(id);
        self.timers.schedule(
            now + RETURN_LINE_DELAY,
            DeferredAction::Say {
                entity: id,
                text: RETURN_LINE.to_owned(),
            },
        );
        self.activity.record(now);
        true
    }

    /// Stop the current track and request a load of `resource`.
    pub fn play_music(&mut self, resource: AudioResource) -> MusicOutcome {
        let (stopped, ticket) = self.music.play(&resource, self.avatar.as_mut());
        if let Some(reason) = stopped {
            self.events.emit(CompanionEvent::MusicStopped { reason });
        }
        self.effects.push(Effect::LoadMusic {
            ticket,
            resource,
            settings: self.music.settings(),
        });
        MusicOutcome::Loading { ticket }
    }

    /// Started stream (or failure) for a load requested through [`Effect::LoadMusic`].
    /// Returns `None` for a superseded ticket.
    pub fn music_loaded(
        &mut self,
        ticket: FetchTicket,
        result: Result<Box<dyn AudioStream>>,
    ) -> Option<MusicOutcome> {
        let outcome = match self.music.loaded(ticket, result, self.avatar.as_mut())? {
            PlayOutcome::Started { resource } => {
                self.events.emit(CompanionEvent::MusicStarting {
                    resource: resource.clone(),
                });
                MusicOutcome::Started { resource }
            }
            PlayOutcome::Failed { resource, error } => {
                let message = error.to_string();
                self.events.emit(CompanionEvent::MusicFailed {
                    resource: resource.clone(),
                    message: message.clone(),
                });
                MusicOutcome::Failed { resource, message }
            }
        };
        Some(outcome)
    }

    /// Stop music. Returns `false`, emitting nothing, when nothing was playing.
    pub fn stop_music(&mut self) -> bool {
        match self.music.stop(self.avatar.as_mut()) {
            Some(reason) => {
                self.events.emit(CompanionEvent::MusicStopped { reason });
                true
            }
            None => false,
        }
    }

    pub fn status(&self, now: Instant) -> CompanionStatus {
        let entity = self.entity();
        CompanionStatus {
            entity: self.companion,
            mode: entity.map(Entity::mode),
            position: entity.map(Entity::position),
            facing: entity.map(Entity::facing),
            speaking: self.speech.is_in_progress(),
            session: self.speech.session().map(|s| s.id),
            consecutive_clicks: self.speech.tracker().consecutive_clicks(),
            music: self.music.now_playing().map(str::to_owned),
            music_pending: self.music.pending_load().is_some(),
            voice_preset: self.voice_preset,
            idle_secs: self.activity.idle_for(now).as_secs_f64(),
            pending_timers: self.timers.len(),
        }
    }

    /// Remove the companion. Deferred actions still queued for it become no-ops.
    pub fn despawn(&mut self) -> Option<EntityId> {
        let id = self.companion.take()?;
        self.registry.despawn(id);
        tracing::info!(entity = %id, "companion despawned");
        Some(id)
    }

    /// Release every resource and end any session.
    pub fn shutdown(&mut self) {
        if let Some(ended) = self.speech.abort(EndReason::Shutdown) {
            self.conclude_speech(&ended);
            self.events.emit(CompanionEvent::SpeechFinished {
                session: ended.session,
                reason: ended.reason,
            });
        }
        if let Some(reason) = self.music.shutdown(self.avatar.as_mut()) {
            self.events.emit(CompanionEvent::MusicStopped { reason });
        }
        self.timers.clear();
        self.effects.clear();
        self.despawn();
    }

    fn fire(&mut self, now: Instant, action: DeferredAction) {
        match action {
            DeferredAction::Blink(entity) => {
                if self.registry.contains(entity) {
                    self.avatar.apply(AvatarCommand::Blink);
                }
            }
            DeferredAction::BlinkLoop(entity) => {
                if !self.registry.contains(entity) {
                    return;
                }
                self.avatar.apply(AvatarCommand::Blink);
                let interval = self.behavior.blink_interval();
                if !interval.is_zero() {
                    self.timers
                        .schedule(now + interval, DeferredAction::BlinkLoop(entity));
                }
            }
            DeferredAction::AnnouncePosition(entity) => self.announce_position(entity),
            DeferredAction::Say { entity, text } => {
                if self.registry.contains(entity) {
                    self.request_speech(now, SpeechRequest::say(text));
                }
            }
            DeferredAction::SpeechDisplayEnded(session) => {
                if self.speech_display.is_some_and(|(s, _)| s == session) {
                    self.speech_display = None;
                }
                self.finish_speech(session, EndReason::Completed);
            }
            DeferredAction::SpeechSafety(session) => {
                if self.finish_speech(session, EndReason::SafetyTimeout) {
                    tracing::warn!(%session, "speech completion lost, safety timer cleared it");
                }
            }
            DeferredAction::StopBoredBehavior { entity, behavior } => {
                self.stop_bored_behavior(now, entity, behavior);
            }
        }
    }

    fn check_boredom(&mut self, now: Instant) {
        let Some(id) = self.companion else {
            return;
        };
        let Some(mode) = self.mode() else {
            return;
        };
        if let Some(behavior) = self
            .boredom
            .check(now, mode, &mut self.activity, &mut self.rng)
        {
            self.start_bored_behavior(now, id, behavior);
        }
    }

    fn start_bored_behavior(&mut self, now: Instant, id: EntityId, behavior: BoredBehavior) {
        if let Some(mode) = behavior.mode() {
            self.set_entity_mode(id, mode);
        }
        match behavior.routine() {
            Some(routine) => self.avatar.apply(AvatarCommand::StartRoutine { routine }),
            None => self.avatar.apply(AvatarCommand::Blink),
        }
        self.events
            .emit(CompanionEvent::BoredBehaviorStarted { behavior });

        if let Some(run_time) = behavior.run_time(&self.behavior) {
            self.timers.schedule(
                now + run_time,
                DeferredAction::StopBoredBehavior {
                    entity: id,
                    behavior,
                },
            );
        }
    }

    fn stop_bored_behavior(&mut self, now: Instant, id: EntityId, behavior: BoredBehavior) {
        let Some(mode) = self.registry.get(id).map(Entity::mode) else {
            return;
        };
        if let Some(routine) = behavior.routine() {
            self.avatar.apply(AvatarCommand::StopRoutine { routine });
        }
        if behavior.mode() == Some(mode) {
            self.set_entity_mode(id, EntityMode::Idle);
        }
        self.activity.record(now);
        self.events
            .emit(CompanionEvent::BoredBehaviorEnded { behavior });
    }

    fn set_entity_mode(&mut self, id: EntityId, mode: EntityMode) -> bool {
        let Some(entity) = self.registry.get_mut(id) else {
            return false;
        };
        match entity.set_mode(mode, self.avatar.as_mut()) {
            Some(transition) => {
                self.events.emit(CompanionEvent::ModeChanged {
                    entity: id,
                    from: transition.from,
                    to: transition.to,
                });
                true
            }
            None => false,
        }
    }

    fn announce_position(&mut self, id: EntityId) {
        if let Some(entity) = self.registry.get(id) {
            self.events.emit(CompanionEvent::Moved {
                entity: id,
                position: entity.position(),
                facing: entity.facing(),
            });
        }
    }

    fn conclude_speech(&mut self, ended: &SpeechEnded) {
        if let Some(timer) = ended.safety_timer {
            self.timers.cancel(timer);
        }
        if let Some((session, timer)) = self.speech_display
            && session == ended.session
        {
            self.timers.cancel(timer);
            self.speech_display = None;
        }
        if ended.reason != EndReason::Completed
            && let Some((session, mut stream)) = self.voice_stream.take()
        {
            if session == ended.session {
                stream.stop();
            } else {
                self.voice_stream = Some((session, stream));
            }
        }
    }

    fn poll_streams(&mut self) {
        if let Some(reason) = self.music.poll(self.avatar.as_mut()) {
            self.events.emit(CompanionEvent::MusicStopped { reason });
        }
        if self
            .voice_stream
            .as_ref()
            .is_some_and(|(_, stream)| stream.is_finished())
        {
            self.voice_stream = None;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::audio::open_and_play;
    use crate::dialogue::StaticDialogue;
    use crate::error::CompanionError;
    use crate::music::StopReason;
    use crate::test_utils::{FakeBackend, SharedAvatar};
    use bytes::Bytes;
    use rand::SeedableRng;
    use tokio::sync::broadcast;

    const CENTER: Point = Point::new(200.0, 150.0);

    struct Harness {
        scene: CompanionScene,
        avatar: SharedAvatar,
        backend: FakeBackend,
        events: broadcast::Receiver<CompanionEvent>,
        t0: Instant,
    }

    impl Harness {
        fn new(config: CompanionConfig) -> Self {
            let avatar = SharedAvatar::new();
            let backend = FakeBackend::new();
            let bus = EventBus::new(1024);
            let events = bus.subscribe();
            let t0 = Instant::now();
            let mut scene = CompanionScene::new(
                &config,
                ScenePorts {
                    avatar: Box::new(avatar.clone()),
                    dialogue: Box::new(StaticDialogue::seeded(3)),
                },
                bus,
                StdRng::seed_from_u64(3),
                t0,
            );
            scene.on_load(t0, CENTER);
            Self {
                scene,
                avatar,
                backend,
                events,
                t0,
            }
        }

        fn quiet() -> Self {
            let mut config = CompanionConfig::default();
            config.behavior.startup_greeting = String::new();
            Self::new(config)
        }

        fn at(&self, secs: f64) -> Instant {
            self.t0 + Duration::from_secs_f64(secs)
        }

        fn drain(&mut self) -> Vec<CompanionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// A started stream, as a finished load task would hand back.
        fn started(&self, label: &str) -> Box<dyn AudioStream> {
            open_and_play(
                &self.backend,
                Bytes::from(label.to_owned()),
                None,
                PlaybackSettings::default(),
            )
            .unwrap()
        }

        /// Advance in `step`-second ticks from `from` to `to`.
        fn run(&mut self, from: f64, to: f64, step: f64) {
            let mut t = from;
            while t <= to + 1e-9 {
                self.scene.tick(self.at(t));
                t += step;
            }
        }
    }

    fn stopped_events(events: &[CompanionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CompanionEvent::SpeechStopped { .. }))
            .count()
    }

    #[test]
    fn load_smiles_blinks_and_greets() {
        let mut h = Harness::new(CompanionConfig::default());
        assert_eq!(h.avatar.commands(), vec![AvatarCommand::Smile]);

        h.scene.tick(h.at(2.0));
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::Blink), 1);
        assert!(
            h.drain()
                .iter()
                .any(|e| matches!(e, CompanionEvent::Moved { position, .. } if *position == CENTER))
        );

        h.scene.tick(h.at(2.5));
        assert!(h.scene.is_speaking());
        let status = h.scene.status(h.at(2.5));
        assert_eq!(status.mode, Some(EntityMode::Idle));
        assert!(
            h.avatar
                .count(|c| matches!(c, AvatarCommand::ShowSpeech { text, .. } if text == "Hello! I'm Fluffel!"))
                == 1
        );

        // Periodic blink at 5s and 10s.
        h.scene.tick(h.at(10.0));
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::Blink), 3);
    }

    #[test]
    fn hello_ends_naturally_and_leaves_no_safety_timer() {
        let mut h = Harness::quiet();
        let outcome = h.scene.speak(h.at(0.0), Some("Hello!".into()));
        let SpeechOutcome::Started { session, .. } = outcome else {
            panic!("expected start, got {outcome:?}");
        };
        assert!(h.scene.safety_timer_pending());

        h.scene.tick(h.at(1.99));
        assert!(h.scene.is_speaking());
        h.scene.tick(h.at(2.0));
        assert!(!h.scene.is_speaking());
        assert!(!h.scene.safety_timer_pending());

        let events = h.drain();
        assert!(events.contains(&CompanionEvent::SpeechFinished {
            session,
            reason: EndReason::Completed
        }));
        assert_eq!(stopped_events(&events), 0);
    }

    #[test]
    fn safety_timer_recovers_lost_completion_by_three_seconds() {
        let mut h = Harness::quiet();
        let SpeechOutcome::Started { session, .. } = h.scene.speak(h.at(0.0), Some("Hello!".into()))
        else {
            panic!("expected start");
        };
        // Simulate a lost display completion by canceling it.
        let (_, display) = h.scene.speech_display.take().unwrap();
        h.scene.timers.cancel(display);

        h.scene.tick(h.at(2.5));
        assert!(h.scene.is_speaking());
        h.scene.tick(h.at(3.0));
        assert!(!h.scene.is_speaking());
        assert!(h.drain().contains(&CompanionEvent::SpeechFinished {
            session,
            reason: EndReason::SafetyTimeout
        }));
        // A late host completion is a no-op.
        assert!(!h.scene.finish_speech(session, EndReason::Completed));
    }

    #[test]
    fn five_rapid_clicks_override_exactly_once() {
        let mut h = Harness::quiet();
        for (i, t) in [0.0, 0.1, 0.2, 0.3].into_iter().enumerate() {
            let outcome = h.scene.click(h.at(t), CENTER, PointerButton::Primary);
            if i == 0 {
                assert!(matches!(
                    outcome,
                    ClickOutcome::Speech {
                        speech: SpeechOutcome::Started { .. }
                    }
                ));
            }
            assert!(h.scene.is_speaking());
        }

        let outcome = h.scene.click(h.at(0.4), CENTER, PointerButton::Primary);
        let ClickOutcome::Speech {
            speech: SpeechOutcome::Overridden { session },
        } = outcome
        else {
            panic!("expected override, got {outcome:?}");
        };
        assert!(!h.scene.is_speaking());
        assert!(!h.scene.safety_timer_pending());
        assert_eq!(h.scene.status(h.at(0.4)).consecutive_clicks, 0);
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::DismissSpeechBubble), 1);

        // Neither the display timer nor the safety timer fires afterwards.
        h.run(0.5, 6.0, 0.1);
        let events = h.drain();
        assert_eq!(stopped_events(&events), 1);
        assert!(!events.iter().any(|e| matches!(
            e,
            CompanionEvent::SpeechFinished { session: s, .. } if *s == session
        )));
    }

    #[test]
    fn clicks_outside_bounds_are_ignored() {
        let mut h = Harness::quiet();
        let far = Point::new(CENTER.x + 100.0, CENTER.y);
        assert_eq!(h.scene.click(h.at(0.0), far, PointerButton::Primary), ClickOutcome::Missed);
        assert!(!h.scene.is_speaking());
    }

    #[test]
    fn secondary_click_requests_menu() {
        let mut h = Harness::quiet();
        assert_eq!(
            h.scene.click(h.at(0.0), CENTER, PointerButton::Secondary),
            ClickOutcome::MenuRequested
        );
        assert!(h.drain().contains(&CompanionEvent::MenuRequested {
            x: CENTER.x,
            y: CENTER.y
        }));
        assert!(!h.scene.is_speaking());
    }

    #[test]
    fn boredom_starts_one_behavior_and_stops_it() {
        let mut h = Harness::quiet();
        h.drain();
        h.run(0.0, 10.0, 0.5);
        assert!(
            !h.drain()
                .iter()
                .any(|e| matches!(e, CompanionEvent::BoredBehaviorStarted { .. }))
        );

        h.scene.tick(h.at(10.05));
        let started: Vec<BoredBehavior> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                CompanionEvent::BoredBehaviorStarted { behavior } => Some(behavior),
                _ => None,
            })
            .collect();
        assert_eq!(started.len(), 1);
        assert_eq!(h.scene.last_activity(), h.at(10.05));

        let behavior = started[0];
        if let Some(run) = behavior.run_time(&BehaviorConfig::default()) {
            let stop_at = h.at(10.05) + run;
            h.scene.tick(stop_at);
            assert!(h.drain().contains(&CompanionEvent::BoredBehaviorEnded { behavior }));
            assert_eq!(h.scene.mode(), Some(EntityMode::Idle));
            assert_eq!(h.scene.last_activity(), stop_at);
        }
    }

    #[test]
    fn falling_suppresses_boredom_without_touching_clock() {
        let mut h = Harness::quiet();
        assert!(h.scene.start_falling(h.at(1.0)));
        assert!(!h.scene.start_falling(h.at(1.5)));
        h.drain();

        h.run(2.0, 60.0, 1.0);
        assert_eq!(h.scene.last_activity(), h.at(1.0));
        assert!(
            !h.drain()
                .iter()
                .any(|e| matches!(e, CompanionEvent::BoredBehaviorStarted { .. }))
        );
    }

    #[test]
    fn move_promotes_idle_and_throttles() {
        let mut h = Harness::quiet();
        assert!(h.scene.move_entity(h.at(1.0), MovementDirection::Left));
        assert_eq!(h.scene.mode(), Some(EntityMode::Moving));
        assert!(!h.scene.move_entity(h.at(1.005), MovementDirection::Left));
        assert!(h.scene.move_entity(h.at(1.02), MovementDirection::Left));

        let entity = h.scene.entity().unwrap();
        assert_eq!(entity.position(), Point::new(CENTER.x - 16.0, CENTER.y));
        assert_eq!(entity.facing(), Facing::Left);
        assert_eq!(h.scene.last_activity(), h.at(1.02));
        assert_eq!(
            h.avatar
                .count(|c| *c == AvatarCommand::Face { facing: Facing::Left }),
            1
        );
    }

    #[test]
    fn mode_change_dismisses_bubble_but_keeps_session() {
        let mut h = Harness::quiet();
        h.scene.speak(h.at(0.0), Some("Hello!".into()));
        h.avatar.clear();

        assert!(h.scene.start_falling(h.at(0.5)));
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::DismissSpeechBubble), 1);
        assert!(h.scene.is_speaking());
        assert!(!h.scene.set_mode(EntityMode::Falling));
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::DismissSpeechBubble), 1);
    }

    #[test]
    fn reset_returns_to_center_and_says_line() {
        let mut h = Harness::quiet();
        h.scene.move_entity(h.at(0.0), MovementDirection::Left);
        h.scene.start_falling(h.at(0.1));

        assert!(h.scene.reset_to_center(h.at(1.0), CENTER));
        let entity = h.scene.entity().unwrap();
        assert_eq!(entity.mode(), EntityMode::Idle);
        assert_eq!(entity.position(), CENTER);
        assert_eq!(entity.facing(), Facing::Right);
        assert_eq!(
            h.avatar.count(|c| matches!(c, AvatarCommand::CancelMotion { .. })),
            1
        );

        h.scene.tick(h.at(1.59));
        assert!(!h.scene.is_speaking());
        h.scene.tick(h.at(1.0) + RETURN_LINE_DELAY);
        assert!(h.scene.is_speaking());
        assert_eq!(
            h.avatar
                .count(|c| matches!(c, AvatarCommand::ShowSpeech { text, .. } if text == "I'm back!")),
            1
        );
    }

    #[test]
    fn deferred_actions_for_despawned_entity_are_no_ops() {
        let mut h = Harness::new(CompanionConfig::default());
        h.scene.despawn();
        h.avatar.clear();
        h.run(0.0, 20.0, 0.5);
        assert!(h.avatar.commands().is_empty());
        assert!(!h.scene.is_speaking());
    }

    #[test]
    fn music_lifecycle_emits_expected_events() {
        let mut h = Harness::quiet();
        h.drain();
        assert!(!h.scene.stop_music());
        assert!(h.drain().is_empty());

        let outcome = h
            .scene
            .play_music(AudioResource::parse("https://music.example/a.mp3").unwrap());
        let MusicOutcome::Loading { ticket } = outcome else {
            panic!("expected load, got {outcome:?}");
        };
        assert_eq!(
            h.scene.take_effects(),
            vec![Effect::LoadMusic {
                ticket,
                resource: AudioResource::parse("https://music.example/a.mp3").unwrap(),
                settings: PlaybackSettings::default(),
            }]
        );
        assert!(h.scene.status(h.at(0.0)).music_pending);
        assert_eq!(h.backend.opened(), 0);

        let stream = h.started("A");
        h.scene.music_loaded(ticket, Ok(stream)).unwrap();
        assert!(h.drain().contains(&CompanionEvent::MusicStarting {
            resource: "https://music.example/a.mp3".into()
        }));
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::StartListening), 1);

        h.backend.finish_all();
        h.scene.tick(h.at(0.1));
        assert!(h.drain().contains(&CompanionEvent::MusicStopped {
            reason: StopReason::Finished
        }));
        assert_eq!(h.backend.live_streams(), 0);
        assert_eq!(h.avatar.count(|c| *c == AvatarCommand::StopListening), 1);
    }

    #[test]
    fn failed_fetch_is_reported_not_fatal() {
        let mut h = Harness::quiet();
        let MusicOutcome::Loading { ticket } = h
            .scene
            .play_music(AudioResource::parse("https://music.example/a.mp3").unwrap())
        else {
            panic!("expected load");
        };
        let outcome = h
            .scene
            .music_loaded(ticket, Err(CompanionError::Fetch("offline".into())))
            .unwrap();
        assert!(matches!(outcome, MusicOutcome::Failed { .. }));
        assert!(h.scene.music_playing().is_none());
        assert!(!h.scene.status(h.at(0.0)).music_pending);
    }

    #[test]
    fn superseded_load_is_stopped_on_arrival() {
        let mut h = Harness::quiet();
        let MusicOutcome::Loading { ticket: first } = h
            .scene
            .play_music(AudioResource::parse("/music/a.mp3").unwrap())
        else {
            panic!("expected load");
        };
        let MusicOutcome::Loading { ticket: second } = h
            .scene
            .play_music(AudioResource::parse("/music/b.mp3").unwrap())
        else {
            panic!("expected load");
        };
        h.drain();

        let late = h.started("A");
        assert!(h.scene.music_loaded(first, Ok(late)).is_none());
        let a = h.backend.stream("A").unwrap();
        assert!(a.was_stopped());
        assert!(a.is_released());
        assert!(h.drain().is_empty());

        let current = h.started("B");
        assert_eq!(
            h.scene.music_loaded(second, Ok(current)),
            Some(MusicOutcome::Started {
                resource: "/music/b.mp3".into()
            })
        );
        assert_eq!(h.backend.live_labels(), vec!["B".to_owned()]);
    }

    #[test]
    fn voice_is_requested_and_played_on_its_own_stream() {
        let mut config = CompanionConfig::default();
        config.behavior.startup_greeting = String::new();
        config.voice.enabled = true;
        let mut h = Harness::new(config);

        let SpeechOutcome::Started { session, .. } = h.scene.speak(h.at(0.0), Some("Hi".into()))
        else {
            panic!("expected start");
        };
        let effects = h.scene.take_effects();
        assert!(matches!(
            effects.as_slice(),
            [Effect::RenderVoice { session: s, preset: VoicePreset::Cute, .. }] if *s == session
        ));

        let voice = h.started("voice");
        h.scene.voice_ready(session, Ok(Some(voice)));
        assert_eq!(h.backend.live_labels(), vec!["voice".to_owned()]);
        assert!(h.scene.music_playing().is_none());

        // Late voice for an ended session is stopped and dropped.
        h.scene.finish_speech(session, EndReason::Completed);
        let late = h.started("late");
        h.scene.voice_ready(session, Ok(Some(late)));
        let late = h.backend.stream("late").unwrap();
        assert!(late.was_stopped());
        assert!(late.is_released());

        h.scene.voice_ready(session, Ok(None));
        assert_eq!(h.backend.live_labels(), vec!["voice".to_owned()]);
    }

    #[test]
    fn voice_failure_leaves_recovery_to_timers() {
        let mut config = CompanionConfig::default();
        config.behavior.startup_greeting = String::new();
        config.voice.enabled = true;
        let mut h = Harness::new(config);

        let SpeechOutcome::Started { session, .. } = h.scene.speak(h.at(0.0), Some("Hi".into()))
        else {
            panic!("expected start");
        };
        h.scene
            .voice_ready(session, Err(CompanionError::Voice("down".into())));
        assert!(h.scene.is_speaking());
        h.scene.tick(h.at(3.0));
        assert!(!h.scene.is_speaking());
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut h = Harness::quiet();
        h.scene.speak(h.at(0.0), Some("Hello!".into()));
        h.scene
            .play_music(AudioResource::parse("https://music.example/a.mp3").unwrap());
        let effects = h.scene.take_effects();
        let Some(Effect::LoadMusic { ticket, .. }) = effects.first() else {
            panic!("expected load");
        };
        let stream = h.started("A");
        h.scene.music_loaded(*ticket, Ok(stream));

        h.scene.shutdown();
        assert!(!h.scene.is_speaking());
        assert_eq!(h.backend.live_streams(), 0);
        assert_eq!(h.scene.status(h.at(1.0)).pending_timers, 0);
        assert!(h.scene.companion().is_none());
    }

    #[test]
    fn scripted_lines_follow_the_requested_kind() {
        let mut h = Harness::quiet();
        let mut dialogue = StaticDialogue::seeded(3);
        let expected = dialogue.line(LineKind::Fact);

        let outcome = h.scene.speak_line(h.at(0.0), LineKind::Fact);
        assert_eq!(
            outcome,
            SpeechOutcome::Started {
                session: SessionId(1),
                text: expected,
            }
        );
        assert_eq!(h.scene.speak_line(h.at(0.5), LineKind::Joke), SpeechOutcome::Rejected);
    }

    #[test]
    fn preset_change_applies_to_the_next_render() {
        let mut config = CompanionConfig::default();
        config.behavior.startup_greeting = String::new();
        config.voice.enabled = true;
        let mut h = Harness::new(config);

        let SpeechOutcome::Started { session, .. } = h.scene.speak(h.at(0.0), Some("Hi".into()))
        else {
            panic!("expected start");
        };
        assert_eq!(h.scene.set_voice_preset(VoicePreset::Robot), VoicePreset::Cute);
        assert_eq!(h.scene.status(h.at(0.0)).voice_preset, VoicePreset::Robot);
        assert!(matches!(
            h.scene.take_effects().as_slice(),
            [Effect::RenderVoice { preset: VoicePreset::Cute, .. }]
        ));

        h.scene.finish_speech(session, EndReason::Completed);
        h.scene.speak(h.at(3.0), Some("Beep".into()));
        assert!(matches!(
            h.scene.take_effects().as_slice(),
            [Effect::RenderVoice { preset: VoicePreset::Robot, text, .. }] if text == "Beep"
        ));
    }
}
