//! Speech arbitration: one line at a time, rapid-click override, and a
//! safety timer that guarantees the speaking flag is eventually cleared.
//!
//! The arbiter owns the [`SpeechSession`] and the [`ClickBurstTracker`] but
//! not the clock. Timers live in the scene's queue; the arbiter only
//! remembers the [`TimerId`] of the pending safety timer and hands it back
//! whenever a session ends so the caller can cancel it.
//!
//! Three paths can end a session: natural completion, safety timeout and
//! the click override. All three go through [`SpeechArbiter::finish`] or
//! the override branch of [`SpeechArbiter::request`], keyed by
//! [`SessionId`], so whichever arrives first wins and the rest are no-ops.

use crate::config::SpeechConfig;
use crate::dialogue::{DialogueProvider, LineKind};
use crate::timer::TimerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Identifies one speech session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "speech-{}", self.0)
    }
}

/// Where a speak request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechOrigin {
    /// Primary click on the companion. Counts toward click bursts.
    Click,
    /// Timer, menu or host request. Rejected outright while busy.
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: Option<String>,
    /// Category the provider picks from when `text` is absent.
    pub kind: Option<LineKind>,
    pub origin: SpeechOrigin,
}

impl SpeechRequest {
    /// Click request; the line kind is picked at random.
    pub fn click() -> Self {
        Self {
            text: None,
            kind: None,
            origin: SpeechOrigin::Click,
        }
    }

    pub fn say(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            kind: None,
            origin: SpeechOrigin::Scripted,
        }
    }

    /// Scripted request for a provider line of `kind`.
    pub fn line(kind: LineKind) -> Self {
        Self {
            text: None,
            kind: Some(kind),
            origin: SpeechOrigin::Scripted,
        }
    }

    /// Scripted request with a provider-chosen greeting.
    pub fn greeting() -> Self {
        Self::line(LineKind::Greeting)
    }
}

/// The line currently being shown/voiced.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSession {
    pub id: SessionId,
    pub text: String,
    pub duration: Duration,
    pub started_at: Instant,
    /// When the safety timer force-clears this session.
    pub debounce_deadline: Instant,
}

/// Consecutive-click counter used to break out of a stuck session.
#[derive(Debug, Clone, Default)]
pub struct ClickBurstTracker {
    consecutive_clicks: u32,
    last_click: Option<Instant>,
}

impl ClickBurstTracker {
    pub fn consecutive_clicks(&self) -> u32 {
        self.consecutive_clicks
    }

    pub fn last_click(&self) -> Option<Instant> {
        self.last_click
    }

    /// Non-burst path: a new session starts.
    fn restart(&mut self, click_at: Option<Instant>) {
        self.consecutive_clicks = 1;
        if click_at.is_some() {
            self.last_click = click_at;
        }
    }

    /// Count a click that arrived while a session is active.
    fn register(&mut self, now: Instant, window: Duration) -> u32 {
        let within_window = self
            .last_click
            .is_some_and(|last| now.saturating_duration_since(last) < window);
        if within_window {
            self.consecutive_clicks += 1;
        } else {
            self.consecutive_clicks = 1;
        }
        self.last_click = Some(now);
        self.consecutive_clicks
    }

    fn clear(&mut self) {
        self.consecutive_clicks = 0;
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Display/voice completion arrived.
    Completed,
    /// The safety timer fired before completion.
    SafetyTimeout,
    /// A rapid click burst forced the session off.
    ClickOverride,
    /// The controller is shutting down.
    Shutdown,
}

/// Outcome of ending a session. Only produced once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEnded {
    pub session: SessionId,
    pub reason: EndReason,
    /// Safety timer still registered for the session; the caller cancels it.
    pub safety_timer: Option<TimerId>,
}

/// Everything the caller needs to present an accepted line.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSpeech {
    pub session: SessionId,
    pub text: String,
    pub duration: Duration,
    /// Delay after which the safety timer should fire.
    pub safety_after: Duration,
    /// Leftover safety timer from an earlier session, to be canceled.
    pub stale_safety_timer: Option<TimerId>,
}

/// Result of [`SpeechArbiter::request`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechDecision {
    Started(StartedSpeech),
    /// Busy; the click was counted toward a burst.
    Counted { consecutive_clicks: u32 },
    /// Busy; scripted request dropped.
    Rejected,
    /// Busy; the click completed a burst and ended the session.
    Overridden(SpeechEnded),
}

/// Owner of the speech session and click-burst state.
#[derive(Debug)]
pub struct SpeechArbiter {
    config: SpeechConfig,
    session: Option<SpeechSession>,
    safety_timer: Option<TimerId>,
    tracker: ClickBurstTracker,
    next_session: u64,
}

impl SpeechArbiter {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            config,
            session: None,
            safety_timer: None,
            tracker: ClickBurstTracker::default(),
            next_session: 0,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&SpeechSession> {
        self.session.as_ref()
    }

    pub fn tracker(&self) -> &ClickBurstTracker {
        &self.tracker
    }

    /// Safety timer currently registered, if any.
    pub fn safety_timer(&self) -> Option<TimerId> {
        self.safety_timer
    }

    /// Arbitrate a speak request.
    pub fn request(
        &mut self,
        now: Instant,
        request: SpeechRequest,
        dialogue: &mut dyn DialogueProvider,
        rng: &mut impl Rng,
    ) -> SpeechDecision {
        if let Some(active) = &self.session {
            return match request.origin {
                SpeechOrigin::Scripted => {
                    tracing::debug!(session = %active.id, "speech busy, scripted request dropped");
                    SpeechDecision::Rejected
                }
                SpeechOrigin::Click => self.count_busy_click(now),
            };
        }

        let click_at = (request.origin == SpeechOrigin::Click).then_some(now);
        self.tracker.restart(click_at);

        let text = match (request.text, request.kind) {
            (Some(text), _) => text,
            (None, Some(kind)) => dialogue.line(kind),
            (None, None) if request.origin == SpeechOrigin::Click => {
                let kind = LineKind::ALL[rng.gen_range(0..LineKind::ALL.len())];
                dialogue.line(kind)
            }
            (None, None) => dialogue.random_greeting(),
        };

        match self.begin(now, text) {
            Some(started) => SpeechDecision::Started(started),
            None => SpeechDecision::Rejected,
        }
    }

    /// Record the safety timer the caller scheduled for `session`.
    ///
    /// Returns the timer back if `session` is no longer the active one, so
    /// the caller can cancel it immediately.
    pub fn arm_safety_timer(&mut self, session: SessionId, timer: TimerId) -> Option<TimerId> {
        if self.active_id() != Some(session) {
            return Some(timer);
        }
        self.safety_timer.replace(timer)
    }

    /// End `session` for `reason` if it is still the active one.
    pub fn finish(&mut self, session: SessionId, reason: EndReason) -> Option<SpeechEnded> {
        if self.active_id() != Some(session) {
            tracing::debug!(%session, ?reason, "speech end ignored, session already over");
            return None;
        }
        self.end(reason)
    }

    /// End whatever session is active.
    pub fn abort(&mut self, reason: EndReason) -> Option<SpeechEnded> {
        self.end(reason)
    }

    fn active_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn count_busy_click(&mut self, now: Instant) -> SpeechDecision {
        let clicks = self
            .tracker
            .register(now, self.config.click_burst_window());
        tracing::debug!(clicks, "click while speaking");

        if clicks < self.config.click_burst_threshold {
            return SpeechDecision::Counted {
                consecutive_clicks: clicks,
            };
        }

        tracing::info!(clicks, "rapid clicks, forcing speech reset");
        self.tracker.clear();
        match self.end(EndReason::ClickOverride) {
            Some(ended) => SpeechDecision::Overridden(ended),
            None => SpeechDecision::Rejected,
        }
    }

    fn begin(&mut self, now: Instant, text: String) -> Option<StartedSpeech> {
        debug_assert!(
            self.session.is_none(),
            "speech session started while another is active"
        );
        if self.session.is_some() {
            return None;
        }

        self.next_session += 1;
        let id = SessionId(self.next_session);
        let duration = self.config.duration_for(&text);
        let safety_after = duration + self.config.safety_margin();

        self.session = Some(SpeechSession {
            id,
            text: text.clone(),
            duration,
            started_at: now,
            debounce_deadline: now + safety_after,
        });

        tracing::info!(session = %id, duration_secs = duration.as_secs_f64(), "speech started");
        Some(StartedSpeech {
            session: id,
            text,
            duration,
            safety_after,
            stale_safety_timer: self.safety_timer.take(),
        })
    }

    fn end(&mut self, reason: EndReason) -> Option<SpeechEnded> {
        let session = self.session.take()?;
        tracing::info!(session = %session.id, ?reason, "speech ended");
        Some(SpeechEnded {
            session: session.id,
            reason,
            safety_timer: self.safety_timer.take(),
        })
    }
}
