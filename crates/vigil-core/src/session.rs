//! The shared session record mutated by the security monitor and the frame loop.
//!
//! All access goes through [`SessionHandle`], which holds the single lock around
//! the state. Every method is one short critical section; slow work (frame
//! capture, embedding) happens between [`SessionHandle::begin_reverify`] and
//! [`SessionHandle::complete_reverify`] with the lock released.

use crate::clock::{elapsed, elapsed_at_least};
use crate::error::{VigilError, VigilResult};
use crate::events::{LogoutReason, StatusReport};
use crate::gesture::{GestureConfig, GestureTracker};
use crate::liveness::{BlinkConfig, BlinkEvent, BlinkTracker, LivenessVerdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Enrolled user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for UserId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Distinguishes successive logins, including repeated logins of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Timing configuration for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub blink: BlinkConfig,
    pub gesture: GestureConfig,

    /// Minimum time between identity re-verifications (default: 5s)
    pub reverify_interval: Duration,

    /// Length of a failing re-verification streak that ends the session (default: 10s)
    pub logout_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            blink: BlinkConfig::default(),
            gesture: GestureConfig::default(),
            reverify_interval: Duration::from_secs(5),
            logout_after: Duration::from_secs(10),
        }
    }
}

/// Re-verification streak state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverifyState {
    Passing,
    /// Failing since the first failed attempt of the current streak.
    Failing { since: Instant },
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    user: UserId,
    started_at: Instant,
    last_reverify_check: Instant,
    reverify: ReverifyState,
    blink: BlinkTracker,
    hand: GestureTracker,
}

impl ActiveSession {
    fn status(&self, now: Instant) -> StatusReport {
        StatusReport {
            identity: self.user.clone(),
            seconds_since_blink: self.blink.since_last_blink(now).as_secs(),
            hand_verified: self.hand.is_verified(),
            blink_prompt_active: self.blink.prompt_active(),
            reverify_failing: matches!(self.reverify, ReverifyState::Failing { .. }),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    active: Option<ActiveSession>,
}

impl SessionState {
    fn end(&mut self, reason: LogoutReason) -> Option<LogoutNotice> {
        let session = self.active.take()?;
        warn!(
            identity = %session.user,
            session = %session.id,
            %reason,
            "session ended"
        );
        Some(LogoutNotice {
            identity: session.user,
            session_id: session.id,
            reason,
        })
    }
}

/// A session that was just ended. Produced exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutNotice {
    pub identity: UserId,
    pub session_id: SessionId,
    pub reason: LogoutReason,
}

/// What one frame contributed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameObservation {
    /// Average EAR, when a face was found.
    pub avg_ear: Option<f32>,
    pub hand_present: bool,
}

/// Result of applying a frame to the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    pub blink: Option<BlinkEvent>,
    pub hand_verified_now: bool,
    pub status: StatusReport,
}

/// Permission to run one re-verification, bound to the session it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverifyTicket {
    session_id: SessionId,
    pub identity: UserId,
    /// Tick time the check was scheduled at; streak timing is measured from it.
    pub at: Instant,
}

/// Outcome of applying a re-verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverifyOutcome {
    Passed { cleared_streak: bool },
    StreakStarted,
    StreakRunning { elapsed: Duration },
    Expired(LogoutNotice),
    /// The session the ticket belonged to is gone.
    Discarded,
}

/// Result of the per-tick liveness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessCheck {
    pub identity: UserId,
    pub blink: LivenessVerdict,
    /// True on the tick the hand flag dropped.
    pub hand_lost: bool,
    pub logout: Option<LogoutNotice>,
}

/// Read-only copy of the session fields, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub identity: UserId,
    pub session_id: SessionId,
    pub started_at: Instant,
    pub last_reverify_check: Instant,
    pub logout_grace_start: Option<Instant>,
    pub last_blink_at: Instant,
    pub blink_prompt_active: bool,
    pub blink_prompt_start: Option<Instant>,
    pub blink_frame_counter: u32,
    pub hand_verified: bool,
    pub last_hand_seen_at: Instant,
}

/// Shared, lock-guarded session state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    config: Arc<SessionConfig>,
    inner: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    // A panic mid-update cannot leave a half-written session: every mutation is
    // a single assignment, so the poisoned state is still usable.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session for `identity`; all timers start at `now`.
    pub fn begin(&self, identity: UserId, now: Instant) -> VigilResult<SessionId> {
        let mut state = self.lock();
        if let Some(active) = &state.active {
            return Err(VigilError::SessionActive(active.user.clone()));
        }
        let id = SessionId::new();
        info!(%identity, session = %id, "session started");
        state.active = Some(ActiveSession {
            id,
            user: identity,
            started_at: now,
            last_reverify_check: now,
            reverify: ReverifyState::Passing,
            blink: BlinkTracker::new(self.config.blink.clone(), now),
            hand: GestureTracker::new(self.config.gesture.clone(), now),
        });
        Ok(id)
    }

    /// End the active session. Idempotent: only the first call returns a notice.
    pub fn logout(&self, reason: LogoutReason) -> Option<LogoutNotice> {
        self.lock().end(reason)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.lock().active.as_ref().map(|s| s.user.clone())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().active.as_ref().map(|s| s.id)
    }

    /// Feed one frame's observations to the blink and hand trackers.
    pub fn apply_frame(&self, obs: FrameObservation, now: Instant) -> Option<FrameUpdate> {
        let mut state = self.lock();
        let session = state.active.as_mut()?;

        let blink = obs.avg_ear.and_then(|ear| session.blink.observe(ear, now));
        let hand_verified_now = session.hand.observe(obs.hand_present, now);

        Some(FrameUpdate {
            blink,
            hand_verified_now,
            status: session.status(now),
        })
    }

    /// Claim a re-verification slot if the check interval has elapsed.
    pub fn begin_reverify(&self, now: Instant) -> Option<ReverifyTicket> {
        let mut state = self.lock();
        let session = state.active.as_mut()?;
        if !elapsed_at_least(session.last_reverify_check, now, self.config.reverify_interval) {
            return None;
        }
        session.last_reverify_check = now;
        Some(ReverifyTicket {
            session_id: session.id,
            identity: session.user.clone(),
            at: now,
        })
    }

    /// Apply a re-verification result; ends the session once a failing streak
    /// has lasted `logout_after`.
    pub fn complete_reverify(&self, ticket: &ReverifyTicket, passed: bool) -> ReverifyOutcome {
        let mut state = self.lock();
        let session = match state.active.as_mut() {
            Some(s) if s.id == ticket.session_id => s,
            _ => {
                debug!(identity = %ticket.identity, "re-verification result discarded");
                return ReverifyOutcome::Discarded;
            }
        };

        match (session.reverify, passed) {
            (previous, true) => {
                session.reverify = ReverifyState::Passing;
                ReverifyOutcome::Passed {
                    cleared_streak: matches!(previous, ReverifyState::Failing { .. }),
                }
            }
            (ReverifyState::Passing, false) => {
                session.reverify = ReverifyState::Failing { since: ticket.at };
                ReverifyOutcome::StreakStarted
            }
            (ReverifyState::Failing { since }, false) => {
                let streak = elapsed(since, ticket.at);
                if streak >= self.config.logout_after {
                    match state.end(LogoutReason::UserChanged) {
                        Some(notice) => ReverifyOutcome::Expired(notice),
                        None => ReverifyOutcome::Discarded,
                    }
                } else {
                    ReverifyOutcome::StreakRunning { elapsed: streak }
                }
            }
        }
    }

    /// Blink and hand staleness checks; ends the session when the blink prompt expires.
    pub fn check_liveness(&self, now: Instant) -> Option<LivenessCheck> {
        let mut state = self.lock();
        let session = state.active.as_mut()?;
        let identity = session.user.clone();

        let blink = session.blink.check_staleness(now);
        if blink == LivenessVerdict::Expired {
            let logout = state.end(LogoutReason::NoBlinkDetected);
            return Some(LivenessCheck {
                identity,
                blink,
                hand_lost: false,
                logout,
            });
        }

        let hand_lost = session.hand.check_staleness(now);
        Some(LivenessCheck {
            identity,
            blink,
            hand_lost,
            logout: None,
        })
    }

    pub fn status(&self, now: Instant) -> Option<StatusReport> {
        self.lock().active.as_ref().map(|s| s.status(now))
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.lock();
        let s = state.active.as_ref()?;
        Some(SessionSnapshot {
            identity: s.user.clone(),
            session_id: s.id,
            started_at: s.started_at,
            last_reverify_check: s.last_reverify_check,
            logout_grace_start: match s.reverify {
                ReverifyState::Passing => None,
                ReverifyState::Failing { since } => Some(since),
            },
            last_blink_at: s.blink.last_blink_at(),
            blink_prompt_active: s.blink.prompt_active(),
            blink_prompt_start: s.blink.prompt_started_at(),
            blink_frame_counter: s.blink.frame_counter(),
            hand_verified: s.hand.is_verified(),
            last_hand_seen_at: s.hand.last_seen_at(),
        })
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
