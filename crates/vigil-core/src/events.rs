//! Outward notifications: logout, status and liveness prompts.
//!
//! The core never renders anything itself. Front-ends implement [`AuthObserver`]
//! or consume [`AuthEvent`]s from a [`ChannelObserver`].

use crate::session::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Re-verification kept failing for the whole logout window.
    UserChanged,
    /// Liveness prompt went unanswered.
    NoBlinkDetected,
    /// Operator stopped the session.
    Manual,
    /// The camera stream ended.
    SourceClosed,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::UserChanged => "user changed",
            LogoutReason::NoBlinkDetected => "no blink detected",
            LogoutReason::Manual => "manual logout",
            LogoutReason::SourceClosed => "frame source closed",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame status snapshot for the front-end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub identity: UserId,
    /// Whole seconds since the last confirmed blink.
    pub seconds_since_blink: u64,
    pub hand_verified: bool,
    pub blink_prompt_active: bool,
    /// True while a failing re-verification streak is open.
    pub reverify_failing: bool,
}

/// Events emitted by the session, the monitor and the frame loop
#[derive(Debug, Clone)]
pub enum AuthEvent {
    LoggedIn {
        identity: UserId,
        timestamp: DateTime<Utc>,
    },

    LoggedOut {
        identity: UserId,
        reason: LogoutReason,
        timestamp: DateTime<Utc>,
    },

    /// Operator must blink within `grace`
    BlinkPrompt {
        identity: UserId,
        grace: Duration,
        timestamp: DateTime<Utc>,
    },

    Status(StatusReport),
}

/// Subscriber for authentication notifications. Called outside the session lock.
pub trait AuthObserver: Send + Sync {
    fn on_logout(&self, identity: &UserId, reason: LogoutReason);

    fn on_status(&self, status: &StatusReport);

    fn on_blink_prompt(&self, _identity: &UserId, _grace: Duration) {}

    fn on_login(&self, _identity: &UserId) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn on_logout(&self, identity: &UserId, reason: LogoutReason) {
        warn!(%identity, %reason, "logged out");
    }

    fn on_status(&self, status: &StatusReport) {
        debug!(
            identity = %status.identity,
            seconds_since_blink = status.seconds_since_blink,
            hand_verified = status.hand_verified,
            "status"
        );
    }

    fn on_blink_prompt(&self, identity: &UserId, grace: Duration) {
        warn!(%identity, grace_secs = grace.as_secs_f32(), "blink required");
    }

    fn on_login(&self, identity: &UserId) {
        info!(%identity, "logged in");
    }
}

/// Forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    event_tx: mpsc::UnboundedSender<AuthEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }

    fn emit(&self, event: AuthEvent) {
        // Receiver gone means the front-end shut down; nothing left to notify.
        if self.event_tx.send(event).is_err() {
            debug!("auth event dropped: receiver closed");
        }
    }
}

impl AuthObserver for ChannelObserver {
    fn on_logout(&self, identity: &UserId, reason: LogoutReason) {
        self.emit(AuthEvent::LoggedOut {
            identity: identity.clone(),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn on_status(&self, status: &StatusReport) {
        self.emit(AuthEvent::Status(status.clone()));
    }

    fn on_blink_prompt(&self, identity: &UserId, grace: Duration) {
        self.emit(AuthEvent::BlinkPrompt {
            identity: identity.clone(),
            grace,
            timestamp: Utc::now(),
        });
    }

    fn on_login(&self, identity: &UserId) {
        self.emit(AuthEvent::LoggedIn {
            identity: identity.clone(),
            timestamp: Utc::now(),
        });
    }
}
