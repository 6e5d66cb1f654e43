//! Hand presence tracking.
//!
//! A visible hand marks the session hand-verified; the flag drops back after
//! `stale_after` without a hand. The flag is status only and never ends a session.

use crate::clock::{elapsed, elapsed_at_least};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for hand presence tracking
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Time without a visible hand before the flag drops (default: 5s)
    pub stale_after: Duration,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandState {
    Unverified,
    Verified,
}

/// Hand presence state machine for one session.
#[derive(Debug, Clone)]
pub struct GestureTracker {
    config: GestureConfig,
    state: HandState,
    last_seen_at: Instant,
}

impl GestureTracker {
    /// Start unverified, with the staleness clock running from `now`.
    pub fn new(config: GestureConfig, now: Instant) -> Self {
        Self {
            config,
            state: HandState::Unverified,
            last_seen_at: now,
        }
    }

    /// Feed one frame's hand-presence flag. Returns true if this frame verified the hand.
    pub fn observe(&mut self, present: bool, now: Instant) -> bool {
        if !present {
            return false;
        }
        let newly_verified = self.state == HandState::Unverified;
        if newly_verified {
            debug!("hand verified");
        }
        self.state = HandState::Verified;
        self.last_seen_at = now;
        newly_verified
    }

    /// Staleness check. Returns true only on the Verified -> Unverified transition.
    pub fn check_staleness(&mut self, now: Instant) -> bool {
        if !elapsed_at_least(self.last_seen_at, now, self.config.stale_after) {
            return false;
        }
        match self.state {
            HandState::Verified => {
                self.state = HandState::Unverified;
                true
            }
            HandState::Unverified => false,
        }
    }

    pub fn state(&self) -> HandState {
        self.state
    }

    pub fn is_verified(&self) -> bool {
        self.state == HandState::Verified
    }

    pub fn last_seen_at(&self) -> Instant {
        self.last_seen_at
    }

    pub fn since_last_seen(&self, now: Instant) -> Duration {
        elapsed(self.last_seen_at, now)
    }
}
