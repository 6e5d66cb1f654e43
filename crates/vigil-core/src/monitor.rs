//! Background security monitor.
//!
//! On every tick, while someone is logged in:
//! 1. Re-verification, at most once per check interval. The session lock is
//!    released while the frame is captured and embedded.
//! 2. Blink staleness: raise the prompt, then log out once the grace window lapses.
//! 3. Hand staleness: drop the status flag.
//!
//! With nobody logged in a tick is a no-op, so the monitor is started once and
//! never restarted.

use crate::clock::Clock;
use crate::events::AuthObserver;
use crate::liveness::LivenessVerdict;
use crate::sensors::{IdentityStore, Sensors};
use crate::session::{LivenessCheck, LogoutNotice, ReverifyOutcome, SessionHandle, UserId};
use crate::shutdown::ShutdownSignal;
use crate::verifier::IdentityVerifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Configuration for the security monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Tick period (default: 1s)
    pub tick: Duration,

    /// Minimum face confidence for a usable re-verification sample (default: 0.85)
    pub min_face_confidence: f32,

    /// Similarity needed to pass re-verification (default: 0.65)
    pub threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            min_face_confidence: 0.85,
            threshold: 0.65,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub reverify: Option<ReverifyOutcome>,
    pub liveness: Option<LivenessCheck>,
}

impl TickReport {
    /// The logout this tick caused, if any.
    pub fn logout(&self) -> Option<&LogoutNotice> {
        if let Some(ReverifyOutcome::Expired(notice)) = &self.reverify {
            return Some(notice);
        }
        self.liveness.as_ref().and_then(|c| c.logout.as_ref())
    }
}

pub struct SecurityMonitor {
    config: MonitorConfig,
    verifier: IdentityVerifier,
    clock: Arc<dyn Clock>,
    session: SessionHandle,
    sensors: Sensors,
    store: Arc<dyn IdentityStore>,
    observer: Arc<dyn AuthObserver>,
}

impl SecurityMonitor {
    pub fn new(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        session: SessionHandle,
        sensors: Sensors,
        store: Arc<dyn IdentityStore>,
        observer: Arc<dyn AuthObserver>,
    ) -> Self {
        Self {
            verifier: IdentityVerifier::new(config.threshold),
            config,
            clock,
            session,
            sensors,
            store,
            observer,
        }
    }

    /// Run the three checks once against the current time.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();

        if let Some(ticket) = self.session.begin_reverify(now) {
            let passed = self.reverify(&ticket.identity);
            let outcome = self.session.complete_reverify(&ticket, passed);
            match &outcome {
                ReverifyOutcome::Passed { cleared_streak: true } => {
                    info!(identity = %ticket.identity, "re-verification recovered")
                }
                ReverifyOutcome::StreakStarted => {
                    warn!(identity = %ticket.identity, "re-verification failed, logout timer started")
                }
                ReverifyOutcome::StreakRunning { elapsed } => warn!(
                    identity = %ticket.identity,
                    failing_secs = elapsed.as_secs_f32(),
                    "re-verification still failing"
                ),
                ReverifyOutcome::Expired(notice) => self.notify_logout(notice),
                ReverifyOutcome::Passed { .. } | ReverifyOutcome::Discarded => {}
            }
            report.reverify = Some(outcome);
        }

        // Re-verification may have blocked on the embedder; time liveness from now.
        let now = self.clock.now();
        if let Some(check) = self.session.check_liveness(now) {
            match check.blink {
                LivenessVerdict::PromptRaised => {
                    let grace = self.session.config().blink.prompt_grace;
                    warn!(identity = %check.identity, "no blink seen, prompting");
                    self.observer.on_blink_prompt(&check.identity, grace);
                }
                LivenessVerdict::AwaitingBlink { remaining } => {
                    debug!(identity = %check.identity, remaining_secs = remaining.as_secs_f32(), "awaiting blink")
                }
                LivenessVerdict::Fresh | LivenessVerdict::Expired => {}
            }
            if let Some(notice) = &check.logout {
                self.notify_logout(notice);
            }
            if check.hand_lost {
                info!(identity = %check.identity, "hand no longer verified");
            }
            report.liveness = Some(check);
        }

        report
    }

    // Every failure mode here counts as a failed check, never an error.
    fn reverify(&self, identity: &UserId) -> bool {
        let stored = match self.store.get(identity) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(%identity, "no stored embedding for logged-in user");
                return false;
            }
            Err(e) => {
                warn!(%identity, error = %e, "identity store lookup failed");
                return false;
            }
        };

        let live = match self.sensors.capture_embedding(self.config.min_face_confidence) {
            Ok(live) => live,
            Err(e) => {
                debug!(%identity, error = %e, "no usable re-verification sample");
                return false;
            }
        };

        let verification = self.verifier.verify(&live.vector, &stored);
        debug!(
            %identity,
            similarity = ?verification.similarity(),
            threshold = self.verifier.threshold(),
            "re-verification"
        );
        verification.is_match()
    }

    fn notify_logout(&self, notice: &LogoutNotice) {
        self.observer.on_logout(&notice.identity, notice.reason);
    }

    /// Tick until shutdown. Each tick runs on the blocking pool; shutdown does
    /// not wait for an in-flight tick.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick.as_millis() as u64, "security monitor started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let monitor = Arc::clone(&self);
                    let work = tokio::task::spawn_blocking(move || monitor.tick());
                    tokio::select! {
                        joined = work => {
                            if let Err(e) = joined {
                                warn!(error = %e, "monitor tick aborted");
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        info!("security monitor stopped");
    }
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
