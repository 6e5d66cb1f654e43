//! Vigil - the top-level coordination layer
//!
//! Owns configuration, clock, sensors, identity store, session and observer,
//! and hands out the two loops that share the session.

use crate::auth_loop::{ContinuousAuthLoop, LoopExit};
use crate::clock::{Clock, SystemClock};
use crate::config::VigilConfig;
use crate::enrollment::{Enrollment, LoginMatch};
use crate::error::{VigilError, VigilResult};
use crate::events::{AuthObserver, LogoutReason};
use crate::monitor::SecurityMonitor;
use crate::sensors::{IdentityStore, Sensors};
use crate::session::{LogoutNotice, SessionHandle, UserId};
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Vigil {
    config: VigilConfig,
    clock: Arc<dyn Clock>,
    sensors: Sensors,
    store: Arc<dyn IdentityStore>,
    session: SessionHandle,
    observer: Arc<dyn AuthObserver>,
    shutdown: ShutdownCoordinator,
    stop: Arc<AtomicBool>,
}

impl Vigil {
    pub fn new(
        config: VigilConfig,
        sensors: Sensors,
        store: Arc<dyn IdentityStore>,
        observer: Arc<dyn AuthObserver>,
    ) -> VigilResult<Self> {
        config.validate()?;
        Ok(Self {
            session: SessionHandle::new(config.session_config()),
            config,
            clock: Arc::new(SystemClock),
            sensors,
            store,
            observer,
            shutdown: ShutdownCoordinator::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replace the clock (tests drive a `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn enrollment(&self) -> Enrollment {
        Enrollment::new(
            self.sensors.clone(),
            Arc::clone(&self.store),
            self.config.thresholds().login_verifier(),
            self.config.min_face_confidence,
        )
    }

    /// Sign up a new user from a live capture.
    pub fn enroll(&self, name: &str) -> VigilResult<UserId> {
        self.enrollment().enroll(name)
    }

    /// Identify the operator and open a session.
    pub fn login(&self, claimed: Option<&UserId>) -> VigilResult<LoginMatch> {
        if let Some(active) = self.session.current_user() {
            return Err(VigilError::SessionActive(active));
        }
        let found = self.enrollment().identify(claimed)?;
        self.session.begin(found.identity.clone(), self.clock.now())?;
        self.stop.store(false, Ordering::Relaxed);
        self.observer.on_login(&found.identity);
        Ok(found)
    }

    /// End the session, if any, and notify the observer.
    pub fn logout(&self, reason: LogoutReason) -> Option<LogoutNotice> {
        let notice = self.session.logout(reason)?;
        self.observer.on_logout(&notice.identity, notice.reason);
        Some(notice)
    }

    pub fn monitor(&self) -> SecurityMonitor {
        SecurityMonitor::new(
            self.config.monitor_config(),
            Arc::clone(&self.clock),
            self.session.clone(),
            self.sensors.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.observer),
        )
    }

    /// Start the security monitor on the current tokio runtime.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let monitor = Arc::new(self.monitor());
        tokio::spawn(monitor.run(self.shutdown.signal()))
    }

    pub fn auth_loop(&self) -> ContinuousAuthLoop {
        ContinuousAuthLoop::new(
            Arc::clone(&self.clock),
            self.session.clone(),
            self.sensors.clone(),
            Arc::clone(&self.observer),
        )
    }

    /// Run the frame loop on the calling thread until the session ends.
    pub fn continuous_auth(&self) -> LoopExit {
        self.auth_loop()
            .run_blocking(Arc::clone(&self.stop), self.shutdown.signal())
    }

    /// Ask the frame loop to log out and return.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Stop both loops and release the frame source.
    pub fn shutdown(&self) {
        info!("vigil shutting down");
        self.shutdown.trigger();
        self.sensors.frames.release();
    }
}

impl std::fmt::Debug for Vigil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vigil")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
