//! Foreground frame loop: landmarks in, tracker updates and status reports out.

use crate::clock::Clock;
use crate::error::SensingError;
use crate::events::{AuthObserver, LogoutReason};
use crate::sensors::{Frame, Sensors};
use crate::session::{FrameObservation, FrameUpdate, SessionHandle};
use crate::shutdown::ShutdownSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pause after a transient capture failure before asking for the next frame.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Why the frame loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session was ended elsewhere (security monitor).
    LoggedOut,
    /// Stop flag or shutdown; the loop logged the user out itself.
    Stopped,
    /// The frame source ended; the loop logged the user out itself.
    SourceClosed,
}

pub struct ContinuousAuthLoop {
    clock: Arc<dyn Clock>,
    session: SessionHandle,
    sensors: Sensors,
    observer: Arc<dyn AuthObserver>,
    retry_delay: Duration,
}

impl ContinuousAuthLoop {
    pub fn new(
        clock: Arc<dyn Clock>,
        session: SessionHandle,
        sensors: Sensors,
        observer: Arc<dyn AuthObserver>,
    ) -> Self {
        Self {
            clock,
            session,
            sensors,
            observer,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run on the current thread until the session ends. Call from a dedicated thread.
    pub fn run_blocking(&self, stop: Arc<AtomicBool>, shutdown: ShutdownSignal) -> LoopExit {
        info!(identity = ?self.session.current_user(), "continuous authentication started");

        let stopping = || stop.load(Ordering::Relaxed) || shutdown.is_triggered();

        let exit = loop {
            if !self.session.is_active() {
                break LoopExit::LoggedOut;
            }
            if stopping() {
                self.logout(LogoutReason::Manual);
                break LoopExit::Stopped;
            }

            let frame = match self.sensors.frames.next_frame() {
                Ok(frame) => frame,
                // Shutdown releases the source, so a close during shutdown is a stop.
                Err(SensingError::SourceClosed) if stopping() => {
                    self.logout(LogoutReason::Manual);
                    break LoopExit::Stopped;
                }
                Err(SensingError::SourceClosed) => {
                    self.logout(LogoutReason::SourceClosed);
                    break LoopExit::SourceClosed;
                }
                Err(e) => {
                    debug!(error = %e, "frame capture failed, retrying");
                    std::thread::sleep(self.retry_delay);
                    continue;
                }
            };

            self.process_frame(&frame);
        };

        info!(?exit, "continuous authentication ended");
        exit
    }

    /// Feed one frame to the session and report status.
    pub fn process_frame(&self, frame: &Frame) -> Option<FrameUpdate> {
        let obs = self.observe(frame);
        let update = self.session.apply_frame(obs, self.clock.now())?;
        if let Some(blink) = &update.blink {
            debug!(
                seq = frame.seq,
                closed_frames = blink.closed_frames,
                cleared_prompt = blink.cleared_prompt,
                "blink"
            );
        }
        self.observer.on_status(&update.status);
        Some(update)
    }

    fn observe(&self, frame: &Frame) -> FrameObservation {
        let avg_ear = self
            .sensors
            .landmarks
            .detect_face(frame)
            .map(|face| face.average_ear(frame.width, frame.height));
        FrameObservation {
            avg_ear,
            hand_present: self.sensors.landmarks.detect_hands(frame),
        }
    }

    fn logout(&self, reason: LogoutReason) {
        if let Some(notice) = self.session.logout(reason) {
            self.observer.on_logout(&notice.identity, notice.reason);
        }
    }
}

impl std::fmt::Debug for ContinuousAuthLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousAuthLoop")
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
