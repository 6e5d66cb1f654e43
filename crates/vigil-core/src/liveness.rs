//! Blink liveness: eye-aspect-ratio geometry and the blink / prompt state machine.
//!
//! A blink is registered when the averaged EAR stays below the threshold for
//! `consec_frames` consecutive frames and then rises back above it. Staleness is
//! two-staged: after `prompt_after` without a blink the operator is prompted,
//! and if no blink arrives within `prompt_grace` the session is expired.

use crate::clock::{elapsed, elapsed_at_least};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// A landmark in normalized image coordinates (0.0..=1.0 on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Integer pixel position for a frame of the given size.
    fn to_pixel(self, width: u32, height: u32) -> (f32, f32) {
        (
            (self.x * width as f32).trunc(),
            (self.y * height as f32).trunc(),
        )
    }
}

/// Six ordered eye landmarks: 0 outer corner, 3 inner corner,
/// 1/2 upper lid, 5/4 the lower lid points facing them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EyeLandmarks(pub [Point; 6]);

/// Per-frame face landmarks relevant to liveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: EyeLandmarks,
    pub right_eye: EyeLandmarks,
}

impl FaceLandmarks {
    /// Mean of the two per-eye aspect ratios.
    pub fn average_ear(&self, width: u32, height: u32) -> f32 {
        let left = eye_aspect_ratio(&self.left_eye, width, height);
        let right = eye_aspect_ratio(&self.right_eye, width, height);
        (left + right) / 2.0
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// EAR = (|p1-p5| + |p2-p4|) / (2 |p0-p3|) over pixel-mapped points; 0 for a degenerate eye.
pub fn eye_aspect_ratio(eye: &EyeLandmarks, width: u32, height: u32) -> f32 {
    let p = eye.0.map(|pt| pt.to_pixel(width, height));

    let vert1 = distance(p[1], p[5]);
    let vert2 = distance(p[2], p[4]);
    let horiz = distance(p[0], p[3]);

    if horiz == 0.0 {
        0.0
    } else {
        (vert1 + vert2) / (2.0 * horiz)
    }
}

/// Configuration for blink detection and the liveness prompt
#[derive(Debug, Clone)]
pub struct BlinkConfig {
    /// Average EAR below this marks the eye as closed (default: 0.21)
    pub ear_threshold: f32,

    /// Consecutive closed frames required for a blink (default: 3)
    pub consec_frames: u32,

    /// Time without a blink before the operator is prompted (default: 10s)
    pub prompt_after: Duration,

    /// Time the prompt may stay open before the session expires (default: 5s)
    pub prompt_grace: Duration,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            consec_frames: 3,
            prompt_after: Duration::from_secs(10),
            prompt_grace: Duration::from_secs(5),
        }
    }
}

/// Eye sub-state driven by per-frame EAR samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    /// Eye not flagged closed.
    Open,
    /// EAR below threshold; counting consecutive frames.
    ClosedAccumulating { frames: u32 },
}

/// Liveness prompt sub-state driven by staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    Prompting { since: Instant },
}

/// A confirmed blink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkEvent {
    pub at: Instant,
    /// Closed frames that made up the blink.
    pub closed_frames: u32,
    /// True if this blink answered an open prompt.
    pub cleared_prompt: bool,
}

/// Outcome of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// A blink was seen within the staleness window.
    Fresh,
    /// Staleness window just elapsed; the prompt was opened on this check.
    PromptRaised,
    /// Prompt already open, grace not yet used up.
    AwaitingBlink { remaining: Duration },
    /// Prompt open for the whole grace window without a blink.
    Expired,
}

/// Blink state machine for one session.
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    config: BlinkConfig,
    eye: EyeState,
    prompt: PromptState,
    last_blink_at: Instant,
}

impl BlinkTracker {
    /// Start tracking; `now` counts as the last blink so a fresh session is not prompted at once.
    pub fn new(config: BlinkConfig, now: Instant) -> Self {
        Self {
            config,
            eye: EyeState::Open,
            prompt: PromptState::Idle,
            last_blink_at: now,
        }
    }

    /// Feed one frame's average EAR.
    pub fn observe(&mut self, avg_ear: f32, now: Instant) -> Option<BlinkEvent> {
        let closed = avg_ear < self.config.ear_threshold;

        match (self.eye, closed) {
            (EyeState::Open, true) => {
                self.eye = EyeState::ClosedAccumulating { frames: 1 };
                None
            }
            (EyeState::ClosedAccumulating { frames }, true) => {
                self.eye = EyeState::ClosedAccumulating {
                    frames: frames.saturating_add(1),
                };
                None
            }
            (EyeState::ClosedAccumulating { frames }, false) => {
                self.eye = EyeState::Open;
                if frames >= self.config.consec_frames {
                    Some(self.register_blink(frames, now))
                } else {
                    debug!(frames, "eye reopened before blink threshold");
                    None
                }
            }
            (EyeState::Open, false) => None,
        }
    }

    fn register_blink(&mut self, closed_frames: u32, now: Instant) -> BlinkEvent {
        let cleared_prompt = matches!(self.prompt, PromptState::Prompting { .. });
        self.last_blink_at = now;
        self.prompt = PromptState::Idle;
        debug!(closed_frames, cleared_prompt, "blink registered");
        BlinkEvent {
            at: now,
            closed_frames,
            cleared_prompt,
        }
    }

    /// Staleness check, run by the security monitor on each tick.
    pub fn check_staleness(&mut self, now: Instant) -> LivenessVerdict {
        if !elapsed_at_least(self.last_blink_at, now, self.config.prompt_after) {
            return LivenessVerdict::Fresh;
        }

        match self.prompt {
            PromptState::Idle => {
                self.prompt = PromptState::Prompting { since: now };
                LivenessVerdict::PromptRaised
            }
            PromptState::Prompting { since } => {
                let open_for = elapsed(since, now);
                if open_for >= self.config.prompt_grace {
                    LivenessVerdict::Expired
                } else {
                    LivenessVerdict::AwaitingBlink {
                        remaining: self.config.prompt_grace - open_for,
                    }
                }
            }
        }
    }

    /// Consecutive below-threshold frames since the last reset.
    pub fn frame_counter(&self) -> u32 {
        match self.eye {
            EyeState::Open => 0,
            EyeState::ClosedAccumulating { frames } => frames,
        }
    }

    pub fn eye_state(&self) -> EyeState {
        self.eye
    }

    pub fn prompt_state(&self) -> PromptState {
        self.prompt
    }

    pub fn prompt_active(&self) -> bool {
        matches!(self.prompt, PromptState::Prompting { .. })
    }

    /// When the open prompt started, if any.
    pub fn prompt_started_at(&self) -> Option<Instant> {
        match self.prompt {
            PromptState::Idle => None,
            PromptState::Prompting { since } => Some(since),
        }
    }

    pub fn last_blink_at(&self) -> Instant {
        self.last_blink_at
    }

    pub fn since_last_blink(&self, now: Instant) -> Duration {
        elapsed(self.last_blink_at, now)
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }
}
