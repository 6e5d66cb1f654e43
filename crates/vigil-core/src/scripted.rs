//! Scripted sensors: replay a JSON-lines recording in place of a camera and models.
//!
//! One line per frame:
//!
//! ```json
//! {"width": 640, "height": 480, "hand": true, "repeat": 30,
//!  "face": {"left_eye": [{"x": 0.1, "y": 0.2}, ...], "right_eye": [...]},
//!  "embedding": [0.12, -0.4, ...], "confidence": 0.97}
//! ```
//!
//! Every field is optional. `repeat` emits the same frame several times;
//! `"unavailable": true` produces a transient capture failure instead of a frame.

use crate::error::{SensingError, VigilError, VigilResult};
use crate::liveness::FaceLandmarks;
use crate::sensors::{FaceEmbedder, FaceEmbedding, Frame, FrameSource, LandmarkDetector, Sensors};
use crate::verifier::Embedding;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_repeat() -> u32 {
    1
}

/// One recorded frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedFrame {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub face: Option<FaceLandmarks>,
    #[serde(default)]
    pub hand: bool,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    /// Face confidence reported with the embedding (default 1.0).
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(default)]
    pub unavailable: bool,
}

impl Default for ScriptedFrame {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            face: None,
            hand: false,
            embedding: None,
            confidence: None,
            repeat: 1,
            unavailable: false,
        }
    }
}

/// Parse a JSON-lines script. Blank lines and `#` comments are skipped;
/// `repeat` is expanded.
pub fn parse_script(raw: &str) -> VigilResult<Vec<ScriptedFrame>> {
    let mut frames = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame: ScriptedFrame = serde_json::from_str(line).map_err(|e| {
            VigilError::Config(format!("script line {}: {}", lineno + 1, e))
        })?;
        for _ in 0..frame.repeat {
            frames.push(ScriptedFrame {
                repeat: 1,
                ..frame.clone()
            });
        }
    }
    Ok(frames)
}

/// Camera, landmark detector and embedder backed by a script.
#[derive(Debug)]
pub struct ScriptedSensors {
    frames: Vec<ScriptedFrame>,
    cursor: AtomicU64,
    looping: bool,
    frame_interval: Duration,
    released: AtomicBool,
}

impl ScriptedSensors {
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            frames,
            cursor: AtomicU64::new(0),
            looping: false,
            frame_interval: Duration::ZERO,
            released: AtomicBool::new(false),
        }
    }

    pub fn from_path(path: &Path) -> VigilResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let frames = parse_script(&raw)?;
        info!(path = %path.display(), frames = frames.len(), "script loaded");
        Ok(Self::new(frames))
    }

    /// Restart from the first frame instead of closing at the end.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Sleep this long before handing out each frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    /// Bundle the same instance as camera, detector and embedder.
    pub fn into_sensors(self: Arc<Self>) -> Sensors {
        Sensors::new(self.clone(), self.clone(), self)
    }

    fn entry(&self, seq: u64) -> Option<&ScriptedFrame> {
        if self.frames.is_empty() {
            return None;
        }
        let idx = if self.looping {
            seq % self.frames.len() as u64
        } else {
            seq
        };
        self.frames.get(usize::try_from(idx).ok()?)
    }
}

impl FrameSource for ScriptedSensors {
    fn next_frame(&self) -> Result<Frame, SensingError> {
        if self.is_released() {
            return Err(SensingError::SourceClosed);
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        let seq = self.cursor.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry(seq).ok_or(SensingError::SourceClosed)?;
        if entry.unavailable {
            return Err(SensingError::FrameUnavailable);
        }
        Ok(Frame::new(seq, entry.width, entry.height))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::Relaxed) {
            debug!("scripted source released");
        }
    }
}

impl LandmarkDetector for ScriptedSensors {
    fn detect_face(&self, frame: &Frame) -> Option<FaceLandmarks> {
        self.entry(frame.seq).and_then(|e| e.face)
    }

    fn detect_hands(&self, frame: &Frame) -> bool {
        self.entry(frame.seq).map_or(false, |e| e.hand)
    }
}

impl FaceEmbedder for ScriptedSensors {
    fn embed(&self, frame: &Frame) -> Result<FaceEmbedding, SensingError> {
        let entry = self.entry(frame.seq).ok_or(SensingError::NoFace)?;
        let vector = entry.embedding.clone().ok_or(SensingError::NoFace)?;
        Ok(FaceEmbedding {
            vector,
            confidence: entry.confidence.unwrap_or(1.0),
        })
    }
}
