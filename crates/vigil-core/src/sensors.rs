//! Boundary traits for the camera, the landmark models, the face embedder and
//! the identity store.
//!
//! Implementations live outside the core (the console ships scripted ones).
//! Every method takes `&self` so one instance can be shared by the security
//! monitor and the frame loop.

use crate::error::{SensingError, VigilResult};
use crate::liveness::FaceLandmarks;
use crate::session::UserId;
use crate::verifier::Embedding;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One captured video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonic sequence number assigned by the source.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    /// Raw pixel data; opaque to the core.
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(seq: u64, width: u32, height: u32) -> Self {
        Self {
            seq,
            width,
            height,
            data: Vec::new(),
        }
    }
}

/// Pull-based frame source.
pub trait FrameSource: Send + Sync {
    /// Next frame. `FrameUnavailable` is transient; `SourceClosed` is final.
    fn next_frame(&self) -> Result<Frame, SensingError>;

    /// Release the underlying device. Called once on shutdown.
    fn release(&self) {}
}

/// Facial and hand landmark extraction.
pub trait LandmarkDetector: Send + Sync {
    /// Eye landmarks of the first face, if one is visible.
    fn detect_face(&self, frame: &Frame) -> Option<FaceLandmarks>;

    /// True if at least one hand is visible.
    fn detect_hands(&self, frame: &Frame) -> bool;
}

/// Embedding with the detector's face confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    pub vector: Embedding,
    pub confidence: f32,
}

/// One-shot face embedding.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, frame: &Frame) -> Result<FaceEmbedding, SensingError>;
}

/// Enrolled embeddings keyed by user.
pub trait IdentityStore: Send + Sync {
    fn get(&self, user: &UserId) -> VigilResult<Option<Embedding>>;

    fn put(&self, user: &UserId, embedding: Embedding) -> VigilResult<()>;

    fn contains(&self, user: &UserId) -> VigilResult<bool> {
        Ok(self.get(user)?.is_some())
    }

    /// Every enrolled user with its embedding.
    fn entries(&self) -> VigilResult<Vec<(UserId, Embedding)>>;
}

/// Shared handles to the sensing collaborators.
#[derive(Clone)]
pub struct Sensors {
    pub frames: Arc<dyn FrameSource>,
    pub landmarks: Arc<dyn LandmarkDetector>,
    pub embedder: Arc<dyn FaceEmbedder>,
}

impl Sensors {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        landmarks: Arc<dyn LandmarkDetector>,
        embedder: Arc<dyn FaceEmbedder>,
    ) -> Self {
        Self {
            frames,
            landmarks,
            embedder,
        }
    }

    /// Capture a frame and embed it, rejecting faces below `min_confidence`.
    ///
    /// A panicking embedder is reported as [`SensingError::Extraction`].
    pub fn capture_embedding(&self, min_confidence: f32) -> Result<FaceEmbedding, SensingError> {
        let frame = self.frames.next_frame()?;
        let embedding = panic::catch_unwind(AssertUnwindSafe(|| self.embedder.embed(&frame)))
            .unwrap_or_else(|payload| Err(SensingError::Extraction(panic_message(&*payload))))?;
        if embedding.confidence < min_confidence {
            return Err(SensingError::LowConfidence(embedding.confidence));
        }
        Ok(embedding)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("embedder panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("embedder panicked: {}", msg)
    } else {
        "embedder panicked".to_string()
    }
}

impl std::fmt::Debug for Sensors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensors").finish_non_exhaustive()
    }
}
