//! Signup and one-shot login against the identity store.

use crate::error::{SensingError, VigilError, VigilResult};
use crate::sensors::{FaceEmbedding, IdentityStore, Sensors};
use crate::session::UserId;
use crate::verifier::IdentityVerifier;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Capture attempts per enrollment or login before giving up.
pub const DEFAULT_CAPTURE_ATTEMPTS: u32 = 5;

/// A successful identification.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginMatch {
    pub identity: UserId,
    pub similarity: f32,
}

pub struct Enrollment {
    sensors: Sensors,
    store: Arc<dyn IdentityStore>,
    verifier: IdentityVerifier,
    min_face_confidence: f32,
    capture_attempts: u32,
}

impl Enrollment {
    /// `verifier` carries the login threshold, not the re-verification one.
    pub fn new(
        sensors: Sensors,
        store: Arc<dyn IdentityStore>,
        verifier: IdentityVerifier,
        min_face_confidence: f32,
    ) -> Self {
        Self {
            sensors,
            store,
            verifier,
            min_face_confidence,
            capture_attempts: DEFAULT_CAPTURE_ATTEMPTS,
        }
    }

    pub fn with_capture_attempts(mut self, attempts: u32) -> Self {
        self.capture_attempts = attempts.max(1);
        self
    }

    /// Register `name` with a freshly captured embedding.
    pub fn enroll(&self, name: &str) -> VigilResult<UserId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VigilError::EmptyUsername);
        }
        let user = UserId::from(name);
        if self.store.contains(&user)? {
            return Err(VigilError::UserExists(user));
        }

        let embedding = self.capture()?;
        self.store.put(&user, embedding.vector)?;
        info!(%user, confidence = embedding.confidence, "user enrolled");
        Ok(user)
    }

    /// Match a live face against `claimed`, or against every enrolled user when
    /// no name is given (best match wins).
    pub fn identify(&self, claimed: Option<&UserId>) -> VigilResult<LoginMatch> {
        let candidates = match claimed {
            Some(user) => match self.store.get(user)? {
                Some(stored) => vec![(user.clone(), stored)],
                None => return Err(VigilError::UnknownUser(user.clone())),
            },
            None => self.store.entries()?,
        };
        if candidates.is_empty() {
            return Err(VigilError::NoUsersEnrolled);
        }

        let live = self.capture()?;

        let mut best: Option<LoginMatch> = None;
        for (identity, stored) in candidates {
            let Some(similarity) = self.verifier.similarity(&live.vector, &stored) else {
                warn!(%identity, "stored embedding not comparable with live sample");
                continue;
            };
            debug!(%identity, similarity, "login candidate");
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(LoginMatch {
                    identity,
                    similarity,
                });
            }
        }

        match best {
            Some(found) if self.verifier.matches(found.similarity) => {
                info!(identity = %found.identity, similarity = found.similarity, "face recognized");
                Ok(found)
            }
            other => {
                let best = other.map(|b| b.similarity);
                warn!(best = ?best, threshold = self.verifier.threshold(), "face not recognized");
                Err(VigilError::FaceNotRecognized { best })
            }
        }
    }

    // Transient failures are retried; a closed source is final.
    fn capture(&self) -> VigilResult<FaceEmbedding> {
        let mut last = SensingError::FrameUnavailable;
        for attempt in 1..=self.capture_attempts {
            match self.sensors.capture_embedding(self.min_face_confidence) {
                Ok(embedding) => return Ok(embedding),
                Err(SensingError::SourceClosed) => return Err(SensingError::SourceClosed.into()),
                Err(e) => {
                    debug!(attempt, error = %e, "face capture failed");
                    last = e;
                }
            }
        }
        Err(last.into())
    }
}

impl std::fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrollment")
            .field("verifier", &self.verifier)
            .field("min_face_confidence", &self.min_face_confidence)
            .field("capture_attempts", &self.capture_attempts)
            .finish_non_exhaustive()
    }
}
