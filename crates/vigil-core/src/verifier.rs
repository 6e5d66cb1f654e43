//! Identity matching: cosine similarity between a live and a stored face embedding.

use serde::{Deserialize, Serialize};

/// Face embedding vector as produced by the embedder and kept in the identity store.
pub type Embedding = Vec<f32>;

/// Cosine similarity of two embeddings, clamped to [-1, 1].
///
/// `None` when the vectors cannot be compared (length mismatch, empty, or zero norm).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(similarity.clamp(-1.0, 1.0) as f32)
}

/// Result of comparing a live embedding against a stored one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verification {
    Match(f32),
    Mismatch(f32),
    /// Embeddings could not be compared; counts as a failed verification.
    Incomparable,
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Match(_))
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            Verification::Match(s) | Verification::Mismatch(s) => Some(*s),
            Verification::Incomparable => None,
        }
    }
}

/// Thresholded similarity check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityVerifier {
    threshold: f32,
}

impl IdentityVerifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Similarity of `live` to `stored`, if comparable.
    pub fn similarity(&self, live: &[f32], stored: &[f32]) -> Option<f32> {
        cosine_similarity(live, stored)
    }

    /// Monotonic in `similarity`.
    pub fn matches(&self, similarity: f32) -> bool {
        similarity >= self.threshold
    }

    pub fn verify(&self, live: &[f32], stored: &[f32]) -> Verification {
        match self.similarity(live, stored) {
            Some(s) if self.matches(s) => Verification::Match(s),
            Some(s) => Verification::Mismatch(s),
            None => Verification::Incomparable,
        }
    }
}

/// The two independent match thresholds: one-shot login and continuous re-verification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub login: f32,
    pub continuous: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            login: 0.45,
            continuous: 0.65,
        }
    }
}

impl MatchThresholds {
    pub fn login_verifier(&self) -> IdentityVerifier {
        IdentityVerifier::new(self.login)
    }

    pub fn continuous_verifier(&self) -> IdentityVerifier {
        IdentityVerifier::new(self.continuous)
    }
}
