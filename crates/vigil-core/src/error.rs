//! Error types for the Vigil authentication core

use crate::session::UserId;
use thiserror::Error;

/// Result type alias for Vigil operations
pub type VigilResult<T> = Result<T, VigilError>;

/// Transient sensing failures reported by the camera / model boundary.
///
/// None of these are fatal: the monitor and the frame loop downgrade every
/// variant to "no signal this cycle".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensingError {
    #[error("no frame available")]
    FrameUnavailable,

    #[error("frame source closed")]
    SourceClosed,

    #[error("no face detected")]
    NoFace,

    #[error("face confidence too low: {0:.2}")]
    LowConfidence(f32),

    #[error("embedding extraction failed: {0}")]
    Extraction(String),
}

/// Errors surfaced by enrollment, login, storage and configuration.
#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Sensing error: {0}")]
    Sensing(#[from] SensingError),

    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Username already exists: {0}")]
    UserExists(UserId),

    #[error("User does not exist: {0}")]
    UnknownUser(UserId),

    #[error("No users enrolled")]
    NoUsersEnrolled,

    #[error("Face not recognized (best similarity: {})", fmt_similarity(.best))]
    FaceNotRecognized { best: Option<f32> },

    #[error("A session is already active for {0}")]
    SessionActive(UserId),

    #[error("Identity store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for VigilError {
    fn from(err: config::ConfigError) -> Self {
        VigilError::Config(err.to_string())
    }
}

fn fmt_similarity(best: &Option<f32>) -> String {
    match best {
        Some(s) => format!("{:.2}", s),
        None => "n/a".to_string(),
    }
}
