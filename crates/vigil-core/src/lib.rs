//! # Vigil - Continuous Face Authentication
//!
//! Keeps checking that the person in front of the camera is still the user who
//! logged in, and that they are live: periodic identity re-verification, blink
//! staleness with a prompt and grace window, and hand presence tracking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Vigil                               │
//! │  ┌───────────────┐   frames   ┌──────────────────────┐           │
//! │  │  FrameSource  │──────────→ │ ContinuousAuthLoop   │──status──→│
//! │  └───────────────┘            │  (blocking thread)   │           │
//! │         │                     └──────────┬───────────┘           │
//! │         │ on demand                      │ apply_frame           │
//! │         ↓                                ↓                       │
//! │  ┌───────────────┐  reverify  ┌──────────────────────┐           │
//! │  │ FaceEmbedder  │←───────────│   SessionHandle      │           │
//! │  │ IdentityStore │            │ (blink, hand, timers)│           │
//! │  └───────────────┘            └──────────┬───────────┘           │
//! │                                          ↑ tick (1s)             │
//! │                               ┌──────────┴───────────┐           │
//! │                               │  SecurityMonitor     │──logout──→│
//! │                               │  (tokio task)        │           │
//! │                               └──────────────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth_loop;
pub mod clock;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod gesture;
pub mod liveness;
pub mod monitor;
pub mod scripted;
pub mod sensors;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod verifier;
pub mod vigil;

pub use auth_loop::{ContinuousAuthLoop, LoopExit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VigilConfig;
pub use enrollment::{Enrollment, LoginMatch};
pub use error::{SensingError, VigilError, VigilResult};
pub use events::{AuthEvent, AuthObserver, ChannelObserver, LogoutReason, StatusReport, TracingObserver};
pub use gesture::{GestureConfig, GestureTracker, HandState};
pub use liveness::{
    eye_aspect_ratio, BlinkConfig, BlinkEvent, BlinkTracker, EyeLandmarks, EyeState, FaceLandmarks,
    LivenessVerdict, Point, PromptState,
};
pub use monitor::{MonitorConfig, SecurityMonitor, TickReport};
pub use scripted::{parse_script, ScriptedFrame, ScriptedSensors};
pub use sensors::{FaceEmbedder, FaceEmbedding, Frame, FrameSource, IdentityStore, LandmarkDetector, Sensors};
pub use session::{
    FrameObservation, FrameUpdate, LivenessCheck, LogoutNotice, ReverifyOutcome, ReverifyState,
    ReverifyTicket, SessionConfig, SessionHandle, SessionId, SessionSnapshot, UserId,
};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{JsonIdentityStore, MemoryIdentityStore};
pub use verifier::{cosine_similarity, Embedding, IdentityVerifier, MatchThresholds, Verification};
pub use vigil::Vigil;
