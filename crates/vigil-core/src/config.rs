//! Runtime configuration.
//!
//! | Key (env `VIGIL_<KEY>`) | Default | Description |
//! |-----|---------|-------------|
//! | ear_threshold | 0.21 | Average EAR below this counts as a closed eye |
//! | consec_frames_blink | 3 | Closed frames required for a blink |
//! | match_threshold_continuous | 0.65 | Similarity needed to pass re-verification |
//! | match_threshold_login | 0.45 | Similarity needed to log in |
//! | min_face_confidence | 0.85 | Embeddings below this confidence are rejected |
//! | logout_timer_ms | 10000 | Failing re-verification streak that ends the session |
//! | blink_prompt_timer_ms | 10000 | Time without a blink before the prompt |
//! | blink_prompt_grace_ms | 5000 | Time to answer the prompt |
//! | check_interval_ms | 5000 | Time between re-verifications |
//! | hand_gesture_time_ms | 5000 | Time without a hand before the flag drops |
//! | monitor_tick_ms | 1000 | Security monitor period |
//! | identity_db | users.json | JSON identity store path |

use crate::error::{VigilError, VigilResult};
use crate::gesture::GestureConfig;
use crate::liveness::BlinkConfig;
use crate::monitor::MonitorConfig;
use crate::session::SessionConfig;
use crate::verifier::MatchThresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file (extension resolved by the `config` crate).
pub const DEFAULT_CONFIG_PATH: &str = "config/vigil";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub ear_threshold: f32,
    pub consec_frames_blink: u32,
    pub match_threshold_continuous: f32,
    pub match_threshold_login: f32,
    pub min_face_confidence: f32,
    pub logout_timer_ms: u64,
    pub blink_prompt_timer_ms: u64,
    pub blink_prompt_grace_ms: u64,
    pub check_interval_ms: u64,
    pub hand_gesture_time_ms: u64,
    pub monitor_tick_ms: u64,
    pub identity_db: String,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            consec_frames_blink: 3,
            match_threshold_continuous: 0.65,
            match_threshold_login: 0.45,
            min_face_confidence: 0.85,
            logout_timer_ms: 10_000,
            blink_prompt_timer_ms: 10_000,
            blink_prompt_grace_ms: 5_000,
            check_interval_ms: 5_000,
            hand_gesture_time_ms: 5_000,
            monitor_tick_ms: 1_000,
            identity_db: "users.json".to_string(),
        }
    }
}

impl VigilConfig {
    /// Load config from file and environment. Precedence: `VIGIL_*` env > `VIGIL_CONFIG`
    /// path (default `config/vigil`) > defaults.
    pub fn load() -> VigilResult<Self> {
        let config_path =
            std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`VigilConfig::load`] with an explicit file path. A missing file is skipped.
    pub fn load_from(path: &Path) -> VigilResult<Self> {
        let builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(config::File::with_name(&path.to_string_lossy()))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("VIGIL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> VigilResult<()> {
        let unit = |name: &str, v: f32, lo: f32| {
            if v.is_finite() && v >= lo && v <= 1.0 {
                Ok(())
            } else {
                Err(VigilError::Config(format!(
                    "{} must be within [{}, 1], got {}",
                    name, lo, v
                )))
            }
        };
        unit("match_threshold_continuous", self.match_threshold_continuous, -1.0)?;
        unit("match_threshold_login", self.match_threshold_login, -1.0)?;
        unit("min_face_confidence", self.min_face_confidence, 0.0)?;

        if !(self.ear_threshold.is_finite() && self.ear_threshold > 0.0) {
            return Err(VigilError::Config(format!(
                "ear_threshold must be positive, got {}",
                self.ear_threshold
            )));
        }
        if self.consec_frames_blink == 0 {
            return Err(VigilError::Config(
                "consec_frames_blink must be at least 1".to_string(),
            ));
        }

        for (name, ms) in [
            ("logout_timer_ms", self.logout_timer_ms),
            ("blink_prompt_timer_ms", self.blink_prompt_timer_ms),
            ("blink_prompt_grace_ms", self.blink_prompt_grace_ms),
            ("check_interval_ms", self.check_interval_ms),
            ("hand_gesture_time_ms", self.hand_gesture_time_ms),
            ("monitor_tick_ms", self.monitor_tick_ms),
        ] {
            if ms == 0 {
                return Err(VigilError::Config(format!("{} must be positive", name)));
            }
        }
        if self.identity_db.trim().is_empty() {
            return Err(VigilError::Config("identity_db must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            login: self.match_threshold_login,
            continuous: self.match_threshold_continuous,
        }
    }

    pub fn blink_config(&self) -> BlinkConfig {
        BlinkConfig {
            ear_threshold: self.ear_threshold,
            consec_frames: self.consec_frames_blink,
            prompt_after: Duration::from_millis(self.blink_prompt_timer_ms),
            prompt_grace: Duration::from_millis(self.blink_prompt_grace_ms),
        }
    }

    pub fn gesture_config(&self) -> GestureConfig {
        GestureConfig {
            stale_after: Duration::from_millis(self.hand_gesture_time_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            blink: self.blink_config(),
            gesture: self.gesture_config(),
            reverify_interval: Duration::from_millis(self.check_interval_ms),
            logout_after: Duration::from_millis(self.logout_timer_ms),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            tick: Duration::from_millis(self.monitor_tick_ms),
            min_face_confidence: self.min_face_confidence,
            threshold: self.thresholds().continuous,
        }
    }
}
