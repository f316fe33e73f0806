// src/config.rs
// Tunables for every scheduler component, loadable from a TOML file

use crate::constants::*;
use crate::error::{Result, SchedulerError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub decay: DecayConfig,
    pub mastery: MasteryConfig,
    pub focus: FocusConfig,
    pub ladder: LadderConfig,
    pub session: SessionConfig,
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub default_stability: f64,
    pub growth_factor: f64,
    pub growth_offset: f64,
    pub decay_factor: f64,
    pub max_box: u32,
    pub failure_reset_threshold: u32,
    pub retention_floor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            default_stability: STABILITY_DEFAULT,
            growth_factor: STABILITY_GROWTH_FACTOR,
            growth_offset: STABILITY_GROWTH_OFFSET,
            decay_factor: STABILITY_DECAY_FACTOR,
            max_box: BOX_MAX,
            failure_reset_threshold: FAILURE_RESET_THRESHOLD,
            retention_floor: RETENTION_FLOOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    pub min_attempts: u32,
    pub min_success_rate: f64,
    pub allowance_min_attempts: u32,
    pub medium_threshold: f64,
    pub hard_threshold: f64,
    pub hard_partial_weight: f64,
    /// Number of most recent attempts used for every "recent" rate.
    pub trend_window: usize,
    pub ladder_size: usize,
    pub graduation_fraction: f64,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            min_attempts: MASTERY_MIN_ATTEMPTS,
            min_success_rate: MASTERY_MIN_SUCCESS_RATE,
            allowance_min_attempts: ALLOWANCE_MIN_ATTEMPTS,
            medium_threshold: ALLOWANCE_MEDIUM_THRESHOLD,
            hard_threshold: ALLOWANCE_HARD_THRESHOLD,
            hard_partial_weight: ALLOWANCE_HARD_PARTIAL_WEIGHT,
            trend_window: TREND_WINDOW,
            ladder_size: LADDER_SIZE,
            graduation_fraction: GRADUATION_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub onboarding_sessions: u32,
    pub good_accuracy: f64,
    pub good_efficiency: f64,
    pub excellent_accuracy: f64,
    pub excellent_efficiency: f64,
    pub stagnation_days: i64,
    pub stagnation_tags: usize,
    pub max_focus_tags: usize,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            onboarding_sessions: ONBOARDING_SESSIONS,
            good_accuracy: GOOD_ACCURACY,
            good_efficiency: GOOD_EFFICIENCY,
            excellent_accuracy: EXCELLENT_ACCURACY,
            excellent_efficiency: EXCELLENT_EFFICIENCY,
            stagnation_days: STAGNATION_DAYS,
            stagnation_tags: STAGNATION_FOCUS_TAGS,
            max_focus_tags: MAX_FOCUS_TAGS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    pub primary_share: f64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            primary_share: PRIMARY_FOCUS_SHARE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub guided_length: usize,
    pub review_share: f64,
    pub inactivity_minutes: i64,
    pub tracking_soft_cap: usize,
    pub max_distinct_tags: usize,
    pub creation_cooldown_ms: u64,
    pub guided_stale_hours: i64,
    pub auto_complete_ratio: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            guided_length: GUIDED_SESSION_LENGTH,
            review_share: REVIEW_SHARE,
            inactivity_minutes: INACTIVITY_ROTATION_MINUTES,
            tracking_soft_cap: TRACKING_SOFT_CAP,
            max_distinct_tags: MAX_DISTINCT_TAGS,
            creation_cooldown_ms: CREATION_COOLDOWN_MS,
            guided_stale_hours: GUIDED_STALE_HOURS,
            auto_complete_ratio: AUTO_COMPLETE_RATIO,
        }
    }
}

impl SessionConfig {
    pub fn creation_cooldown(&self) -> Duration {
        Duration::from_millis(self.creation_cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: f64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: OPERATION_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            base_backoff_ms: BASE_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            jitter: BACKOFF_JITTER,
            breaker_threshold: BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: BREAKER_COOLDOWN_MS,
        }
    }
}

impl SchedulerConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SchedulerError::Config(e.to_string()))
    }

    /// Load from a file, falling back to defaults when it is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    debug!("Loaded scheduler config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                debug!("Config {} not found, using defaults", path.display());
                Self::default()
            }
        }
    }
}
