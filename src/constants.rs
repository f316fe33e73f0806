// src/constants.rs

// --- Time Constants ---
pub const DAY_SECONDS: i64 = 86400;
pub const EXPECTED_TIME_EASY: f64 = 10.0; // Minutes
pub const EXPECTED_TIME_MEDIUM: f64 = 25.0; // Minutes
pub const EXPECTED_TIME_HARD: f64 = 45.0; // Minutes

// --- Stability / Leitner Parameters ---
pub const STABILITY_DEFAULT: f64 = 1.0;
pub const STABILITY_GROWTH_FACTOR: f64 = 1.2;
pub const STABILITY_GROWTH_OFFSET: f64 = 0.5;
pub const STABILITY_DECAY_FACTOR: f64 = 0.7;
pub const STABILITY_SCORE_FLOOR: f64 = 0.1;
pub const RETENTION_FLOOR: f64 = 0.1;

pub const BOX_MIN: u32 = 1;
pub const BOX_MAX: u32 = 8;
pub const FAILURE_RESET_THRESHOLD: u32 = 3;
// Review interval (days) for each box, index 0 = box 1
pub const BOX_INTERVAL_DAYS: [i64; 8] = [1, 3, 7, 14, 30, 45, 60, 90];

// --- Tag Mastery ---
pub const MASTERY_MIN_ATTEMPTS: u32 = 5;
pub const MASTERY_MIN_SUCCESS_RATE: f64 = 0.8;
pub const ALLOWANCE_MIN_ATTEMPTS: u32 = 3;
pub const ALLOWANCE_MEDIUM_THRESHOLD: f64 = 0.75;
pub const ALLOWANCE_HARD_THRESHOLD: f64 = 0.9;
pub const ALLOWANCE_HARD_PARTIAL_WEIGHT: f64 = 0.5;
pub const TREND_WINDOW: usize = 10;
pub const LADDER_SIZE: usize = 5;
pub const GRADUATION_FRACTION: f64 = 0.8;

// --- Focus Coordination ---
pub const ONBOARDING_SESSIONS: u32 = 3;
pub const GOOD_ACCURACY: f64 = 0.75;
pub const GOOD_EFFICIENCY: f64 = 0.7;
pub const EXCELLENT_ACCURACY: f64 = 0.9;
pub const EXCELLENT_EFFICIENCY: f64 = 0.8;
pub const STAGNATION_DAYS: i64 = 7;
pub const STAGNATION_FOCUS_TAGS: usize = 3;
pub const MAX_FOCUS_TAGS: usize = 4;

// --- Pattern Ladder ---
pub const PRIMARY_FOCUS_SHARE: f64 = 0.6;

// --- Sessions ---
pub const GUIDED_SESSION_LENGTH: usize = 5;
pub const REVIEW_SHARE: f64 = 0.4;
pub const INACTIVITY_ROTATION_MINUTES: i64 = 120;
pub const TRACKING_SOFT_CAP: usize = 12;
pub const MAX_DISTINCT_TAGS: usize = 4;
pub const CREATION_COOLDOWN_MS: u64 = 1000;
pub const GUIDED_STALE_HOURS: i64 = 24;
pub const AUTO_COMPLETE_RATIO: f64 = 0.75;

// --- Resilience ---
pub const OPERATION_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const BASE_BACKOFF_MS: u64 = 100;
pub const MAX_BACKOFF_MS: u64 = 5000;
pub const BACKOFF_JITTER: f64 = 0.25;
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const BREAKER_COOLDOWN_MS: u64 = 30_000;

// --- Time Limits ---
pub const ADAPTIVE_MIN_SAMPLES: usize = 5;
pub const ADAPTIVE_MEDIAN_MULTIPLIER: f64 = 1.1;
pub const ADAPTIVE_CLAMP_LOW: f64 = 0.6;
pub const ADAPTIVE_CLAMP_HIGH: f64 = 1.5;
pub const LIMIT_MINIMUM_RATIO: f64 = 0.5;
pub const LIMIT_MAXIMUM_RATIO: f64 = 1.5;
