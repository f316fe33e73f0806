// src/limits.rs
// Per-difficulty time limits, optionally adapted to historical solve times

use crate::constants::*;
use crate::models::Difficulty;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    /// No limit is enforced; recommendations are still reported.
    Off,
    #[default]
    Standard,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLimits {
    pub problem_id: i64,
    pub difficulty: Difficulty,
    pub recommended_minutes: f64,
    pub minimum_minutes: f64,
    pub maximum_minutes: f64,
    pub mode: LimitMode,
    pub is_adaptive: bool,
}

pub fn expected_minutes(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::Easy => EXPECTED_TIME_EASY,
        Difficulty::Medium => EXPECTED_TIME_MEDIUM,
        Difficulty::Hard => EXPECTED_TIME_HARD,
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Compute limits for one problem.
///
/// `solve_times` are the minutes of previous successful solves at the same
/// difficulty. Adaptive mode only kicks in once there are enough of them.
pub fn compute_limits(
    problem_id: i64,
    difficulty: Difficulty,
    mode: LimitMode,
    solve_times: &[f64],
) -> TimeLimits {
    let base = expected_minutes(difficulty);
    let mut samples: Vec<f64> = solve_times
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t > 0.0)
        .collect();

    let adaptive = match mode {
        LimitMode::Adaptive if samples.len() >= ADAPTIVE_MIN_SAMPLES => median(&mut samples),
        _ => None,
    };

    let recommended = match adaptive {
        Some(m) => (m * ADAPTIVE_MEDIAN_MULTIPLIER)
            .clamp(base * ADAPTIVE_CLAMP_LOW, base * ADAPTIVE_CLAMP_HIGH),
        None => base,
    };

    debug!(
        "[Limits] Problem {} ({}): mode {:?}, {} samples, recommended {:.1}m",
        problem_id,
        difficulty,
        mode,
        samples.len(),
        recommended
    );

    TimeLimits {
        problem_id,
        difficulty,
        recommended_minutes: recommended,
        minimum_minutes: recommended * LIMIT_MINIMUM_RATIO,
        maximum_minutes: recommended * LIMIT_MAXIMUM_RATIO,
        mode,
        is_adaptive: adaptive.is_some(),
    }
}
