// src/focus.rs
// Focus coordination: how many tags are active, and which

use crate::config::FocusConfig;
use crate::decay::days_between;
use crate::limits::expected_minutes;
use crate::models::{Attempt, FocusDecision, PerformanceLevel};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashSet;

pub const FAILSAFE_TAG: &str = "array";

impl FocusDecision {
    /// Returned whenever the real decision cannot be computed.
    pub fn failsafe() -> Self {
        FocusDecision {
            active_tags: vec![FAILSAFE_TAG.to_string()],
            algorithm_tags: vec![FAILSAFE_TAG.to_string()],
            user_preferences: Vec::new(),
            reasoning: "Failsafe: focusing on a single core tag".to_string(),
            performance_level: PerformanceLevel::Onboarding,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceSnapshot {
    /// Success fraction over the trend window.
    pub accuracy: f64,
    /// Mean of expected/actual solve time over successful attempts, capped at 1.
    pub efficiency: f64,
    pub days_since_progress: Option<f64>,
    pub attempt_count: usize,
}

impl PerformanceSnapshot {
    /// `recent` is the trend window of attempts, any order.
    pub fn from_attempts(
        recent: &[Attempt],
        last_progress_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if recent.is_empty() {
            return PerformanceSnapshot {
                days_since_progress: last_progress_at.map(|t| days_between(t, now)),
                ..Default::default()
            };
        }

        let successes: Vec<&Attempt> = recent.iter().filter(|a| a.success).collect();
        let accuracy = successes.len() as f64 / recent.len() as f64;
        let efficiency = if successes.is_empty() {
            0.0
        } else {
            successes
                .iter()
                .map(|a| {
                    if a.time_minutes > 0.0 {
                        (expected_minutes(a.difficulty) / a.time_minutes).min(1.0)
                    } else {
                        1.0
                    }
                })
                .sum::<f64>()
                / successes.len() as f64
        };

        PerformanceSnapshot {
            accuracy,
            efficiency,
            days_since_progress: last_progress_at.map(|t| days_between(t, now)),
            attempt_count: recent.len(),
        }
    }
}

pub struct FocusInputs<'a> {
    /// System recommendations, best first.
    pub recommendations: &'a [String],
    pub completed_sessions: u32,
    pub performance: PerformanceSnapshot,
    pub user_preferences: &'a [String],
    /// Tags a user preference may name at the current tier.
    pub valid_tags: &'a HashSet<String>,
}

fn classify(inputs: &FocusInputs<'_>, config: &FocusConfig) -> (PerformanceLevel, usize) {
    let perf = &inputs.performance;
    if inputs.completed_sessions < config.onboarding_sessions {
        return (PerformanceLevel::Onboarding, 1);
    }
    if perf.accuracy >= config.excellent_accuracy && perf.efficiency >= config.excellent_efficiency {
        return (PerformanceLevel::Excellent, config.max_focus_tags);
    }
    let stagnant = perf.attempt_count > 0
        && perf
            .days_since_progress
            .map(|d| d >= config.stagnation_days as f64)
            .unwrap_or(false);
    if stagnant {
        return (PerformanceLevel::Stagnant, config.stagnation_tags);
    }
    if perf.accuracy >= config.good_accuracy || perf.efficiency >= config.good_efficiency {
        return (PerformanceLevel::Good, 2);
    }
    (PerformanceLevel::Developing, 1)
}

/// Pure focus decision. The algorithm fixes the count; user preferences only
/// reorder, and are ignored entirely during onboarding.
pub fn decide(inputs: &FocusInputs<'_>, config: &FocusConfig) -> FocusDecision {
    if inputs.recommendations.is_empty() {
        debug!("[Focus] No recommendations available, using failsafe");
        return FocusDecision {
            user_preferences: inputs.user_preferences.to_vec(),
            ..FocusDecision::failsafe()
        };
    }

    let (level, wanted) = classify(inputs, config);
    let count = wanted
        .min(config.max_focus_tags.max(1))
        .min(inputs.recommendations.len())
        .max(1);
    let algorithm_tags: Vec<String> = inputs.recommendations[..count].to_vec();

    let mut active: Vec<String> = Vec::with_capacity(count);
    let mut applied: Vec<&str> = Vec::new();
    if level != PerformanceLevel::Onboarding {
        for pref in inputs.user_preferences {
            if active.len() == count {
                break;
            }
            if inputs.valid_tags.contains(pref) && !active.contains(pref) {
                active.push(pref.clone());
                applied.push(pref);
            }
        }
    }
    for tag in inputs.recommendations {
        if active.len() == count {
            break;
        }
        if !active.contains(tag) {
            active.push(tag.clone());
        }
    }

    let perf = &inputs.performance;
    let mut reasoning = format!(
        "{} focus tag(s) at {} performance (accuracy {:.0}%, efficiency {:.0}%, {} completed sessions)",
        count,
        level.as_str(),
        perf.accuracy * 100.0,
        perf.efficiency * 100.0,
        inputs.completed_sessions
    );
    if !applied.is_empty() {
        reasoning.push_str(&format!("; user preferences first: {}", applied.join(", ")));
    } else if level == PerformanceLevel::Onboarding && !inputs.user_preferences.is_empty() {
        reasoning.push_str("; preferences apply after onboarding");
    }

    debug!(
        "[Focus] Level {:?}, count {}, active {:?} (algorithm {:?})",
        level, count, active, algorithm_tags
    );

    FocusDecision {
        active_tags: active,
        algorithm_tags,
        user_preferences: inputs.user_preferences.to_vec(),
        reasoning,
        performance_level: level,
    }
}
