// src/decay.rs
// Leitner box, stability and decay-score model for individual problems

use crate::catalog::CatalogProblem;
use crate::config::DecayConfig;
use crate::constants::*;
use crate::models::{AttemptStats, Problem};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::cmp::Ordering;

/// Fresh review state for a problem that has never been attempted.
pub fn new_problem(source: &CatalogProblem, config: &DecayConfig) -> Problem {
    Problem {
        id: source.id,
        slug: source.slug.clone(),
        title: source.title.clone(),
        difficulty: source.difficulty,
        tags: source.tags.clone(),
        box_level: BOX_MIN,
        stability: config.default_stability,
        consecutive_failures: 0,
        stats: AttemptStats::default(),
        last_attempt_at: None,
        next_review_at: None,
    }
}

/// Days in the review interval of a Leitner box.
pub fn review_interval_days(box_level: u32) -> i64 {
    let idx = (box_level.max(BOX_MIN) as usize - 1).min(BOX_INTERVAL_DAYS.len() - 1);
    BOX_INTERVAL_DAYS[idx]
}

/// Apply one attempt outcome and return the updated problem.
pub fn apply_attempt(
    problem: &Problem,
    success: bool,
    at: DateTime<Utc>,
    config: &DecayConfig,
) -> Problem {
    let mut next = problem.clone();
    let stability = problem.stability.max(0.0);

    next.stats.total += 1;
    if success {
        next.stats.successful += 1;
        next.stability = stability * config.growth_factor + config.growth_offset;
        next.box_level = (problem.box_level.max(BOX_MIN) + 1).min(config.max_box.max(BOX_MIN));
        next.consecutive_failures = 0;
    } else {
        next.stats.unsuccessful += 1;
        next.stability = stability * config.decay_factor;
        next.consecutive_failures = problem.consecutive_failures + 1;
        next.box_level = if next.consecutive_failures >= config.failure_reset_threshold {
            BOX_MIN
        } else {
            problem.box_level.saturating_sub(1).max(BOX_MIN)
        };
    }

    next.last_attempt_at = Some(at);
    next.next_review_at = Some(at + Duration::days(review_interval_days(next.box_level)));

    debug!(
        "[Decay] Problem {}: success={}, box {} -> {}, stability {:.2} -> {:.2}, failures {}",
        problem.id,
        success,
        problem.box_level,
        next.box_level,
        problem.stability,
        next.stability,
        next.consecutive_failures
    );
    next
}

pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / DAY_SECONDS as f64
}

/// Re-practice priority: higher means more urgent.
///
/// `weight × days / (1 + e^(−days / stability))`, where the weight is
/// `1 − success_rate` floored at `retention_floor` so that elapsed time
/// alone still raises the score of a perfectly solved problem.
pub fn decay_score(
    success_rate: f64,
    days_since_last: f64,
    stability: f64,
    retention_floor: f64,
) -> f64 {
    let days = days_since_last.max(0.0);
    let stability = stability.max(STABILITY_SCORE_FLOOR);
    let weight = (1.0 - success_rate.clamp(0.0, 1.0)).max(retention_floor.max(0.0));
    weight * (days / (1.0 + (-days / stability).exp()))
}

pub fn problem_decay_score(problem: &Problem, now: DateTime<Utc>, config: &DecayConfig) -> f64 {
    match problem.last_attempt_at {
        Some(last) => decay_score(
            problem.stats.success_rate(),
            days_between(last, now),
            problem.stability,
            config.retention_floor,
        ),
        None => 0.0,
    }
}

/// Previously attempted problems whose review date has passed, most decayed first.
pub fn due_reviews<'a>(
    problems: &'a [Problem],
    now: DateTime<Utc>,
    limit: usize,
    config: &DecayConfig,
) -> Vec<&'a Problem> {
    let mut due: Vec<(&Problem, f64)> = problems
        .iter()
        .filter(|p| p.stats.total > 0 && p.is_due(now))
        .map(|p| (p, problem_decay_score(p, now, config)))
        .collect();
    due.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.id.cmp(&b.0.id))
    });
    due.into_iter().take(limit).map(|(p, _)| p).collect()
}
