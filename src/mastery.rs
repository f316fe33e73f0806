// src/mastery.rs
// Tag mastery aggregation, difficulty allowance and tier progression

use crate::catalog::Catalog;
use crate::config::{MasteryConfig, SchedulerConfig};
use crate::decay::{days_between, decay_score};
use crate::index::RelationshipIndex;
use crate::ladder::build_tag_ladder;
use crate::models::{DifficultyAllowance, TagMastery, Tier};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Difficulty weights for a tag. Thin history gets the conservative default
/// whatever its success rate says.
pub fn difficulty_allowance(
    total_attempts: u32,
    recent_success_rate: f64,
    mastered: bool,
    config: &MasteryConfig,
) -> DifficultyAllowance {
    if total_attempts < config.allowance_min_attempts {
        return DifficultyAllowance::CONSERVATIVE;
    }
    let medium = if recent_success_rate >= config.medium_threshold {
        1.0
    } else {
        0.0
    };
    let hard = if recent_success_rate < config.hard_threshold {
        0.0
    } else if mastered {
        1.0
    } else {
        config.hard_partial_weight
    };
    DifficultyAllowance {
        easy: 1.0,
        medium,
        hard,
    }
}

pub fn is_mastered(total: u32, success_rate: f64, config: &MasteryConfig) -> bool {
    total >= config.min_attempts && success_rate >= config.min_success_rate
}

fn compute_tag(
    index: &RelationshipIndex<'_>,
    tag: &str,
    tier: Tier,
    prior: Option<&TagMastery>,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> TagMastery {
    let attempts = index.attempts_for_tag(tag);
    let total = attempts.len() as u32;
    let successful = attempts.iter().filter(|a| a.success).count() as u32;
    let success_rate = if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    };

    let window = config.mastery.trend_window.max(1);
    let recent = &attempts[attempts.len().saturating_sub(window)..];
    let recent_success_rate = if recent.is_empty() {
        0.0
    } else {
        recent.iter().filter(|a| a.success).count() as f64 / recent.len() as f64
    };

    let mastered = is_mastered(total, success_rate, &config.mastery);
    let mastered_at = match (mastered, prior.and_then(|p| p.mastered_at)) {
        (true, Some(at)) => Some(at),
        (true, None) => Some(now),
        (false, _) => None,
    };

    let last_attempt_at = attempts.last().map(|a| a.timestamp);

    // Tag stability is the mean over the attempted problems carrying the tag.
    let problem_ids: HashSet<i64> = attempts.iter().map(|a| a.problem_id).collect();
    let stabilities: Vec<f64> = problem_ids
        .iter()
        .filter_map(|id| index.problem_state(*id))
        .map(|p| p.stability)
        .collect();
    let stability = if stabilities.is_empty() {
        config.decay.default_stability
    } else {
        stabilities.iter().sum::<f64>() / stabilities.len() as f64
    };
    let score = match last_attempt_at {
        Some(last) => decay_score(
            success_rate,
            days_between(last, now),
            stability,
            config.decay.retention_floor,
        ),
        None => 0.0,
    };

    let allowance = difficulty_allowance(total, recent_success_rate, mastered, &config.mastery);
    let ladder = build_tag_ladder(index, tag, &allowance, config.mastery.ladder_size);

    TagMastery {
        tag: tag.to_string(),
        tier,
        total_attempts: total,
        successful_attempts: successful,
        recent_success_rate,
        decay_score: score,
        mastered,
        mastered_at,
        last_attempt_at,
        allowance,
        ladder,
    }
}

/// Recompute every tag in the catalog graph from the full attempt history.
pub fn recompute_all(
    index: &RelationshipIndex<'_>,
    prior: &HashMap<String, TagMastery>,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Vec<TagMastery> {
    let masteries: Vec<TagMastery> = index
        .catalog()
        .tags()
        .map(|node| compute_tag(index, &node.name, node.tier, prior.get(&node.name), now, config))
        .collect();

    for m in masteries.iter().filter(|m| m.total_attempts > 0) {
        debug!(
            "[Mastery] Tag '{}': {}/{} (recent {:.2}), mastered {}, allowance E{} M{} H{}",
            m.tag,
            m.successful_attempts,
            m.total_attempts,
            m.recent_success_rate,
            m.mastered,
            m.allowance.easy,
            m.allowance.medium,
            m.allowance.hard
        );
    }
    masteries
}

/// Whether the new records show progress over the previous ones: a newly
/// mastered tag or an improved success rate.
pub fn mastery_progressed(prior: &HashMap<String, TagMastery>, current: &[TagMastery]) -> bool {
    current.iter().any(|m| match prior.get(&m.tag) {
        Some(old) => {
            (m.mastered && !old.mastered)
                || (m.total_attempts > old.total_attempts && m.success_rate() > old.success_rate())
        }
        None => m.mastered || m.successful_attempts > 0,
    })
}

/// True once enough of the tier's tags are mastered to move to the next tier.
pub fn graduation_ready(
    catalog: &Catalog,
    masteries: &HashMap<String, TagMastery>,
    tier: Tier,
    fraction: f64,
) -> bool {
    if tier.next().is_none() {
        return false;
    }
    let tags = catalog.tags_in_tier(tier);
    if tags.is_empty() {
        return false;
    }
    let mastered = tags
        .iter()
        .filter(|t| masteries.get(&t.name).map(|m| m.mastered).unwrap_or(false))
        .count();
    let ready = mastered as f64 / tags.len() as f64 >= fraction;
    if ready {
        info!(
            "[Mastery] Tier {} ready to graduate ({}/{} tags mastered)",
            tier,
            mastered,
            tags.len()
        );
    }
    ready
}

fn mastery_gap(m: Option<&TagMastery>, config: &MasteryConfig) -> f64 {
    let Some(m) = m else { return 1.0 };
    let volume = (m.total_attempts as f64 / config.min_attempts.max(1) as f64).min(1.0);
    let accuracy = if config.min_success_rate > 0.0 {
        (m.success_rate() / config.min_success_rate).min(1.0)
    } else {
        1.0
    };
    1.0 - volume * accuracy
}

/// System tag recommendations for the current tier.
///
/// Unmastered tags at or below the tier come first, lower tiers before higher
/// ones, smallest mastery gap first. Mastered tags follow, most decayed first.
pub fn recommend_tags(
    catalog: &Catalog,
    masteries: &HashMap<String, TagMastery>,
    current_tier: Tier,
    config: &MasteryConfig,
) -> Vec<String> {
    let allowed = current_tier.allowed();
    let mut unmastered: Vec<(&str, Tier, f64)> = Vec::new();
    let mut mastered: Vec<(&str, f64)> = Vec::new();

    for node in catalog.tags().filter(|t| allowed.contains(&t.tier)) {
        let record = masteries.get(&node.name);
        match record {
            Some(m) if m.mastered => mastered.push((node.name.as_str(), m.decay_score)),
            _ => unmastered.push((node.name.as_str(), node.tier, mastery_gap(record, config))),
        }
    }

    unmastered.sort_by(|a, b| {
        a.1.rank()
            .cmp(&b.1.rank())
            .then(a.2.total_cmp(&b.2))
            .then(a.0.cmp(b.0))
    });
    mastered.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));

    unmastered
        .into_iter()
        .map(|(name, _, _)| name.to_string())
        .chain(mastered.into_iter().map(|(name, _)| name.to_string()))
        .collect()
}
