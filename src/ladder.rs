// src/ladder.rs
// Pattern ladder: turns focus tags into concrete candidate problems

use crate::catalog::{Catalog, CatalogProblem};
use crate::config::LadderConfig;
use crate::index::RelationshipIndex;
use crate::models::{DifficultyAllowance, SelectionReason, TagMastery};
use log::debug;
use std::collections::{HashMap, HashSet};

/// One problem chosen for a session, with the pass that chose it.
#[derive(Debug, Clone, PartialEq)]
pub struct LadderPick<'a> {
    pub problem: &'a CatalogProblem,
    pub reason: SelectionReason,
}

/// Tags a problem may carry when drawn for `focus_tag`: the focus tag's own
/// tier and every tier below it.
pub fn allowed_for_tag(catalog: &Catalog, focus_tag: &str) -> HashSet<String> {
    catalog.allowed_tags(catalog.gating_tier(focus_tag))
}

/// Rank up to `count` problems for `focus_tag`.
///
/// A short (or empty) result means the pool is exhausted under the given
/// constraints; nothing is relaxed to fill it.
pub fn select_candidates<'a>(
    pool: &[&'a CatalogProblem],
    focus_tag: &str,
    count: usize,
    allowance: &DifficultyAllowance,
    allowed_tags: &HashSet<String>,
    exclude: &HashSet<i64>,
) -> Vec<&'a CatalogProblem> {
    let mut candidates: Vec<&CatalogProblem> = pool
        .iter()
        .copied()
        .filter(|p| !exclude.contains(&p.id))
        .filter(|p| p.has_tag(focus_tag))
        .filter(|p| p.tags.iter().all(|t| allowed_tags.contains(t)))
        .filter(|p| allowance.permits(p.difficulty))
        .collect();

    // Stable sort keeps catalog order among equals.
    candidates.sort_by(|a, b| {
        a.difficulty.cmp(&b.difficulty).then_with(|| {
            allowance
                .weight(b.difficulty)
                .total_cmp(&allowance.weight(a.difficulty))
        })
    });
    candidates.truncate(count);

    debug!(
        "[Ladder] Tag '{}': {} of {} requested (pool {})",
        focus_tag,
        candidates.len(),
        count,
        pool.len()
    );
    candidates
}

/// The ranked ladder stored on a tag's mastery record. Problems already
/// solved are left out so the ladder points at new material.
pub fn build_tag_ladder(
    index: &RelationshipIndex<'_>,
    tag: &str,
    allowance: &DifficultyAllowance,
    size: usize,
) -> Vec<i64> {
    let solved: HashSet<i64> = index
        .attempts_for_tag(tag)
        .into_iter()
        .filter(|a| a.success)
        .map(|a| a.problem_id)
        .collect();
    let allowed = allowed_for_tag(index.catalog(), tag);
    select_candidates(
        &index.candidates_for_tag(tag),
        tag,
        size,
        allowance,
        &allowed,
        &solved,
    )
    .into_iter()
    .map(|p| p.id)
    .collect()
}

/// Number of slots the primary focus tag receives out of `total`.
pub fn primary_slots(total: usize, focus_count: usize, config: &LadderConfig) -> usize {
    if total == 0 {
        return 0;
    }
    if focus_count <= 1 {
        return total;
    }
    ((total as f64 * config.primary_share).round() as usize).clamp(1, total)
}

/// Build a next-session problem set: deep practice on the first focus tag,
/// the remainder from the second.
pub fn build_session_set<'a>(
    index: &RelationshipIndex<'a>,
    focus_tags: &[String],
    total: usize,
    masteries: &HashMap<String, TagMastery>,
    exclude: &HashSet<i64>,
    config: &LadderConfig,
) -> Vec<LadderPick<'a>> {
    let mut picks: Vec<LadderPick<'a>> = Vec::new();
    let Some(primary) = focus_tags.first() else {
        return picks;
    };
    if focus_tags.len() > 2 {
        debug!("[Ladder] Ignoring focus tags beyond the first two: {:?}", &focus_tags[2..]);
    }
    let mut used: HashSet<i64> = exclude.clone();

    let mut run_pass = |tag: &str, want: usize, reason: SelectionReason, picks: &mut Vec<LadderPick<'a>>| {
        if want == 0 {
            return;
        }
        let allowance = masteries
            .get(tag)
            .map(|m| m.allowance)
            .unwrap_or(DifficultyAllowance::CONSERVATIVE);
        let allowed = allowed_for_tag(index.catalog(), tag);
        for problem in select_candidates(
            &index.candidates_for_tag(tag),
            tag,
            want,
            &allowance,
            &allowed,
            &used,
        ) {
            used.insert(problem.id);
            picks.push(LadderPick { problem, reason });
        }
    };

    let primary_want = primary_slots(total, focus_tags.len(), config);
    run_pass(primary, primary_want, SelectionReason::PrimaryFocus, &mut picks);

    if let Some(expansion) = focus_tags.get(1) {
        let remaining = total.saturating_sub(picks.len());
        run_pass(expansion, remaining, SelectionReason::Expansion, &mut picks);
    }

    debug!(
        "[Ladder] Session set for {:?}: {} of {} slots filled",
        focus_tags,
        picks.len(),
        total
    );
    picks
}
