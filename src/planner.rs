// src/planner.rs
// Recompute pipelines: mastery -> focus -> ladders, and guided session planning

use crate::catalog::{Catalog, CatalogProblem};
use crate::config::SchedulerConfig;
use crate::decay;
use crate::error::Result;
use crate::focus::{self, FocusInputs, PerformanceSnapshot};
use crate::index::RelationshipIndex;
use crate::ladder;
use crate::mastery;
use crate::models::{
    Attempt, FocusDecision, Problem, SchedulerState, SelectionReason, SessionProblem,
    SessionType, TagMastery,
};
use crate::repository::Repository;
use crate::settings::SettingsProvider;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

fn by_tag(masteries: Vec<TagMastery>) -> HashMap<String, TagMastery> {
    masteries.into_iter().map(|m| (m.tag.clone(), m)).collect()
}

fn slot_from_catalog(problem: &CatalogProblem, selection: SelectionReason) -> SessionProblem {
    SessionProblem {
        problem_id: problem.id,
        slug: problem.slug.clone(),
        title: problem.title.clone(),
        difficulty: problem.difficulty,
        tags: problem.tags.clone(),
        selection,
        outcome: None,
    }
}

fn slot_from_review(problem: &Problem) -> SessionProblem {
    SessionProblem {
        problem_id: problem.id,
        slug: problem.slug.clone(),
        title: problem.title.clone(),
        difficulty: problem.difficulty,
        tags: problem.tags.clone(),
        selection: SelectionReason::Review,
        outcome: None,
    }
}

#[derive(Clone)]
pub struct Planner {
    repo: Repository,
    catalog: Arc<Catalog>,
    settings: Arc<dyn SettingsProvider>,
    config: Arc<SchedulerConfig>,
    // Serializes every read-modify-write of SchedulerState. Taken after the
    // attribution lock when both are needed.
    state_lock: Arc<Mutex<()>>,
}

impl Planner {
    pub fn new(
        repo: Repository,
        catalog: Arc<Catalog>,
        settings: Arc<dyn SettingsProvider>,
        config: Arc<SchedulerConfig>,
    ) -> Self {
        Planner {
            repo,
            catalog,
            settings,
            config,
            state_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Recompute every TagMastery record (including its ladder) from the
    /// full attempt history and run the tier-progression check.
    pub async fn recompute_mastery(&self, now: DateTime<Utc>) -> Result<Vec<TagMastery>> {
        let _state = self.state_lock.lock().await;
        self.recompute_mastery_locked(now).await
    }

    async fn recompute_mastery_locked(&self, now: DateTime<Utc>) -> Result<Vec<TagMastery>> {
        let (problems, attempts, prior, mut state) = futures::try_join!(
            self.repo.problems(),
            self.repo.attempts(),
            self.repo.tag_masteries(),
            self.repo.state(),
        )?;
        let prior = by_tag(prior);
        let index = RelationshipIndex::build(&self.catalog, problems, attempts);
        let masteries = mastery::recompute_all(&index, &prior, now, &self.config);

        if state.last_mastery_progress_at.is_none() || mastery::mastery_progressed(&prior, &masteries) {
            state.last_mastery_progress_at = Some(now);
        }

        let newly_mastered: Vec<&str> = masteries
            .iter()
            .filter(|m| m.mastered && !prior.get(&m.tag).map(|p| p.mastered).unwrap_or(false))
            .map(|m| m.tag.as_str())
            .collect();
        if !newly_mastered.is_empty() {
            info!("[Mastery] Newly mastered: {:?}", newly_mastered);
        }

        if !state.pending_graduation {
            let lookup: HashMap<String, TagMastery> = by_tag(masteries.clone());
            state.pending_graduation = mastery::graduation_ready(
                &self.catalog,
                &lookup,
                state.current_tier,
                self.config.mastery.graduation_fraction,
            );
        }

        self.repo.save_masteries(&masteries, &state).await?;
        info!(
            "[Mastery] Recomputed {} tags ({} mastered, tier {})",
            masteries.len(),
            masteries.iter().filter(|m| m.mastered).count(),
            state.current_tier
        );
        Ok(masteries)
    }

    /// Advance the tier if the last recompute flagged it, refreshing mastery
    /// and preferences before any decision is made on stale data.
    async fn apply_graduation(&self, mut state: SchedulerState, now: DateTime<Utc>) -> Result<SchedulerState> {
        if !state.pending_graduation {
            return Ok(state);
        }
        match state.current_tier.next() {
            Some(next) => {
                info!("[Focus] Graduating from {} to {}", state.current_tier, next);
                state.current_tier = next;
            }
            None => debug!("[Focus] Already at the top tier"),
        }
        state.pending_graduation = false;
        self.repo.save_state(&state).await?;
        self.recompute_mastery_locked(now).await?;
        self.repo.state().await
    }

    pub async fn focus_decision(&self, now: DateTime<Utc>) -> Result<FocusDecision> {
        let state = {
            let _state = self.state_lock.lock().await;
            self.apply_graduation(self.repo.state().await?, now).await?
        };
        let (masteries, settings, attempts, completed) = futures::try_join!(
            self.repo.tag_masteries(),
            self.settings.load(),
            self.repo.attempts(),
            self.repo.completed_session_count(),
        )?;
        let masteries = by_tag(masteries);

        let recommendations = mastery::recommend_tags(
            &self.catalog,
            &masteries,
            state.current_tier,
            &self.config.mastery,
        );
        let recent = recent_window(attempts, self.config.mastery.trend_window);
        let performance =
            PerformanceSnapshot::from_attempts(&recent, state.last_mastery_progress_at, now);
        let valid = self.catalog.allowed_tags(state.current_tier);

        Ok(focus::decide(
            &FocusInputs {
                recommendations: &recommendations,
                completed_sessions: completed,
                performance,
                user_preferences: &settings.focus_areas,
                valid_tags: &valid,
            },
            &self.config.focus,
        ))
    }

    /// Never fails: any error yields the failsafe decision.
    pub async fn focus_decision_or_failsafe(&self, now: DateTime<Utc>) -> FocusDecision {
        match self.focus_decision(now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("[Focus] Decision failed ({}), using failsafe", e);
                FocusDecision::failsafe()
            }
        }
    }

    /// Full pipeline run when a session closes: mastery, then focus (ladders
    /// are rebuilt with the new allowances during the recompute). Returns the
    /// focus tags recorded as the new snapshot.
    pub async fn after_session_closed(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.recompute_mastery(now).await?;
        let decision = self.focus_decision_or_failsafe(now).await;
        let _state = self.state_lock.lock().await;
        let mut state = self.repo.state().await?;
        state.last_focus = decision.active_tags.clone();
        self.repo.save_state(&state).await?;
        debug!("[Focus] Snapshot after close: {:?}", state.last_focus);
        Ok(decision.active_tags)
    }

    /// Compose the slots of a new guided session: due reviews first, then new
    /// material from the focus ladder, then (if still short) previously seen
    /// problems from the same ladder.
    pub async fn plan_guided(&self, session_type: SessionType, now: DateTime<Utc>) -> Result<Vec<SessionProblem>> {
        let settings = self.settings.load().await?;
        let length = settings
            .session_length
            .unwrap_or(self.config.session.guided_length)
            .max(1);
        let decision = self.focus_decision_or_failsafe(now).await;

        let (problems, attempts, masteries) = futures::try_join!(
            self.repo.problems(),
            self.repo.attempts(),
            self.repo.tag_masteries(),
        )?;
        let masteries = by_tag(masteries);

        let review_slots = match session_type {
            SessionType::Review => length,
            SessionType::Standard => {
                (length as f64 * self.config.session.review_share).round() as usize
            }
        };
        let mut slots: Vec<SessionProblem> =
            decay::due_reviews(&problems, now, review_slots, &self.config.decay)
                .into_iter()
                .map(slot_from_review)
                .collect();

        let index = RelationshipIndex::build(&self.catalog, problems, attempts);
        let mut chosen: HashSet<i64> = slots.iter().map(|s| s.problem_id).collect();

        let discovery_exclude: HashSet<i64> = chosen.union(&index.attempted_ids()).copied().collect();
        let picks = ladder::build_session_set(
            &index,
            &decision.active_tags,
            length.saturating_sub(slots.len()),
            &masteries,
            &discovery_exclude,
            &self.config.ladder,
        );
        for pick in picks {
            chosen.insert(pick.problem.id);
            slots.push(slot_from_catalog(pick.problem, pick.reason));
        }

        if slots.len() < length {
            let cram = ladder::build_session_set(
                &index,
                &decision.active_tags,
                length - slots.len(),
                &masteries,
                &chosen,
                &self.config.ladder,
            );
            if !cram.is_empty() {
                debug!("[Planner] No new material left, repeating {} seen problem(s)", cram.len());
            }
            for pick in cram {
                slots.push(slot_from_catalog(pick.problem, pick.reason));
            }
        }

        info!(
            "[Planner] {:?} session planned: {} slot(s) for focus {:?}",
            session_type,
            slots.len(),
            decision.active_tags
        );
        Ok(slots)
    }

    /// Extra problems beyond the planned session. Valid user focus areas lead,
    /// then the active focus tags.
    pub async fn fetch_additional(
        &self,
        count: usize,
        exclude_ids: &[i64],
        user_focus_areas: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<CatalogProblem>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let decision = self.focus_decision_or_failsafe(now).await;
        let (state, masteries, attempts) = futures::try_join!(
            self.repo.state(),
            self.repo.tag_masteries(),
            self.repo.attempts(),
        )?;
        let masteries = by_tag(masteries);
        let valid = self.catalog.allowed_tags(state.current_tier);

        let mut tags: Vec<&String> = Vec::new();
        for tag in user_focus_areas
            .iter()
            .filter(|t| valid.contains(*t))
            .chain(decision.active_tags.iter())
        {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let index = RelationshipIndex::build(&self.catalog, Vec::new(), attempts);
        let mut exclude: HashSet<i64> = exclude_ids.iter().copied().collect();
        let mut out: Vec<CatalogProblem> = Vec::new();
        for tag in tags {
            if out.len() >= count {
                break;
            }
            let allowance = masteries
                .get(tag.as_str())
                .map(|m| m.allowance)
                .unwrap_or_default();
            let allowed = ladder::allowed_for_tag(&self.catalog, tag);
            for p in ladder::select_candidates(
                &index.candidates_for_tag(tag),
                tag,
                count - out.len(),
                &allowance,
                &allowed,
                &exclude,
            ) {
                exclude.insert(p.id);
                out.push(p.clone());
            }
        }
        debug!("[Planner] Additional problems: {} of {} requested", out.len(), count);
        Ok(out)
    }
}

/// The last `window` attempts by timestamp.
pub fn recent_window(mut attempts: Vec<Attempt>, window: usize) -> Vec<Attempt> {
    attempts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let start = attempts.len().saturating_sub(window.max(1));
    attempts.split_off(start)
}
