// src/pedagogy.rs
// The Scheduler facade: the one entry point callers use

use crate::attribution::{AttemptReceipt, AttributionEngine};
use crate::catalog::{Catalog, CatalogProblem};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::limits::{self, TimeLimits};
use crate::models::{AttemptInput, FocusDecision, Session, SessionType, TagMastery};
use crate::planner::Planner;
use crate::repository::Repository;
use crate::resilience::ResilienceLayer;
use crate::sessions::SessionManager;
use crate::settings::SettingsProvider;
use crate::store::Store;
use crate::summary::{self, SessionSummary};
use crate::sweep::{StalledSession, SweepAction, Sweeper};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Scheduler {
    repo: Repository,
    catalog: Arc<Catalog>,
    settings: Arc<dyn SettingsProvider>,
    config: Arc<SchedulerConfig>,
    planner: Planner,
    sessions: Arc<SessionManager>,
    attribution: AttributionEngine,
    sweeper: Sweeper,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Catalog,
        settings: Arc<dyn SettingsProvider>,
        config: SchedulerConfig,
    ) -> Self {
        let config = Arc::new(config);
        let catalog = Arc::new(catalog);
        let repo = Repository::new(store, ResilienceLayer::new(config.resilience.clone()));
        let planner = Planner::new(repo.clone(), catalog.clone(), settings.clone(), config.clone());
        let attribution_lock = Arc::new(Mutex::new(()));
        let sessions = Arc::new(SessionManager::new(
            repo.clone(),
            planner.clone(),
            config.clone(),
            attribution_lock.clone(),
        ));
        let attribution = AttributionEngine::new(
            repo.clone(),
            catalog.clone(),
            planner.clone(),
            sessions.clone(),
            config.clone(),
            attribution_lock.clone(),
        );
        let sweeper = Sweeper::new(repo.clone(), planner.clone(), config.clone(), attribution_lock);

        info!(
            "Scheduler ready: {} problems, {} tags",
            catalog.problems().len(),
            catalog.tags().count()
        );
        Scheduler {
            repo,
            catalog,
            settings,
            config,
            planner,
            sessions,
            attribution,
            sweeper,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // --- Sessions ---

    pub async fn get_or_create_session(&self, session_type: SessionType) -> Result<Session> {
        self.get_or_create_session_at(session_type, Utc::now()).await
    }

    pub async fn get_or_create_session_at(&self, session_type: SessionType, now: DateTime<Utc>) -> Result<Session> {
        self.sessions.get_or_create(session_type, now).await
    }

    pub async fn session(&self, id: &str) -> Result<Session> {
        self.repo
            .session(id)
            .await?
            .ok_or_else(|| SchedulerError::SessionNotFound(id.to_string()))
    }

    /// Record an attempt. The attempt's own timestamp (or now) drives every
    /// time-based decision.
    pub async fn record_attempt(&self, input: AttemptInput) -> Result<AttemptReceipt> {
        self.attribution.record(input).await
    }

    pub async fn summarize_session_performance(&self, session: &Session) -> Result<SessionSummary> {
        let history = self.repo.attempts().await?;
        Ok(summary::summarize(session, &history, &self.config.mastery))
    }

    // --- Focus & problems ---

    /// Never fails: any error yields the failsafe decision.
    pub async fn get_focus_decision(&self, user_id: &str) -> FocusDecision {
        self.get_focus_decision_at(user_id, Utc::now()).await
    }

    pub async fn get_focus_decision_at(&self, user_id: &str, now: DateTime<Utc>) -> FocusDecision {
        debug!("[Focus] Decision requested for {}", user_id);
        self.planner.focus_decision_or_failsafe(now).await
    }

    pub async fn fetch_additional_problems(
        &self,
        count: usize,
        exclude_ids: &[i64],
        user_focus_areas: &[String],
    ) -> Result<Vec<CatalogProblem>> {
        self.planner
            .fetch_additional(count, exclude_ids, user_focus_areas, Utc::now())
            .await
    }

    pub async fn recalculate_mastery(&self) -> Result<Vec<TagMastery>> {
        self.recalculate_mastery_at(Utc::now()).await
    }

    pub async fn recalculate_mastery_at(&self, now: DateTime<Utc>) -> Result<Vec<TagMastery>> {
        self.planner.recompute_mastery(now).await
    }

    pub async fn get_limits(&self, problem_id: i64) -> Result<TimeLimits> {
        let problem = self
            .catalog
            .problem(problem_id)
            .ok_or_else(|| SchedulerError::ProblemNotFound(problem_id.to_string()))?;
        let mode = match self.settings.load().await {
            Ok(s) => s.limit_mode,
            Err(e) => {
                warn!("[Limits] Settings unavailable, using defaults: {}", e);
                Default::default()
            }
        };
        let solve_times: Vec<f64> = self
            .repo
            .attempts()
            .await?
            .into_iter()
            .filter(|a| a.success && a.difficulty == problem.difficulty)
            .map(|a| a.time_minutes)
            .collect();
        Ok(limits::compute_limits(problem.id, problem.difficulty, mode, &solve_times))
    }

    // --- Maintenance ---

    pub async fn detect_stalled_sessions(&self) -> Result<Vec<StalledSession>> {
        self.detect_stalled_sessions_at(Utc::now()).await
    }

    pub async fn detect_stalled_sessions_at(&self, now: DateTime<Utc>) -> Result<Vec<StalledSession>> {
        self.sweeper.detect(now).await
    }

    pub async fn run_cleanup_sweep(&self) -> Result<Vec<SweepAction>> {
        self.run_cleanup_sweep_at(Utc::now()).await
    }

    pub async fn run_cleanup_sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<SweepAction>> {
        self.sweeper.run(now).await
    }

    /// Cancel pending retries. Later calls fail with `Cancelled`.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.repo.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitMode;
    use crate::models::{Difficulty, SessionOrigin};
    use crate::settings::{StaticSettings, UserSettings};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn scheduler_with(settings: UserSettings) -> Scheduler {
        let mut config = SchedulerConfig::default();
        config.session.creation_cooldown_ms = 0;
        Scheduler::new(
            Arc::new(MemoryStore::new()),
            Catalog::builtin().unwrap(),
            Arc::new(StaticSettings::new(settings)),
            config,
        )
    }

    fn attempt(problem_id: i64, success: bool, minutes: f64, at: DateTime<Utc>) -> AttemptInput {
        AttemptInput {
            problem_id: Some(problem_id),
            slug: None,
            success,
            time_minutes: minutes,
            timestamp: Some(at),
            perceived_difficulty: None,
        }
    }

    #[tokio::test]
    async fn test_limits_standard_and_unknown() {
        let scheduler = scheduler_with(UserSettings::default());
        let limits = scheduler.get_limits(1).await.unwrap();
        assert_eq!(limits.mode, LimitMode::Standard);
        assert!(!limits.is_adaptive);

        let err = scheduler.get_limits(999_999).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ProblemNotFound(_)));
    }

    #[tokio::test]
    async fn test_limits_adapt_to_solve_history() {
        let scheduler = scheduler_with(UserSettings {
            limit_mode: LimitMode::Adaptive,
            ..UserSettings::default()
        });
        let easy: Vec<i64> = scheduler
            .catalog()
            .problems()
            .iter()
            .filter(|p| p.difficulty == Difficulty::Easy)
            .map(|p| p.id)
            .take(5)
            .collect();
        assert_eq!(easy.len(), 5);

        let t0 = Utc::now() - Duration::hours(1);
        for (i, id) in easy.iter().enumerate() {
            scheduler
                .record_attempt(attempt(*id, true, 8.0, t0 + Duration::minutes(i as i64)))
                .await
                .unwrap();
        }
        let limits = scheduler.get_limits(easy[0]).await.unwrap();
        assert!(limits.is_adaptive);
        assert!((limits.recommended_minutes - 8.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_focus_decision_never_fails_after_shutdown() {
        let scheduler = scheduler_with(UserSettings::default());
        scheduler.shutdown();
        let decision = scheduler.get_focus_decision("user").await;
        assert!(!decision.active_tags.is_empty());
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let scheduler = scheduler_with(UserSettings::default());
        let err = scheduler.session("nope").await.unwrap_err();
        assert!(matches!(err, SchedulerError::SessionNotFound(_)));

        let guided = scheduler.get_or_create_session(SessionType::Standard).await.unwrap();
        let loaded = scheduler.session(&guided.id).await.unwrap();
        assert_eq!(loaded.origin, SessionOrigin::Guided);
        assert!(!loaded.problems.is_empty());
    }

    #[tokio::test]
    async fn test_summary_counts_session_attempts() {
        let scheduler = scheduler_with(UserSettings::default());
        let now = Utc::now();
        let receipt = scheduler.record_attempt(attempt(1, true, 12.0, now)).await.unwrap();
        let session = scheduler.session(&receipt.session_id).await.unwrap();
        let summary = scheduler.summarize_session_performance(&session).await.unwrap();
        assert_eq!(summary.total_attempts, 1);
        assert_eq!(summary.successful_attempts, 1);
        assert!((summary.accuracy - 1.0).abs() < 1e-9);
    }
}
