// src/attribution.rs
// Routes each attempt to the session that owns it and drives session
// completion and tracking-session rotation.

use crate::catalog::Catalog;
use crate::config::{SchedulerConfig, SessionConfig};
use crate::decay;
use crate::error::{Result, SchedulerError};
use crate::models::{
    Attempt, AttemptInput, CloseReason, RotationReason, Session, SessionOrigin, SessionStatus,
    SlotOutcome,
};
use crate::planner::Planner;
use crate::repository::Repository;
use crate::sessions::SessionManager;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What happened to the owning session as a result of the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    Attached,
    /// Every scheduled problem of the guided session now has an attempt.
    Completed { focus: Vec<String> },
    /// The previous tracking session was closed before this attempt.
    Rotated {
        closed_session_id: String,
        reason: RotationReason,
        focus: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReceipt {
    pub attempt_id: String,
    pub session_id: String,
    pub origin: SessionOrigin,
    pub problem_id: i64,
    pub success: bool,
    pub box_level: u32,
    pub stability: f64,
    pub next_review_at: Option<DateTime<Utc>>,
    pub outcome: SessionOutcome,
}

/// Why `session` must be closed before it may take an attempt on a problem
/// tagged `incoming_tags`, if it must.
pub fn rotation_reason(
    session: &Session,
    incoming_tags: &[String],
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Option<RotationReason> {
    if session.attempts.is_empty() {
        return None;
    }
    if now - session.last_activity_at >= Duration::minutes(config.inactivity_minutes) {
        return Some(RotationReason::Inactivity);
    }
    if session.attempts.len() >= config.tracking_soft_cap {
        return Some(RotationReason::SoftCap);
    }
    if now.date_naive() != session.created_at.date_naive() {
        return Some(RotationReason::DayChanged);
    }
    let mut tags = session.distinct_tags();
    tags.extend(incoming_tags.iter().cloned());
    if tags.len() > config.max_distinct_tags {
        return Some(RotationReason::TopicDrift);
    }
    None
}

pub struct AttributionEngine {
    repo: Repository,
    catalog: Arc<Catalog>,
    planner: Planner,
    sessions: Arc<SessionManager>,
    config: Arc<SchedulerConfig>,
    // Shared with the sweep. Taken before the session-creation lock, never after.
    lock: Arc<Mutex<()>>,
}

impl AttributionEngine {
    pub fn new(
        repo: Repository,
        catalog: Arc<Catalog>,
        planner: Planner,
        sessions: Arc<SessionManager>,
        config: Arc<SchedulerConfig>,
        lock: Arc<Mutex<()>>,
    ) -> Self {
        AttributionEngine {
            repo,
            catalog,
            planner,
            sessions,
            config,
            lock,
        }
    }

    /// Live guided session that scheduled this problem; in-progress wins over draft.
    async fn guided_owner(&self, problem_id: i64, slug: &str) -> Result<Option<Session>> {
        let mut candidates: Vec<Session> = self
            .repo
            .live_sessions(SessionOrigin::Guided)
            .await?
            .into_iter()
            .filter(|s| s.is_scheduled(problem_id, slug))
            .collect();
        candidates.sort_by_key(|s| s.status != SessionStatus::InProgress);
        Ok(candidates.into_iter().next())
    }

    pub async fn record(&self, input: AttemptInput) -> Result<AttemptReceipt> {
        let now = input.timestamp.unwrap_or_else(Utc::now);
        let source = self
            .catalog
            .resolve(input.problem_id, input.slug.as_deref())
            .ok_or_else(|| SchedulerError::ProblemNotFound(input.describe()))?;
        let time_minutes = if input.time_minutes.is_finite() {
            input.time_minutes.max(0.0)
        } else {
            0.0
        };

        let _guard = self.lock.lock().await;
        info!(
            "[Attribution] Attempt on {} ({}), success={}",
            source.id, source.slug, input.success
        );

        let problem = match self.repo.problem(source.id).await? {
            Some(p) => p,
            None => decay::new_problem(source, &self.config.decay),
        };
        let updated = decay::apply_attempt(&problem, input.success, now, &self.config.decay);

        let mut attempt = Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            problem_id: source.id,
            problem_slug: source.slug.clone(),
            session_id: String::new(),
            success: input.success,
            time_minutes,
            timestamp: now,
            perceived_difficulty: input.perceived_difficulty,
            difficulty: source.difficulty,
            tags: source.tags.clone(),
        };

        let mut rotated: Option<(Session, RotationReason)> = None;
        let mut target = match self.guided_owner(source.id, &source.slug).await? {
            Some(mut guided) => {
                if guided.status == SessionStatus::Draft {
                    info!("[Attribution] Guided session {} started", guided.id);
                    guided.status = SessionStatus::InProgress;
                }
                guided
            }
            None => {
                let mut tracking = self.sessions.tracking_for_attempt(now).await?;
                match rotation_reason(&tracking, &source.tags, now, &self.config.session) {
                    Some(reason) => {
                        info!(
                            "[Attribution] Rotating tracking session {} ({:?}, {} attempts)",
                            tracking.id,
                            reason,
                            tracking.attempts.len()
                        );
                        // Closed and replacement sessions are stored with the attempt below.
                        tracking.close(SessionStatus::Completed, CloseReason::Rotated(reason), now);
                        let fresh = self.sessions.replacement_tracking(now).await;
                        tracking.metadata.rotated_into = Some(fresh.id.clone());
                        rotated = Some((tracking, reason));
                        fresh
                    }
                    None => tracking,
                }
            }
        };

        attempt.session_id = target.id.clone();
        target.attempts.push(attempt.clone());
        if now > target.last_activity_at {
            target.last_activity_at = now;
        }
        for slot in target
            .problems
            .iter_mut()
            .filter(|p| p.matches(source.id, &source.slug) && p.outcome.is_none())
        {
            slot.outcome = Some(SlotOutcome {
                attempt_id: attempt.id.clone(),
                success: attempt.success,
            });
        }

        let completed = target.origin == SessionOrigin::Guided && target.all_problems_attempted();
        if completed {
            target.close(SessionStatus::Completed, CloseReason::AllProblemsAttempted, now);
            info!("[Attribution] Guided session {} completed", target.id);
        }

        let mut touched: Vec<&Session> = vec![&target];
        if let Some((closed, _)) = &rotated {
            touched.push(closed);
        }
        self.repo.commit_attempt(&attempt, &updated, &touched).await?;
        debug!(
            "[Attribution] Attempt {} stored in {:?} session {}",
            attempt.id, target.origin, target.id
        );

        let outcome = if completed {
            let focus = self.close_pipeline(&mut target, now).await;
            SessionOutcome::Completed { focus }
        } else if let Some((mut closed, reason)) = rotated {
            let focus = self.close_pipeline(&mut closed, now).await;
            SessionOutcome::Rotated {
                closed_session_id: closed.id,
                reason,
                focus,
            }
        } else {
            SessionOutcome::Attached
        };

        Ok(AttemptReceipt {
            attempt_id: attempt.id,
            session_id: target.id,
            origin: target.origin,
            problem_id: source.id,
            success: input.success,
            box_level: updated.box_level,
            stability: updated.stability,
            next_review_at: updated.next_review_at,
            outcome,
        })
    }

    /// Mastery/focus pipeline for a session that just closed; records the focus
    /// snapshot on it. The attempt is already stored, so failures only log.
    async fn close_pipeline(&self, closed: &mut Session, now: DateTime<Utc>) -> Vec<String> {
        match self.planner.after_session_closed(now).await {
            Ok(focus) => {
                closed.metadata.focus_snapshot = focus.clone();
                if let Err(e) = self.repo.save_session(closed).await {
                    warn!("[Attribution] Could not store focus snapshot on {}: {}", closed.id, e);
                }
                focus
            }
            Err(e) => {
                warn!("[Attribution] Post-close pipeline failed for {}: {}", closed.id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::models::Difficulty;
    use crate::resilience::ResilienceLayer;
    use crate::settings::StaticSettings;
    use crate::store::{Collection, Index, MemoryStore, Store, StoreError, StoreErrorKind, StoreResult, Write};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn tracking_with(n: usize, tags: &[&str], at: DateTime<Utc>) -> Session {
        let mut s = Session::new_tracking(at);
        for i in 0..n {
            s.attempts.push(Attempt {
                id: format!("a{}", i),
                problem_id: i as i64,
                problem_slug: String::new(),
                session_id: s.id.clone(),
                success: true,
                time_minutes: 5.0,
                timestamp: at,
                perceived_difficulty: None,
                difficulty: Difficulty::Easy,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            });
        }
        s
    }

    fn noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_rotation_triggers() {
        let config = SessionConfig::default();
        let t0 = noon();
        let array = vec!["array".to_string()];

        let fresh = tracking_with(1, &["array"], t0);
        assert_eq!(rotation_reason(&fresh, &array, t0 + Duration::minutes(30), &config), None);
        assert_eq!(
            rotation_reason(&fresh, &array, t0 + Duration::hours(3), &config),
            Some(RotationReason::Inactivity)
        );

        let full = tracking_with(12, &["array"], t0);
        assert_eq!(
            rotation_reason(&full, &array, t0 + Duration::minutes(1), &config),
            Some(RotationReason::SoftCap)
        );

        let late = tracking_with(1, &["array"], t0 + Duration::hours(11) + Duration::minutes(30));
        assert_eq!(
            rotation_reason(&late, &array, t0 + Duration::hours(12) + Duration::minutes(30), &config),
            Some(RotationReason::DayChanged)
        );

        let broad = tracking_with(1, &["array", "stack", "string", "tree"], t0);
        assert_eq!(
            rotation_reason(&broad, &["graph".to_string()], t0, &config),
            Some(RotationReason::TopicDrift)
        );
        assert_eq!(rotation_reason(&broad, &array, t0, &config), None);
    }

    #[test]
    fn test_empty_session_never_rotates() {
        let config = SessionConfig::default();
        let s = Session::new_tracking(noon() - Duration::days(2));
        let tags: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        assert_eq!(rotation_reason(&s, &tags, noon(), &config), None);
    }

    #[test]
    fn test_receipt_outcome_serialization() {
        let outcome = SessionOutcome::Rotated {
            closed_session_id: "s1".into(),
            reason: RotationReason::SoftCap,
            focus: vec!["array".into()],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "rotated");
        assert_eq!(json["reason"], "soft_cap");
    }

    /// Rejects any commit carrying an attempt while `reject_attempts` is set.
    #[derive(Default)]
    struct AttemptRejectingStore {
        inner: MemoryStore,
        reject_attempts: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Store for AttemptRejectingStore {
        async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
            self.inner.get(collection, id).await
        }

        async fn scan(&self, collection: Collection) -> StoreResult<Vec<Value>> {
            self.inner.scan(collection).await
        }

        async fn find_by_index(&self, index: Index, key: &str) -> StoreResult<Vec<Value>> {
            self.inner.find_by_index(index, key).await
        }

        async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
            if self.reject_attempts.load(Ordering::SeqCst)
                && writes.iter().any(|w| w.collection == Collection::Attempts)
            {
                return Err(StoreError::new(StoreErrorKind::Constraint, "attempt rejected"));
            }
            self.inner.commit(writes).await
        }
    }

    fn engine(store: Arc<dyn Store>) -> (AttributionEngine, Repository) {
        let mut config = SchedulerConfig::default();
        config.session.creation_cooldown_ms = 0;
        let config = Arc::new(config);
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let repo = Repository::new(store, ResilienceLayer::new(ResilienceConfig::default()));
        let planner = Planner::new(
            repo.clone(),
            catalog.clone(),
            Arc::new(StaticSettings::default()),
            config.clone(),
        );
        let lock = Arc::new(Mutex::new(()));
        let sessions = Arc::new(SessionManager::new(
            repo.clone(),
            planner.clone(),
            config.clone(),
            lock.clone(),
        ));
        (
            AttributionEngine::new(repo.clone(), catalog, planner, sessions, config, lock),
            repo,
        )
    }

    fn input(at: DateTime<Utc>) -> AttemptInput {
        AttemptInput {
            problem_id: Some(1),
            slug: None,
            success: true,
            time_minutes: 6.0,
            timestamp: Some(at),
            perceived_difficulty: None,
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_rotation_undone() {
        let store = Arc::new(AttemptRejectingStore::default());
        let (engine, repo) = engine(store.clone());
        let t0 = noon();
        for i in 0..12 {
            engine.record(input(t0 + Duration::minutes(i))).await.unwrap();
        }

        store.reject_attempts.store(true, Ordering::SeqCst);
        assert!(engine.record(input(t0 + Duration::minutes(12))).await.is_err());

        let sessions = repo.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::InProgress);
        assert_eq!(sessions[0].attempts.len(), 12);
        assert_eq!(repo.attempts().await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_first_attempt_stores_its_tracking_session() {
        let store = Arc::new(AttemptRejectingStore::default());
        let (engine, repo) = engine(store.clone());
        store.reject_attempts.store(true, Ordering::SeqCst);
        assert!(engine.record(input(noon())).await.is_err());
        assert!(repo.sessions().await.unwrap().is_empty());

        store.reject_attempts.store(false, Ordering::SeqCst);
        let receipt = engine.record(input(noon())).await.unwrap();
        let stored = repo.session(&receipt.session_id).await.unwrap().unwrap();
        assert_eq!(stored.attempts.len(), 1);
    }
}
