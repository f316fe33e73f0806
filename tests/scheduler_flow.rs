// tests/scheduler_flow.rs
// End-to-end flows through the Scheduler facade

use chrono::{DateTime, Duration, Utc};
use practice_scheduler::models::{CloseReason, RotationReason};
use practice_scheduler::{
    AttemptInput, Catalog, MemoryStore, SchedulerConfig, SchedulerError, Scheduler, SessionOrigin,
    SessionOutcome, SessionStatus, SessionType, SqliteStore, StaticSettings, Store, SweepAction,
};
use std::sync::Arc;

fn config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.session.creation_cooldown_ms = 0;
    config
}

fn scheduler_on(store: Arc<dyn Store>) -> Scheduler {
    Scheduler::new(
        store,
        Catalog::builtin().unwrap(),
        Arc::new(StaticSettings::default()),
        config(),
    )
}

fn scheduler() -> Scheduler {
    scheduler_on(Arc::new(MemoryStore::new()))
}

fn morning() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-10T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn solved(problem_id: i64, at: DateTime<Utc>) -> AttemptInput {
    AttemptInput {
        problem_id: Some(problem_id),
        slug: None,
        success: true,
        time_minutes: 9.0,
        timestamp: Some(at),
        perceived_difficulty: None,
    }
}

#[tokio::test]
async fn test_first_attempt_end_to_end() {
    let scheduler = scheduler();
    let t0 = morning();

    let receipt = scheduler.record_attempt(solved(1, t0)).await.unwrap();
    assert_eq!(receipt.origin, SessionOrigin::Tracking);
    assert_eq!(receipt.box_level, 2);
    assert!((receipt.stability - 1.7).abs() < 1e-9);
    assert_eq!(receipt.outcome, SessionOutcome::Attached);

    let session = scheduler.session(&receipt.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.attempts.len(), 1);

    let mastery = scheduler.recalculate_mastery_at(t0).await.unwrap();
    let array = mastery.iter().find(|m| m.tag == "array").unwrap();
    assert_eq!(array.total_attempts, 1);
    assert_eq!(array.successful_attempts, 1);
    assert!(!array.mastered);
}

#[tokio::test]
async fn test_unknown_problem_is_rejected() {
    let scheduler = scheduler();
    let err = scheduler.record_attempt(solved(987_654, morning())).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProblemNotFound(_)));
    assert!(scheduler.repository().sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_session_requests_share_one_session() {
    let scheduler = Arc::new(scheduler());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let s = scheduler.clone();
            tokio::spawn(async move { s.get_or_create_session(SessionType::Standard).await })
        })
        .collect();
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().unwrap().id);
    }
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test]
async fn test_tracking_rotates_at_soft_cap() {
    let scheduler = scheduler();
    let t0 = morning();

    let mut first_session = None;
    for i in 0..12 {
        let receipt = scheduler
            .record_attempt(solved(1, t0 + Duration::minutes(i)))
            .await
            .unwrap();
        assert_eq!(receipt.outcome, SessionOutcome::Attached);
        first_session.get_or_insert(receipt.session_id.clone());
        assert_eq!(Some(&receipt.session_id), first_session.as_ref());
    }

    let receipt = scheduler
        .record_attempt(solved(1, t0 + Duration::minutes(12)))
        .await
        .unwrap();
    let closed_id = first_session.unwrap();
    match &receipt.outcome {
        SessionOutcome::Rotated {
            closed_session_id,
            reason,
            ..
        } => {
            assert_eq!(closed_session_id, &closed_id);
            assert_eq!(*reason, RotationReason::SoftCap);
        }
        other => panic!("expected rotation, got {:?}", other),
    }
    assert_ne!(receipt.session_id, closed_id);

    let closed = scheduler.session(&closed_id).await.unwrap();
    assert_eq!(closed.status, SessionStatus::Completed);
    assert_eq!(closed.attempts.len(), 12);
    assert_eq!(closed.metadata.rotated_into.as_deref(), Some(receipt.session_id.as_str()));
}

#[tokio::test]
async fn test_tracking_rotates_after_inactivity() {
    let scheduler = scheduler();
    let t0 = morning();
    let first = scheduler.record_attempt(solved(1, t0)).await.unwrap();
    let second = scheduler
        .record_attempt(solved(1, t0 + Duration::hours(3)))
        .await
        .unwrap();
    assert!(matches!(
        second.outcome,
        SessionOutcome::Rotated {
            reason: RotationReason::Inactivity,
            ..
        }
    ));
    assert_ne!(first.session_id, second.session_id);
}

#[tokio::test]
async fn test_guided_session_completes_when_every_slot_attempted() {
    let scheduler = scheduler();
    let t0 = morning();
    let session = scheduler
        .get_or_create_session_at(SessionType::Standard, t0)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Draft);
    assert!(!session.problems.is_empty());

    let ids: Vec<i64> = session.problems.iter().map(|p| p.problem_id).collect();
    let mut last = None;
    for (i, id) in ids.iter().enumerate() {
        let receipt = scheduler
            .record_attempt(solved(*id, t0 + Duration::minutes(10 * (i as i64 + 1))))
            .await
            .unwrap();
        assert_eq!(receipt.session_id, session.id);
        assert_eq!(receipt.origin, SessionOrigin::Guided);
        last = Some(receipt);
    }

    let last = last.unwrap();
    assert!(matches!(last.outcome, SessionOutcome::Completed { .. }));
    let stored = scheduler.session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.metadata.close_reason, Some(CloseReason::AllProblemsAttempted));
    assert!(stored.problems.iter().all(|p| p.outcome.is_some()));
}

#[tokio::test]
async fn test_sweep_expires_abandoned_guided_session() {
    let scheduler = scheduler();
    let t0 = morning();
    let session = scheduler
        .get_or_create_session_at(SessionType::Standard, t0)
        .await
        .unwrap();

    let later = t0 + Duration::hours(25);
    let stalled = scheduler.detect_stalled_sessions_at(later).await.unwrap();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].session_id, session.id);

    let actions = scheduler.run_cleanup_sweep_at(later).await.unwrap();
    assert_eq!(
        actions,
        vec![SweepAction::Expire {
            session_id: session.id.clone()
        }]
    );
    let stored = scheduler.session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Expired);
    assert!(scheduler.detect_stalled_sessions_at(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_replaces_idle_tracking_session() {
    let scheduler = scheduler();
    let t0 = morning();
    let first = scheduler.record_attempt(solved(1, t0)).await.unwrap();

    let later = t0 + Duration::hours(3);
    let actions = scheduler.run_cleanup_sweep_at(later).await.unwrap();
    assert!(matches!(
        actions.as_slice(),
        [SweepAction::MarkForReplacement {
            reason: RotationReason::Inactivity,
            ..
        }]
    ));
    let closed = scheduler.session(&first.session_id).await.unwrap();
    assert_eq!(closed.metadata.close_reason, Some(CloseReason::ReplacedBySweep));

    let next = scheduler.record_attempt(solved(1, later)).await.unwrap();
    assert_ne!(next.session_id, first.session_id);
    assert_eq!(next.outcome, SessionOutcome::Attached);
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("practice.db");
    let t0 = morning();

    let session_id = {
        let scheduler = scheduler_on(Arc::new(SqliteStore::open(&path).unwrap()));
        scheduler.record_attempt(solved(1, t0)).await.unwrap().session_id
    };

    let reopened = scheduler_on(Arc::new(SqliteStore::open(&path).unwrap()));
    let session = reopened.session(&session_id).await.unwrap();
    assert_eq!(session.attempts.len(), 1);
    assert_eq!(session.attempts[0].problem_id, 1);

    let problem = reopened.repository().problem(1).await.unwrap().unwrap();
    assert_eq!(problem.box_level, 2);
    assert_eq!(problem.stats.total, 1);
}

#[tokio::test]
async fn test_sqlite_round_trips_guided_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("practice.db");
    let t0 = morning();

    let original = {
        let scheduler = scheduler_on(Arc::new(SqliteStore::open(&path).unwrap()));
        let session = scheduler
            .get_or_create_session_at(SessionType::Standard, t0)
            .await
            .unwrap();
        let first = session.problems[0].problem_id;
        scheduler
            .record_attempt(solved(first, t0 + Duration::minutes(5)))
            .await
            .unwrap();
        let actions = scheduler
            .run_cleanup_sweep_at(t0 + Duration::hours(3))
            .await
            .unwrap();
        assert!(matches!(actions.as_slice(), [SweepAction::FlagForUserChoice { .. }]));
        scheduler.session(&session.id).await.unwrap()
    };
    assert!(original.metadata.awaiting_user_choice);
    assert!(original.problems[0].outcome.is_some());

    let reopened = scheduler_on(Arc::new(SqliteStore::open(&path).unwrap()));
    assert_eq!(reopened.session(&original.id).await.unwrap(), original);
}

#[tokio::test]
async fn test_attempts_visible_right_after_recording() {
    let scheduler = scheduler();
    let t0 = morning();
    for i in 0..3 {
        scheduler
            .record_attempt(solved(1, t0 + Duration::minutes(i)))
            .await
            .unwrap();
        let attempts = scheduler.repository().attempts().await.unwrap();
        assert_eq!(attempts.len(), i as usize + 1);
    }
}

#[tokio::test]
async fn test_tracking_rotates_at_midnight() {
    let scheduler = scheduler();
    let late = DateTime::parse_from_rfc3339("2026-03-10T23:30:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let first = scheduler.record_attempt(solved(1, late)).await.unwrap();
    let second = scheduler
        .record_attempt(solved(1, late + Duration::hours(1)))
        .await
        .unwrap();
    match &second.outcome {
        SessionOutcome::Rotated {
            closed_session_id,
            reason,
            ..
        } => {
            assert_eq!(closed_session_id, &first.session_id);
            assert_eq!(*reason, RotationReason::DayChanged);
        }
        other => panic!("expected rotation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tracking_rotates_on_topic_drift() {
    let scheduler = scheduler();
    let t0 = morning();
    // two-sum, contains-duplicate, reverse-linked-list: array, hash table, sorting, linked list
    for (i, id) in [1, 217, 206].into_iter().enumerate() {
        let receipt = scheduler
            .record_attempt(solved(id, t0 + Duration::minutes(i as i64)))
            .await
            .unwrap();
        assert_eq!(receipt.outcome, SessionOutcome::Attached);
    }

    // invert-binary-tree brings a fifth tag
    let receipt = scheduler
        .record_attempt(solved(226, t0 + Duration::minutes(5)))
        .await
        .unwrap();
    assert!(matches!(
        receipt.outcome,
        SessionOutcome::Rotated {
            reason: RotationReason::TopicDrift,
            ..
        }
    ));
    let fresh = scheduler.session(&receipt.session_id).await.unwrap();
    assert_eq!(fresh.attempts.len(), 1);
    assert_eq!(fresh.attempts[0].problem_id, 226);
}

#[tokio::test]
async fn test_sweep_auto_completes_mostly_done_guided_session() {
    let scheduler = scheduler();
    let t0 = morning();
    let session = scheduler
        .get_or_create_session_at(SessionType::Standard, t0)
        .await
        .unwrap();
    let total = session.problems.len();
    let needed = (total as f64 * config().session.auto_complete_ratio).ceil() as usize;
    assert!(needed < total);

    for (i, slot) in session.problems.iter().take(needed).enumerate() {
        scheduler
            .record_attempt(solved(slot.problem_id, t0 + Duration::minutes(10 * (i as i64 + 1))))
            .await
            .unwrap();
    }

    let actions = scheduler
        .run_cleanup_sweep_at(t0 + Duration::hours(4))
        .await
        .unwrap();
    assert!(matches!(
        actions.as_slice(),
        [SweepAction::AutoComplete { session_id, .. }] if session_id == &session.id
    ));
    let stored = scheduler.session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.metadata.close_reason, Some(CloseReason::AutoCompleted));
}

#[tokio::test]
async fn test_sweep_flags_guided_session_outpaced_by_tracking() {
    let scheduler = scheduler();
    let t0 = morning();
    let session = scheduler
        .get_or_create_session_at(SessionType::Standard, t0)
        .await
        .unwrap();
    scheduler
        .record_attempt(solved(session.problems[0].problem_id, t0 + Duration::minutes(10)))
        .await
        .unwrap();

    let off_plan = [1, 217, 206, 226, 20, 155]
        .into_iter()
        .find(|id| session.problems.iter().all(|p| p.problem_id != *id))
        .unwrap();
    let tracked = scheduler
        .record_attempt(solved(off_plan, t0 + Duration::minutes(40)))
        .await
        .unwrap();
    assert_eq!(tracked.origin, SessionOrigin::Tracking);

    let actions = scheduler
        .run_cleanup_sweep_at(t0 + Duration::hours(3))
        .await
        .unwrap();
    assert!(actions.contains(&SweepAction::FlagForRefresh {
        session_id: session.id.clone()
    }));
    let stored = scheduler.session(&session.id).await.unwrap();
    assert!(stored.metadata.refresh_requested);
    assert!(stored.is_live());
}
