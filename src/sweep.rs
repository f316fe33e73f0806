// src/sweep.rs
// Periodic detection and cleanup of stalled sessions

use crate::config::{SchedulerConfig, SessionConfig};
use crate::error::Result;
use crate::models::{
    CloseReason, RotationReason, Session, SessionOrigin, SessionStatus,
};
use crate::planner::Planner;
use crate::repository::Repository;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SweepAction {
    /// Guided session abandoned before any attempt.
    Expire { session_id: String },
    /// Guided session close enough to done to count as completed.
    AutoComplete { session_id: String, progress: f64 },
    /// Tracking session closed so the next attempt opens a fresh one.
    MarkForReplacement {
        session_id: String,
        reason: RotationReason,
    },
    /// Guided session whose plan is outdated by later ad hoc practice.
    FlagForRefresh { session_id: String },
    /// Left for the user to decide.
    FlagForUserChoice { session_id: String },
}

impl SweepAction {
    pub fn session_id(&self) -> &str {
        match self {
            SweepAction::Expire { session_id }
            | SweepAction::AutoComplete { session_id, .. }
            | SweepAction::MarkForReplacement { session_id, .. }
            | SweepAction::FlagForRefresh { session_id }
            | SweepAction::FlagForUserChoice { session_id } => session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalledSession {
    pub session_id: String,
    pub origin: SessionOrigin,
    pub status: SessionStatus,
    pub inactive_minutes: i64,
    pub progress: f64,
    pub action: SweepAction,
}

/// Classify live sessions. `tracking_history` is every tracking session,
/// closed ones included, and is only used to spot ad hoc activity newer than
/// a guided session.
pub fn classify(
    live: &[Session],
    tracking_history: &[Session],
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Vec<StalledSession> {
    let inactivity = Duration::minutes(config.inactivity_minutes);
    let latest_tracking = tracking_history
        .iter()
        .filter(|s| !s.attempts.is_empty())
        .map(|s| s.last_activity_at)
        .max();

    live.iter()
        .filter(|s| s.is_live())
        .filter_map(|s| {
            let idle = now - s.last_activity_at;
            let progress = s.progress_ratio();
            let session_id = s.id.clone();
            let action = match s.origin {
                SessionOrigin::Tracking => {
                    if idle >= inactivity {
                        SweepAction::MarkForReplacement {
                            session_id,
                            reason: RotationReason::Inactivity,
                        }
                    } else if now.date_naive() != s.created_at.date_naive() {
                        SweepAction::MarkForReplacement {
                            session_id,
                            reason: RotationReason::DayChanged,
                        }
                    } else {
                        return None;
                    }
                }
                SessionOrigin::Guided => {
                    if idle < inactivity {
                        return None;
                    }
                    if s.attempts.is_empty() && idle >= Duration::hours(config.guided_stale_hours) {
                        SweepAction::Expire { session_id }
                    } else if progress >= config.auto_complete_ratio {
                        SweepAction::AutoComplete {
                            session_id,
                            progress,
                        }
                    } else if latest_tracking.is_some_and(|t| t > s.last_activity_at) {
                        SweepAction::FlagForRefresh { session_id }
                    } else {
                        SweepAction::FlagForUserChoice { session_id }
                    }
                }
            };
            Some(StalledSession {
                session_id: s.id.clone(),
                origin: s.origin,
                status: s.status,
                inactive_minutes: idle.num_minutes(),
                progress,
                action,
            })
        })
        .collect()
}

/// Apply one action to its session. Returns true if the session was closed
/// as completed.
pub fn apply(session: &mut Session, action: &SweepAction, now: DateTime<Utc>) -> bool {
    match action {
        SweepAction::Expire { .. } => {
            session.close(SessionStatus::Expired, CloseReason::Expired, now);
            false
        }
        SweepAction::AutoComplete { .. } => {
            session.close(SessionStatus::Completed, CloseReason::AutoCompleted, now);
            true
        }
        SweepAction::MarkForReplacement { .. } => {
            session.metadata.replacement_requested = true;
            session.close(SessionStatus::Completed, CloseReason::ReplacedBySweep, now);
            true
        }
        SweepAction::FlagForRefresh { .. } => {
            session.metadata.refresh_requested = true;
            false
        }
        SweepAction::FlagForUserChoice { .. } => {
            session.metadata.awaiting_user_choice = true;
            false
        }
    }
}

pub struct Sweeper {
    repo: Repository,
    planner: Planner,
    config: Arc<SchedulerConfig>,
    lock: Arc<Mutex<()>>,
}

impl Sweeper {
    pub fn new(repo: Repository, planner: Planner, config: Arc<SchedulerConfig>, lock: Arc<Mutex<()>>) -> Self {
        Sweeper {
            repo,
            planner,
            config,
            lock,
        }
    }

    async fn load(&self) -> Result<(Vec<Session>, Vec<Session>)> {
        let (in_progress, drafts, tracking) = futures::try_join!(
            self.repo.sessions_with_status(SessionStatus::InProgress),
            self.repo.sessions_with_status(SessionStatus::Draft),
            self.repo.sessions_by_origin(SessionOrigin::Tracking),
        )?;
        let mut live = in_progress;
        live.extend(drafts);
        Ok((live, tracking))
    }

    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<StalledSession>> {
        let (live, tracking) = self.load().await?;
        let stalled = classify(&live, &tracking, now, &self.config.session);
        debug!("[Sweep] {} of {} live session(s) stalled", stalled.len(), live.len());
        Ok(stalled)
    }

    /// Detect and apply in one step, serialized with attempt attribution.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<Vec<SweepAction>> {
        let _guard = self.lock.lock().await;
        let (mut live, tracking) = self.load().await?;
        let stalled = classify(&live, &tracking, now, &self.config.session);
        if stalled.is_empty() {
            return Ok(Vec::new());
        }

        let mut changed = Vec::new();
        let mut any_completed = false;
        let mut actions = Vec::new();
        for entry in stalled {
            let Some(pos) = live.iter().position(|s| s.id == entry.session_id) else {
                continue;
            };
            let mut session = live.swap_remove(pos);
            any_completed |= apply(&mut session, &entry.action, now);
            info!("[Sweep] {:?}", entry.action);
            changed.push(session);
            actions.push(entry.action);
        }
        self.repo.save_sessions(&changed).await?;

        if any_completed {
            if let Err(e) = self.planner.after_session_closed(now).await {
                warn!("[Sweep] Post-close pipeline failed: {}", e);
            }
        }
        Ok(actions)
    }
}
