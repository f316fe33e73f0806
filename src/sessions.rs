// src/sessions.rs
// Single-flight session creation with a cooldown between creations

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::{CloseReason, Session, SessionOrigin, SessionStatus, SessionType};
use crate::planner::Planner;
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// What a creation is for; each kind has its own cooldown clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Guided(SessionType),
    Tracking,
}

#[derive(Default)]
struct CreationState {
    last_created: HashMap<SessionKind, Instant>,
}

pub struct SessionManager {
    repo: Repository,
    planner: Planner,
    config: Arc<SchedulerConfig>,
    // Shared with attribution and the sweep. Taken before `creation`.
    attribution_lock: Arc<Mutex<()>>,
    // Held for the whole check-then-create sequence, so concurrent callers
    // observe the first caller's session instead of making their own.
    creation: Mutex<CreationState>,
}

impl SessionManager {
    pub fn new(
        repo: Repository,
        planner: Planner,
        config: Arc<SchedulerConfig>,
        attribution_lock: Arc<Mutex<()>>,
    ) -> Self {
        SessionManager {
            repo,
            planner,
            config,
            attribution_lock,
            creation: Mutex::new(CreationState::default()),
        }
    }

    /// The live guided session a caller asking for `session_type` should use,
    /// if any. At most one guided session is live: a draft of another type is
    /// expired when a different type is requested.
    async fn resumable_guided(&self, session_type: SessionType, now: DateTime<Utc>) -> Result<Option<Session>> {
        let live = self.repo.live_sessions(SessionOrigin::Guided).await?;
        if let Some(active) = live.iter().find(|s| s.status == SessionStatus::InProgress) {
            return Ok(Some(active.clone()));
        }
        let mut stale_drafts = Vec::new();
        let mut found = None;
        for session in live {
            if found.is_none() && session.session_type == Some(session_type) {
                found = Some(session);
            } else {
                stale_drafts.push(session);
            }
        }
        if !stale_drafts.is_empty() {
            for draft in stale_drafts.iter_mut() {
                draft.close(SessionStatus::Expired, CloseReason::Expired, now);
                info!("[Session] Expired superseded draft {}", draft.id);
            }
            self.repo.save_sessions(&stale_drafts).await?;
        }
        Ok(found)
    }

    async fn wait_out_cooldown(&self, state: &CreationState, kind: SessionKind) {
        let cooldown = self.config.session.creation_cooldown();
        if let Some(last) = state.last_created.get(&kind) {
            let elapsed = last.elapsed();
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                debug!("[Session] Creation of {:?} within cooldown, waiting {:?}", kind, remaining);
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Resume the live guided session or create one. Concurrent callers
    /// resolve to the same session.
    ///
    /// Runs under the attribution lock: superseded drafts are expired here,
    /// and an attempt in flight must not write one back as in progress.
    pub async fn get_or_create(&self, session_type: SessionType, now: DateTime<Utc>) -> Result<Session> {
        let _attribution = self.attribution_lock.lock().await;
        let mut state = self.creation.lock().await;

        if let Some(existing) = self.resumable_guided(session_type, now).await? {
            debug!("[Session] Resuming guided session {} ({:?})", existing.id, existing.status);
            return Ok(existing);
        }

        let kind = SessionKind::Guided(session_type);
        self.wait_out_cooldown(&state, kind).await;

        let problems = self.planner.plan_guided(session_type, now).await?;
        let session = Session::new_guided(session_type, problems, now);
        self.repo.save_session(&session).await?;
        state.last_created.insert(kind, Instant::now());

        info!(
            "[Session] Created guided {:?} session {} with {} problem(s)",
            session_type,
            session.id,
            session.problems.len()
        );
        Ok(session)
    }

    pub async fn live_tracking(&self) -> Result<Option<Session>> {
        Ok(self
            .repo
            .live_sessions(SessionOrigin::Tracking)
            .await?
            .into_iter()
            .next())
    }

    /// The live tracking session, or a fresh one if there is none. A fresh
    /// session is not persisted: the caller stores it together with the
    /// attempt that opened it. Callers hold the attribution lock.
    pub async fn tracking_for_attempt(&self, now: DateTime<Utc>) -> Result<Session> {
        let mut state = self.creation.lock().await;

        if let Some(existing) = self.live_tracking().await? {
            return Ok(existing);
        }
        Ok(self.reserve_tracking(&mut state, now).await)
    }

    /// A new tracking session to replace one being rotated out, stored by the
    /// caller in the same commit that closes the old one.
    pub async fn replacement_tracking(&self, now: DateTime<Utc>) -> Session {
        let mut state = self.creation.lock().await;
        self.reserve_tracking(&mut state, now).await
    }

    async fn reserve_tracking(&self, state: &mut CreationState, now: DateTime<Utc>) -> Session {
        self.wait_out_cooldown(state, SessionKind::Tracking).await;
        let session = Session::new_tracking(now);
        state.last_created.insert(SessionKind::Tracking, Instant::now());
        info!("[Session] Opened tracking session {}", session.id);
        session
    }
}
