// src/repository.rs
// Typed record access. Every store call goes through the resilience layer.

use crate::error::Result;
use crate::models::{
    Attempt, Problem, SchedulerState, Session, SessionOrigin, SessionStatus, TagMastery,
};
use crate::resilience::{Priority, ResilienceLayer, RetryOptions};
use crate::store::{Collection, Index, Store, StoreError, Write};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const STATE_ID: &str = "scheduler";

fn to_write<T: Serialize>(collection: Collection, id: &str, record: &T) -> Result<Write> {
    let doc = serde_json::to_value(record).map_err(StoreError::from)?;
    Ok(Write::put(collection, id, doc))
}

fn decode<T: DeserializeOwned>(docs: Vec<Value>) -> Result<Vec<T>> {
    docs.into_iter()
        .map(|d| serde_json::from_value(d).map_err(|e| StoreError::from(e).into()))
        .collect()
}

/// Per-collection commit counters. Dedup keys carry the generation so a read
/// issued after a commit never joins a read that started before it.
#[derive(Default)]
struct Generations(Mutex<HashMap<Collection, u64>>);

impl Generations {
    fn get(&self, collection: Collection) -> u64 {
        let map = self.0.lock().unwrap_or_else(|p| p.into_inner());
        map.get(&collection).copied().unwrap_or(0)
    }

    fn bump(&self, collections: &BTreeSet<Collection>) {
        let mut map = self.0.lock().unwrap_or_else(|p| p.into_inner());
        for c in collections {
            *map.entry(*c).or_insert(0) += 1;
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
    resilience: ResilienceLayer,
    cancel: CancellationToken,
    generations: Arc<Generations>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>, resilience: ResilienceLayer) -> Self {
        Repository {
            store,
            resilience,
            cancel: CancellationToken::new(),
            generations: Arc::new(Generations::default()),
        }
    }

    pub fn resilience(&self) -> &ResilienceLayer {
        &self.resilience
    }

    /// Abort pending retries of every call made through this repository.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn options(&self) -> RetryOptions {
        self.resilience.options().cancel(self.cancel.clone())
    }

    // --- Raw access ---

    async fn get_doc(&self, label: &str, collection: Collection, id: &str) -> Result<Option<Value>> {
        let store = self.store.clone();
        let id = id.to_string();
        let doc = self
            .resilience
            .execute(label, self.options(), move || {
                let store = store.clone();
                let id = id.clone();
                async move { store.get(collection, &id).await }
            })
            .await?;
        Ok(doc)
    }

    /// Concurrent scans of the same collection share one store read, as long
    /// as no commit to that collection happened in between.
    async fn scan_docs(&self, collection: Collection) -> Result<Vec<Value>> {
        let store = self.store.clone();
        let label = format!("scan {}", collection.as_str());
        let options = self.options().dedup(format!(
            "scan:{}@{}",
            collection.as_str(),
            self.generations.get(collection)
        ));
        let docs = self
            .resilience
            .execute(&label, options, move || {
                let store = store.clone();
                async move { store.scan(collection).await }
            })
            .await?;
        Ok(docs)
    }

    async fn find_docs(&self, index: Index, key: &str) -> Result<Vec<Value>> {
        let store = self.store.clone();
        let key = key.to_string();
        let label = format!("{} = {}", index.as_str(), key);
        let options = self.options().dedup(format!(
            "index:{}:{}@{}",
            index.as_str(),
            key,
            self.generations.get(index.collection())
        ));
        let docs = self
            .resilience
            .execute(&label, options, move || {
                let store = store.clone();
                let key = key.clone();
                async move { store.find_by_index(index, &key).await }
            })
            .await?;
        Ok(docs)
    }

    async fn commit(&self, label: &str, writes: Vec<Write>, priority: Priority) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        debug!("Committing '{}' ({} writes)", label, writes.len());
        let touched: BTreeSet<Collection> = writes.iter().map(|w| w.collection).collect();
        let store = self.store.clone();
        let result = self
            .resilience
            .execute(label, self.options().priority(priority), move || {
                let store = store.clone();
                let writes = writes.clone();
                async move { store.commit(writes).await }
            })
            .await;
        // Bumped on failure too: a timed-out commit may still land.
        self.generations.bump(&touched);
        result?;
        Ok(())
    }

    // --- Problems ---

    pub async fn problem(&self, id: i64) -> Result<Option<Problem>> {
        let doc = self
            .get_doc("get problem", Collection::Problems, &id.to_string())
            .await?;
        Ok(match doc {
            Some(d) => Some(serde_json::from_value(d).map_err(StoreError::from)?),
            None => None,
        })
    }

    pub async fn problems(&self) -> Result<Vec<Problem>> {
        decode(self.scan_docs(Collection::Problems).await?)
    }

    // --- Attempts ---

    pub async fn attempts(&self) -> Result<Vec<Attempt>> {
        decode(self.scan_docs(Collection::Attempts).await?)
    }

    /// Persist an attempt with the problem it updated and every session it
    /// touched, in one transaction.
    pub async fn commit_attempt(
        &self,
        attempt: &Attempt,
        problem: &Problem,
        sessions: &[&Session],
    ) -> Result<()> {
        let mut writes = vec![
            to_write(Collection::Attempts, &attempt.id, attempt)?,
            to_write(Collection::Problems, &problem.id.to_string(), problem)?,
        ];
        for session in sessions {
            writes.push(to_write(Collection::Sessions, &session.id, session)?);
        }
        self.commit("record attempt", writes, Priority::High).await
    }

    // --- Sessions ---

    pub async fn session(&self, id: &str) -> Result<Option<Session>> {
        let doc = self.get_doc("get session", Collection::Sessions, id).await?;
        Ok(match doc {
            Some(d) => Some(serde_json::from_value(d).map_err(StoreError::from)?),
            None => None,
        })
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        decode(self.scan_docs(Collection::Sessions).await?)
    }

    pub async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        decode(self.find_docs(Index::SessionsByStatus, status.as_str()).await?)
    }

    pub async fn sessions_by_origin(&self, origin: SessionOrigin) -> Result<Vec<Session>> {
        decode(self.find_docs(Index::SessionsByOrigin, origin.as_str()).await?)
    }

    /// Draft and in-progress sessions of one origin, most recently active first.
    pub async fn live_sessions(&self, origin: SessionOrigin) -> Result<Vec<Session>> {
        let mut live: Vec<Session> = self
            .sessions_by_origin(origin)
            .await?
            .into_iter()
            .filter(|s| s.is_live())
            .collect();
        live.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(live)
    }

    pub async fn completed_session_count(&self) -> Result<u32> {
        Ok(self.sessions_with_status(SessionStatus::Completed).await?.len() as u32)
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let write = to_write(Collection::Sessions, &session.id, session)?;
        self.commit("save session", vec![write], Priority::Normal).await
    }

    pub async fn save_sessions(&self, sessions: &[Session]) -> Result<()> {
        let writes = sessions
            .iter()
            .map(|s| to_write(Collection::Sessions, &s.id, s))
            .collect::<Result<Vec<_>>>()?;
        self.commit("save sessions", writes, Priority::Normal).await
    }

    // --- Tag mastery & state ---

    pub async fn tag_masteries(&self) -> Result<Vec<TagMastery>> {
        decode(self.scan_docs(Collection::TagMastery).await?)
    }

    pub async fn state(&self) -> Result<SchedulerState> {
        let doc = self.get_doc("get state", Collection::State, STATE_ID).await?;
        Ok(match doc {
            Some(d) => serde_json::from_value(d).map_err(StoreError::from)?,
            None => SchedulerState::default(),
        })
    }

    pub async fn save_state(&self, state: &SchedulerState) -> Result<()> {
        let write = to_write(Collection::State, STATE_ID, state)?;
        self.commit("save state", vec![write], Priority::Normal).await
    }

    /// Replace all mastery records and the scheduler state together.
    pub async fn save_masteries(&self, masteries: &[TagMastery], state: &SchedulerState) -> Result<()> {
        let mut writes = masteries
            .iter()
            .map(|m| to_write(Collection::TagMastery, &m.tag, m))
            .collect::<Result<Vec<_>>>()?;
        writes.push(to_write(Collection::State, STATE_ID, state)?);
        self.commit("save mastery", writes, Priority::Low).await
    }
}
