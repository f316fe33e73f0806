// src/store/mod.rs
// Transactional document store the scheduler persists into
//
// Records are JSON documents keyed by (collection, id). Writes are upserts,
// so re-issuing a batch after an ambiguous failure is harmless. Secondary
// indexes are derived from document fields and maintained by each backend
// inside the same transaction as the write.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Problems,
    Attempts,
    Sessions,
    TagMastery,
    State,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Problems,
        Collection::Attempts,
        Collection::Sessions,
        Collection::TagMastery,
        Collection::State,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Problems => "problems",
            Collection::Attempts => "attempts",
            Collection::Sessions => "sessions",
            Collection::TagMastery => "tag_mastery",
            Collection::State => "state",
        }
    }

    pub fn indexes(&self) -> &'static [Index] {
        match self {
            Collection::Problems => &[Index::ProblemsByTag],
            Collection::Attempts => &[Index::AttemptsBySession, Index::AttemptsByProblem],
            Collection::Sessions => &[Index::SessionsByStatus, Index::SessionsByOrigin],
            Collection::TagMastery | Collection::State => &[],
        }
    }
}

/// Secondary lookups supported by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    SessionsByStatus,
    SessionsByOrigin,
    AttemptsBySession,
    AttemptsByProblem,
    ProblemsByTag,
}

impl Index {
    pub fn as_str(&self) -> &'static str {
        match self {
            Index::SessionsByStatus => "sessions_by_status",
            Index::SessionsByOrigin => "sessions_by_origin",
            Index::AttemptsBySession => "attempts_by_session",
            Index::AttemptsByProblem => "attempts_by_problem",
            Index::ProblemsByTag => "problems_by_tag",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Index::SessionsByStatus | Index::SessionsByOrigin => Collection::Sessions,
            Index::AttemptsBySession | Index::AttemptsByProblem => Collection::Attempts,
            Index::ProblemsByTag => Collection::Problems,
        }
    }

    /// Keys under which `doc` is reachable through this index.
    pub fn keys(&self, doc: &Value) -> Vec<String> {
        let field = match self {
            Index::SessionsByStatus => "status",
            Index::SessionsByOrigin => "origin",
            Index::AttemptsBySession => "session_id",
            Index::AttemptsByProblem => "problem_id",
            Index::ProblemsByTag => "tags",
        };
        match doc.get(field) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Number(n)) => vec![n.to_string()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A single upsert inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub collection: Collection,
    pub id: String,
    pub doc: Value,
}

impl Write {
    pub fn put(collection: Collection, id: impl Into<String>, doc: Value) -> Self {
        Write {
            collection,
            id: id.into(),
            doc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Busy,
    Connection,
    Timeout,
    QuotaExceeded,
    Constraint,
    Serialization,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::Busy => "store busy",
            StoreErrorKind::Connection => "connection lost",
            StoreErrorKind::Timeout => "store timeout",
            StoreErrorKind::QuotaExceeded => "quota exceeded",
            StoreErrorKind::Constraint => "constraint violation",
            StoreErrorKind::Serialization => "serialization error",
            StoreErrorKind::Other => "store error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            message: message.into(),
        }
    }

    /// Transient failures may succeed on a later attempt; quota and
    /// constraint failures never will. Messages are inspected too because
    /// backends do not always categorise these precisely.
    pub fn is_retryable(&self) -> bool {
        let message = self.message.to_lowercase();
        if message.contains("quota") || message.contains("constraint") {
            return false;
        }
        matches!(
            self.kind,
            StoreErrorKind::Busy
                | StoreErrorKind::Connection
                | StoreErrorKind::Timeout
                | StoreErrorKind::Other
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::new(StoreErrorKind::Serialization, err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>>;

    /// All documents of a collection, ordered by id.
    async fn scan(&self, collection: Collection) -> StoreResult<Vec<Value>>;

    async fn find_by_index(&self, index: Index, key: &str) -> StoreResult<Vec<Value>>;

    /// Apply every write or none of them.
    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()>;
}
