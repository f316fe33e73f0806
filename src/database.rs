// src/database.rs

use crate::store::{Collection, Index, Store, StoreError, StoreErrorKind, StoreResult, Write};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Document store on a single SQLite file.
///
/// Documents live in one table keyed by (collection, id); secondary index
/// entries are rewritten in the same transaction as the document itself.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        debug!("Opening SQLite store at {:?}", path);
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_db(&conn).map_err(map_sqlite_error)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::new(StoreErrorKind::Other, "connection mutex poisoned"))?;
            f(&mut guard).map_err(map_sqlite_error)
        })
        .await
        .map_err(|e| StoreError::new(StoreErrorKind::Other, e.to_string()))?
    }
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    debug!("init_db: Checking database schema...");
    conn.busy_timeout(Duration::from_millis(1000))?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );
        CREATE TABLE IF NOT EXISTS document_index (
            index_name TEXT NOT NULL,
            key TEXT NOT NULL,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            PRIMARY KEY (index_name, key, id)
        );
        CREATE INDEX IF NOT EXISTS idx_document_index_owner
            ON document_index (collection, id);
        ",
    )?;
    Ok(())
}

/// Maps SQLite result codes onto the store's retry taxonomy.
fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    use rusqlite::ffi::ErrorCode;

    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreErrorKind::Busy,
            ErrorCode::ConstraintViolation => StoreErrorKind::Constraint,
            ErrorCode::DiskFull | ErrorCode::TooBig => StoreErrorKind::QuotaExceeded,
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure => StoreErrorKind::Connection,
            _ => StoreErrorKind::Other,
        },
        _ => StoreErrorKind::Other,
    };
    StoreError::new(kind, err.to_string())
}

fn parse_bodies(bodies: Vec<String>) -> StoreResult<Vec<Value>> {
    bodies
        .iter()
        .map(|b| serde_json::from_str(b).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
        let id = id.to_string();
        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM documents WHERE collection = ? AND id = ?",
                    params![collection.as_str(), id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        let bodies = self
            .with_conn(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT body FROM documents WHERE collection = ? ORDER BY id")?;
                let rows = stmt
                    .query_map([collection.as_str()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(rows)
            })
            .await?;
        parse_bodies(bodies)
    }

    async fn find_by_index(&self, index: Index, key: &str) -> StoreResult<Vec<Value>> {
        let key = key.to_string();
        let bodies = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT d.body
                     FROM document_index i
                     JOIN documents d ON d.collection = i.collection AND d.id = i.id
                     WHERE i.index_name = ? AND i.key = ?
                     ORDER BY d.id",
                )?;
                let rows = stmt
                    .query_map(params![index.as_str(), key], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(rows)
            })
            .await?;
        parse_bodies(bodies)
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        let count = writes.len();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut put = tx.prepare(
                    "INSERT OR REPLACE INTO documents (collection, id, body, updated_at) VALUES (?, ?, ?, ?)",
                )?;
                let mut clear =
                    tx.prepare("DELETE FROM document_index WHERE collection = ? AND id = ?")?;
                let mut link = tx.prepare(
                    "INSERT OR REPLACE INTO document_index (index_name, key, collection, id) VALUES (?, ?, ?, ?)",
                )?;

                for write in &writes {
                    let collection = write.collection.as_str();
                    put.execute(params![collection, write.id, write.doc.to_string(), now])?;
                    clear.execute(params![collection, write.id])?;
                    for index in write.collection.indexes() {
                        for key in index.keys(&write.doc) {
                            link.execute(params![index.as_str(), key, collection, write.id])?;
                        }
                    }
                }
            }
            tx.commit()
        })
        .await?;
        debug!("[DB] Committed {} document(s)", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_and_reload() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(vec![
                Write::put(Collection::Sessions, "s1", json!({"id": "s1", "status": "draft", "origin": "guided"})),
                Write::put(Collection::Attempts, "a1", json!({"id": "a1", "session_id": "s1", "problem_id": 7})),
            ])
            .await
            .unwrap();

        let doc = store.get(Collection::Sessions, "s1").await.unwrap().unwrap();
        assert_eq!(doc["status"], "draft");
        assert_eq!(store.find_by_index(Index::AttemptsByProblem, "7").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_index_follows_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(vec![Write::put(Collection::Sessions, "s1", json!({"status": "draft"}))])
            .await
            .unwrap();
        store
            .commit(vec![Write::put(Collection::Sessions, "s1", json!({"status": "completed"}))])
            .await
            .unwrap();

        assert!(store.find_by_index(Index::SessionsByStatus, "draft").await.unwrap().is_empty());
        assert_eq!(
            store.find_by_index(Index::SessionsByStatus, "completed").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .commit(vec![Write::put(Collection::State, "scheduler", json!({"current_tier": "core"}))])
                .await
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        let doc = reopened.get(Collection::State, "scheduler").await.unwrap().unwrap();
        assert_eq!(doc["current_tier"], "core");
    }

    #[test]
    fn test_error_mapping() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert_eq!(map_sqlite_error(busy).kind, StoreErrorKind::Busy);

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        let err = map_sqlite_error(constraint);
        assert_eq!(err.kind, StoreErrorKind::Constraint);
        assert!(!err.is_retryable());
    }
}
