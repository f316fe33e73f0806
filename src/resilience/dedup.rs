// src/resilience/dedup.rs
// Collapses concurrent calls sharing a key onto one underlying execution

use super::ResilienceError;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

type SharedCall<T> = Shared<BoxFuture<'static, Result<T, ResilienceError>>>;
type Entries = Arc<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>>;

#[derive(Default)]
pub struct InflightRequests {
    entries: Entries,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `call` unless a call with the same key is already in flight, in
    /// which case wait for that one. Every waiter receives the same result.
    pub async fn run<T, Fut>(&self, key: String, call: Fut) -> Result<T, ResilienceError>
    where
        T: Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
    {
        let plan = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            if entries.contains_key(&key) {
                match entries
                    .get(&key)
                    .and_then(|entry| entry.downcast_ref::<SharedCall<T>>())
                    .cloned()
                {
                    Some(shared) => {
                        debug!("[Resilience] Joining in-flight call '{}'", key);
                        Ok(shared)
                    }
                    None => Err(call),
                }
            } else {
                let registry = Arc::clone(&self.entries);
                let owned_key = key.clone();
                let shared: SharedCall<T> = async move {
                    let result = call.await;
                    registry
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                entries.insert(key.clone(), Box::new(shared.clone()));
                Ok(shared)
            }
        };

        match plan {
            Ok(shared) => shared.await,
            Err(call) => {
                warn!(
                    "[Resilience] Key '{}' is in flight with a different result type; running separately",
                    key
                );
                call.await
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let inflight = Arc::new(InflightRequests::new());
        let calls = Arc::new(AtomicU32::new(0));

        let make = |calls: Arc<AtomicU32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ResilienceError>(7u32)
        };

        let (a, b) = tokio::join!(
            inflight.run("sessions".into(), make(calls.clone())),
            inflight.run("sessions".into(), make(calls.clone())),
        );

        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inflight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let inflight = InflightRequests::new();
        let (a, b) = tokio::join!(
            inflight.run::<u32, _>("k".into(), async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(ResilienceError::Cancelled)
            }),
            inflight.run::<u32, _>("k".into(), async { Ok(1) }),
        );
        assert!(matches!(a, Err(ResilienceError::Cancelled)));
        assert!(matches!(b, Err(ResilienceError::Cancelled)));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let inflight = InflightRequests::new();
        let (a, b) = tokio::join!(
            inflight.run("a".into(), async { Ok::<_, ResilienceError>(1u8) }),
            inflight.run("b".into(), async { Ok::<_, ResilienceError>(2u8) }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }
}
