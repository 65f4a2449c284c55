//! Session registry: maps an opaque id to the live fragment sequence behind it.
//!
//! Sessions are pulled one fragment at a time. Each session has its own lock,
//! so pulls against one id are serialized while different ids never block
//! each other. A session leaves the registry on exhaustion, on producer
//! failure, on explicit removal, on idle eviction, or when the
//! [`SessionLease`] returned by [`SessionRegistry::register_leased`] is dropped.

use super::metrics;
use super::providers::{FragmentStream, ProviderError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session {0} is already registered")]
    Duplicate(String),

    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {id} failed: {source}")]
    Producer {
        id: String,
        #[source]
        source: ProviderError,
    },
}

impl RegistryError {
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::Duplicate(_) => 409,
            RegistryError::NotFound(_) => 404,
            RegistryError::Producer { source, .. } => source.status_code(),
        }
    }
}

/// Outcome of a single pull.
#[derive(Debug, PartialEq, Eq)]
pub enum Pull {
    Fragment(String),
    /// The producer finished; the session has been removed.
    Exhausted,
}

struct Session {
    producer: Mutex<FragmentStream>,
    last_active_ms: AtomicU64,
    closed: AtomicBool,
}

impl Session {
    fn new(producer: FragmentStream, now_ms: u64) -> Self {
        Self {
            producer: Mutex::new(producer),
            last_active_ms: AtomicU64::new(now_ms),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed and drop the producer now if nobody is pulling.
    /// An in-flight pull drops it when it observes the flag.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut producer) = self.producer.try_lock() {
            *producer = Box::pin(futures::stream::empty::<Result<String, ProviderError>>());
        }
    }
}

pub struct SessionRegistry {
    kind: &'static str,
    sessions: DashMap<String, Arc<Session>>,
    epoch: Instant,
}

impl SessionRegistry {
    /// `kind` labels this registry in logs and metrics, e.g. "reply".
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            sessions: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Insert a producer under `id`. Fails without touching the existing
    /// session when the id is taken; the rejected producer is dropped.
    pub fn register(&self, id: &str, producer: FragmentStream) -> Result<(), RegistryError> {
        self.insert(id, producer).map(|_| ())
    }

    /// Like [`register`](Self::register), but the returned lease removes the
    /// session when dropped.
    pub fn register_leased(
        self: &Arc<Self>,
        id: &str,
        producer: FragmentStream,
    ) -> Result<SessionLease, RegistryError> {
        let session = self.insert(id, producer)?;
        Ok(SessionLease {
            registry: Arc::clone(self),
            id: id.to_string(),
            session,
        })
    }

    fn insert(&self, id: &str, producer: FragmentStream) -> Result<Arc<Session>, RegistryError> {
        let session = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(kind = self.kind, session_id = %id, "Duplicate session id rejected");
                return Err(RegistryError::Duplicate(id.to_string()));
            }
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(producer, self.now_ms()));
                entry.insert(Arc::clone(&session));
                session
            }
        };

        metrics::set_active_sessions(self.kind, self.sessions.len());
        tracing::debug!(kind = self.kind, session_id = %id, "Session registered");
        Ok(session)
    }

    /// Advance the session by exactly one fragment.
    ///
    /// Exhaustion and producer failure both remove the session, so any later
    /// pull for the same id reports [`RegistryError::NotFound`].
    pub async fn pull(&self, id: &str) -> Result<Pull, RegistryError> {
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let mut producer = session.producer.lock().await;
        if session.is_closed() {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        let next = producer.next().await;
        session
            .last_active_ms
            .store(self.now_ms(), Ordering::SeqCst);

        if session.is_closed() {
            *producer = Box::pin(futures::stream::empty::<Result<String, ProviderError>>());
            return Err(RegistryError::NotFound(id.to_string()));
        }

        match next {
            Some(Ok(fragment)) => {
                metrics::record_fragment(self.kind);
                Ok(Pull::Fragment(fragment))
            }
            Some(Err(source)) => {
                drop(producer);
                self.retire(id, &session, "failed");
                Err(RegistryError::Producer {
                    id: id.to_string(),
                    source,
                })
            }
            None => {
                drop(producer);
                self.retire(id, &session, "exhausted");
                Ok(Pull::Exhausted)
            }
        }
    }

    /// Remove `id`, releasing its producer. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                self.record_closed("removed");
                true
            }
            None => false,
        }
    }

    /// Remove sessions that have not been pulled for at least `max_idle`.
    /// Sessions with a pull in progress are skipped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.now_ms();
        let max_idle_ms = max_idle.as_millis() as u64;

        let stale: Vec<(String, Arc<Session>)> = self
            .sessions
            .iter()
            .filter(|entry| {
                let last = entry.value().last_active_ms.load(Ordering::SeqCst);
                now.saturating_sub(last) >= max_idle_ms
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (id, session) in stale {
            if session.producer.try_lock().is_err() {
                continue;
            }
            if self.retire(&id, &session, "evicted") {
                tracing::info!(kind = self.kind, session_id = %id, "Idle session evicted");
                evicted += 1;
            }
        }
        evicted
    }

    /// Remove `id` only if it still maps to `session`. A newer session
    /// registered under the same id is left alone.
    fn retire(&self, id: &str, session: &Arc<Session>, outcome: &str) -> bool {
        session.close();
        let removed = self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, session))
            .is_some();

        if removed {
            self.record_closed(outcome);
            tracing::debug!(kind = self.kind, session_id = %id, outcome, "Session closed");
        }
        removed
    }

    fn record_closed(&self, outcome: &str) {
        metrics::record_session_closed(self.kind, outcome);
        metrics::set_active_sessions(self.kind, self.sessions.len());
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Ownership token for a registered session. Dropping it removes the
/// session (if it is still registered) and releases the producer.
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    id: String,
    session: Arc<Session>,
}

impl SessionLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn pull(&self) -> Result<Pull, RegistryError> {
        self.registry.pull(&self.id).await
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.registry.retire(&self.id, &self.session, "abandoned") {
            tracing::info!(
                kind = self.registry.kind,
                session_id = %self.id,
                "Session abandoned before exhaustion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::track_release;
    use std::sync::atomic::AtomicUsize;

    fn producer(items: Vec<Result<String, ProviderError>>) -> (FragmentStream, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let stream = track_release(futures::stream::iter(items), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (stream, released)
    }

    fn fragments(texts: &[&str]) -> (FragmentStream, Arc<AtomicUsize>) {
        producer(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    #[tokio::test]
    async fn pulls_in_order_then_removes_on_exhaustion() {
        let registry = SessionRegistry::new("reply");
        let (stream, released) = fragments(&["Hello", " world"]);
        registry.register("abc", stream).unwrap();

        assert_eq!(registry.pull("abc").await.unwrap(), Pull::Fragment("Hello".into()));
        assert_eq!(registry.pull("abc").await.unwrap(), Pull::Fragment(" world".into()));
        assert_eq!(registry.pull("abc").await.unwrap(), Pull::Exhausted);

        assert!(!registry.contains("abc"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            registry.pull("abc").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_overwrite() {
        let registry = SessionRegistry::new("reply");
        let (first, _) = fragments(&["first"]);
        let (second, second_released) = fragments(&["second"]);

        registry.register("dup", first).unwrap();
        assert!(matches!(
            registry.register("dup", second),
            Err(RegistryError::Duplicate(_))
        ));
        assert_eq!(second_released.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pull("dup").await.unwrap(), Pull::Fragment("first".into()));
    }

    #[tokio::test]
    async fn producer_failure_removes_session() {
        let registry = SessionRegistry::new("reply");
        let (stream, released) = producer(vec![
            Ok("a".into()),
            Err(ProviderError::NetworkError("reset".into())),
        ]);
        registry.register("f", stream).unwrap();

        assert!(registry.pull("f").await.is_ok());
        let err = registry.pull("f").await.unwrap_err();
        assert_eq!(err.status_code(), 502);
        assert!(!registry.contains("f"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_releases() {
        let registry = SessionRegistry::new("material");
        let (stream, released) = fragments(&["a", "b"]);
        registry.register("m", stream).unwrap();

        assert!(registry.remove("m"));
        assert!(!registry.remove("m"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropping_lease_removes_session() {
        let registry = Arc::new(SessionRegistry::new("reply"));
        let (stream, released) = fragments(&["a", "b", "c"]);

        let lease = registry.register_leased("lease", stream).unwrap();
        assert_eq!(lease.pull().await.unwrap(), Pull::Fragment("a".into()));
        drop(lease);

        assert!(!registry.contains("lease"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_lease_does_not_remove_newer_session() {
        let registry = Arc::new(SessionRegistry::new("reply"));
        let (first, _) = fragments(&["a"]);
        let lease = registry.register_leased("reuse", first).unwrap();
        assert_eq!(lease.pull().await.unwrap(), Pull::Fragment("a".into()));
        assert_eq!(lease.pull().await.unwrap(), Pull::Exhausted);

        let (second, _) = fragments(&["b"]);
        registry.register("reuse", second).unwrap();
        drop(lease);

        assert!(registry.contains("reuse"));
    }

    #[tokio::test]
    async fn evicts_idle_sessions() {
        let registry = SessionRegistry::new("material");
        let (stream, released) = fragments(&["a"]);
        registry.register("idle", stream).unwrap();

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_idle(Duration::ZERO), 1);
        assert!(registry.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_pulls_on_one_id_wait_their_turn() {
        let registry = Arc::new(SessionRegistry::new("material"));
        let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
        registry
            .register("same", Box::pin(rx.map(Ok::<String, ProviderError>)))
            .unwrap();

        let spawn_pull = || {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.pull("same").await })
        };

        let first = spawn_pull();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = spawn_pull();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!first.is_finished());
        assert!(!second.is_finished());

        tx.unbounded_send("a".to_string()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Pull::Fragment("a".into()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        tx.unbounded_send("b".to_string()).unwrap();
        assert_eq!(second.await.unwrap().unwrap(), Pull::Fragment("b".into()));

        drop(tx);
        assert_eq!(registry.pull("same").await.unwrap(), Pull::Exhausted);
        assert!(!registry.contains("same"));
    }

    #[tokio::test]
    async fn concurrent_pulls_see_each_fragment_once_in_order() {
        let registry = SessionRegistry::new("reply");
        let texts = ["one", "two", "three", "four", "five"];
        let (stream, released) = fragments(&texts);
        registry.register("same", stream).unwrap();

        let pulled = futures::future::join_all(texts.iter().map(|_| registry.pull("same"))).await;
        let pulled: Vec<Pull> = pulled.into_iter().map(Result::unwrap).collect();

        let expected: Vec<Pull> = texts.iter().map(|t| Pull::Fragment(t.to_string())).collect();
        assert_eq!(pulled, expected);
        assert_eq!(registry.pull("same").await.unwrap(), Pull::Exhausted);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn independent_ids_do_not_block_each_other() {
        let registry = Arc::new(SessionRegistry::new("reply"));
        let stuck: FragmentStream =
            Box::pin(futures::stream::pending::<Result<String, ProviderError>>());
        registry.register("stuck", stuck).unwrap();
        let (other, _) = fragments(&["free"]);
        registry.register("other", other).unwrap();

        let blocked = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.pull("stuck").await })
        };
        tokio::task::yield_now().await;

        let pulled = tokio::time::timeout(Duration::from_secs(1), registry.pull("other"))
            .await
            .expect("pull on an independent id should not block");
        assert_eq!(pulled.unwrap(), Pull::Fragment("free".into()));

        blocked.abort();
    }
}
