use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Key/value backend with TTL used to persist resolved sets across resolvers.
///
/// Implementations must make `get`, `set` and `delete` individually atomic.
/// Callers do not rely on read-after-write consistency across processes.
#[async_trait]
pub trait PersistentCache: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Capability probe. Unavailable backends are skipped by [`probe_backend`].
    async fn available(&self) -> bool {
        true
    }

    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Removes `key`.
    async fn delete(&self, key: &str);

    /// Removes every key starting with `prefix`.
    ///
    /// Returns `false` when the backend cannot enumerate its keys; such
    /// entries then only disappear through TTL expiry.
    async fn delete_prefix(&self, _prefix: &str) -> bool {
        false
    }
}

#[async_trait]
impl<T> PersistentCache for Arc<T>
where
    T: PersistentCache + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn available(&self) -> bool {
        (**self).available().await
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        (**self).set(key, value, ttl).await;
    }

    async fn delete(&self, key: &str) {
        (**self).delete(key).await;
    }

    async fn delete_prefix(&self, prefix: &str) -> bool {
        (**self).delete_prefix(prefix).await
    }
}

/// No-op cache implementation; resolution stays in-memory only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl PersistentCache for NoCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) {}

    async fn delete(&self, _key: &str) {}

    async fn delete_prefix(&self, _prefix: &str) -> bool {
        true
    }
}

/// Picks the first available backend in preference order.
///
/// Falls back to [`NoCache`] when none of the candidates is available.
pub async fn probe_backend(
    candidates: Vec<Arc<dyn PersistentCache>>,
) -> Arc<dyn PersistentCache> {
    for candidate in candidates {
        if candidate.available().await {
            tracing::debug!(backend = candidate.name(), "selected persistent cache backend");
            return candidate;
        }
        tracing::debug!(backend = candidate.name(), "persistent cache backend unavailable");
    }
    Arc::new(NoCache)
}
