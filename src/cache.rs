//! Process-wide cache of analyzed players.
//!
//! One entry per [`PlayerIdentity`]. Population is single-flight: when several
//! requests miss on the same identity at once, only the first runs the
//! fetch-and-analyze step and the rest wait for its result. Failed analyses
//! are never stored, so the next request for that identity tries again.
//!
//! The cache is cheap to clone; clones share the same entries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::error::ResolveError;
use crate::player::{AnalysisResult, PlayerIdentity};

#[derive(Clone)]
pub struct PlayerCache {
    inner: Cache<PlayerIdentity, Arc<AnalysisResult>>,
}

impl PlayerCache {
    /// Unbounded cache that keeps entries for the process lifetime.
    pub fn new() -> Self {
        Self::with_limits(None, None)
    }

    /// Cache with an optional entry bound and time-to-live.
    pub fn with_limits(capacity: Option<u64>, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder();
        if let Some(capacity) = capacity {
            builder = builder.max_capacity(capacity);
        }
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
        }
    }

    /// Return the cached analysis for `identity`, running `fetch_and_analyze`
    /// on a miss.
    ///
    /// Concurrent misses for the same identity share one in-flight call.
    pub async fn get_or_create<F, Fut>(
        &self,
        identity: &PlayerIdentity,
        fetch_and_analyze: F,
    ) -> Result<Arc<AnalysisResult>, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisResult, ResolveError>>,
    {
        if let Some(hit) = self.inner.get(identity).await {
            tracing::debug!("Player cache hit for {}", identity);
            return Ok(hit);
        }

        self.inner
            .try_get_with(identity.clone(), async move {
                tracing::info!("Player cache miss for {}, analyzing", identity);
                fetch_and_analyze().await.map(Arc::new)
            })
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    /// Drop the entry for `identity` so the next request re-analyzes it.
    pub async fn invalidate(&self, identity: &PlayerIdentity) {
        tracing::info!("Invalidating cached player {}", identity);
        self.inner.invalidate(identity).await;
    }

    /// Number of cached players, after applying pending inserts and
    /// expirations.
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl Default for PlayerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity::from_url(&format!("https://www.youtube.com/s/player/{id}/base.js")).unwrap()
    }

    fn analysis(timestamp: u64) -> AnalysisResult {
        AnalysisResult {
            sig_transform_source: "function (a) { return a; }".to_string(),
            n_transform_source: "function (a) { return a; }".to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = PlayerCache::new();
        let calls = AtomicUsize::new(0);
        let id = identity("aaaa1111");

        for _ in 0..3 {
            let result = cache
                .get_or_create(&id, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(analysis(19876))
                })
                .await
                .unwrap();
            assert_eq!(result.timestamp, 19876);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_analysis() {
        let cache = PlayerCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = identity("bbbb2222");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                let id = id.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_create(&id, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(analysis(20000))
                        })
                        .await
                })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = PlayerCache::new();
        let calls = AtomicUsize::new(0);
        let id = identity("cccc3333");

        let err = cache
            .get_or_create(&id, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResolveError::PlayerFetch("connection reset".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::PlayerFetch(_)));
        assert_eq!(cache.entry_count().await, 0);

        let result = cache
            .get_or_create(&id, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(analysis(1))
            })
            .await
            .unwrap();
        assert_eq!(result.timestamp, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let cache = PlayerCache::new();
        let a = cache
            .get_or_create(&identity("dddd4444"), || async { Ok(analysis(1)) })
            .await
            .unwrap();
        let b = cache
            .get_or_create(&identity("eeee5555"), || async { Ok(analysis(2)) })
            .await
            .unwrap();
        assert_eq!((a.timestamp, b.timestamp), (1, 2));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reanalysis() {
        let cache = PlayerCache::new();
        let id = identity("ffff6666");
        cache
            .get_or_create(&id, || async { Ok(analysis(1)) })
            .await
            .unwrap();
        cache.invalidate(&id).await;
        let result = cache
            .get_or_create(&id, || async { Ok(analysis(2)) })
            .await
            .unwrap();
        assert_eq!(result.timestamp, 2);
    }

    #[tokio::test]
    async fn test_ttl_expires_entries() {
        let cache = PlayerCache::with_limits(None, Some(Duration::from_millis(50)));
        let id = identity("abab7777");
        cache
            .get_or_create(&id, || async { Ok(analysis(1)) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = cache
            .get_or_create(&id, || async { Ok(analysis(2)) })
            .await
            .unwrap();
        assert_eq!(result.timestamp, 2);
    }
}
