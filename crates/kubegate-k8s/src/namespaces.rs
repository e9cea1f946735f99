use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Time-boxed cache of a cluster's namespace names.
///
/// Reads of a fresh entry only take the read lock. Refreshes are serialized
/// through `refresh`, so concurrent callers that find the entry stale wait for
/// the one in-flight fetch and then reuse its result instead of issuing their
/// own upstream call.
#[derive(Default)]
pub(crate) struct NamespaceCache {
    entry: RwLock<Option<CacheEntry>>,
    refresh: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
struct CacheEntry {
    namespaces: Arc<[String]>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

impl NamespaceCache {
    /// Return the cached list if it is younger than `ttl`, otherwise run
    /// `fetch` once and store its result.
    pub(crate) async fn get_or_refresh<F, Fut, E>(
        &self,
        ttl: Duration,
        fetch: F,
    ) -> Result<Arc<[String]>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, E>>,
    {
        if let Some(namespaces) = self.fresh(ttl) {
            return Ok(namespaces);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the gate
        if let Some(namespaces) = self.fresh(ttl) {
            return Ok(namespaces);
        }

        let namespaces: Arc<[String]> = fetch().await?.into();
        *self.entry.write() = Some(CacheEntry {
            namespaces: Arc::clone(&namespaces),
            fetched_at: Instant::now(),
        });
        Ok(namespaces)
    }

    fn fresh(&self, ttl: Duration) -> Option<Arc<[String]>> {
        let now = Instant::now();
        self.entry
            .read()
            .as_ref()
            .filter(|entry| entry.is_fresh(ttl, now))
            .map(|entry| Arc::clone(&entry.namespaces))
    }

    /// When the cached list was fetched, if ever
    pub(crate) fn last_fetch(&self) -> Option<Instant> {
        self.entry.read().as_ref().map(|entry| entry.fetched_at)
    }
}
