//! Periodic removal of expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::store::ArtifactCache;

/// Run [`ArtifactCache::cleanup_expired`] every `interval` until the handle is aborted.
pub fn spawn_sweeper(cache: Arc<ArtifactCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            let removed = cache.cleanup_expired().await;
            debug!(target: "cache::sweeper", removed, "sweep finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::CacheConfig;

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(ArtifactCache::in_memory(CacheConfig::default()));
        cache
            .set("summary:short", json!(1), Some(Duration::from_secs(1)))
            .await;
        cache.set("summary:long", json!(2), None).await;

        let handle = spawn_sweeper(cache.clone(), Duration::from_millis(1500));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        handle.abort();
        let _ = handle.await;

        let stats = cache.stats().await;
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.misses, 0);
    }
}
