//! Content-addressed artifact cache.
//!
//! Every call tries the durable backend first. A backend failure never reaches
//! the caller: the call is served by the process-local [`FallbackStore`] with
//! the same TTL rules and the cache reports itself as degraded until the
//! backend answers again and the fallback map has drained.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::repos::{
    CacheEntriesRepo, CacheLookup, CategoryCount, RepoError, UpsertCacheEntry,
};

use super::config::CacheConfig;
use super::keys::KeyCodec;
use super::memory::FallbackStore;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "keepsake_cache_hit_total";
const METRIC_CACHE_MISS: &str = "keepsake_cache_miss_total";
const METRIC_CACHE_EXPIRED: &str = "keepsake_cache_expired_total";
const METRIC_CACHE_FALLBACK: &str = "keepsake_cache_fallback_total";

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Hits recorded by this process.
    pub hits: u64,
    /// Misses recorded by this process.
    pub misses: u64,
    pub hit_rate: f64,
    /// Durable rows plus fallback entries.
    pub total_entries: u64,
    pub memory_entries: u64,
    /// Hits implied by stored access counters, including those from earlier processes.
    pub stored_hits: u64,
    pub fallback_active: bool,
}

pub struct ArtifactCache {
    durable: Option<Arc<dyn CacheEntriesRepo>>,
    fallback: FallbackStore,
    codec: KeyCodec,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicBool,
}

impl ArtifactCache {
    /// Cache backed by `durable`, unless the configuration disables it.
    pub fn new(durable: Arc<dyn CacheEntriesRepo>, config: CacheConfig) -> Self {
        let durable = config.durable.then_some(durable);
        Self::build(durable, config)
    }

    /// Cache that keeps every entry in process memory.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::build(None, config)
    }

    fn build(durable: Option<Arc<dyn CacheEntriesRepo>>, config: CacheConfig) -> Self {
        Self {
            durable,
            fallback: FallbackStore::new(),
            codec: KeyCodec::new(config.key_marker.clone()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Look up `key`. Expired entries are removed and count as misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = OffsetDateTime::now_utc();

        if let Some(durable) = self.durable.as_ref() {
            match durable.lookup_entry(key, now).await {
                Ok(CacheLookup::Hit(record)) => {
                    self.mark_recovered();
                    self.record_hit();
                    // A copy parked in memory was written after the durable row.
                    let newer = self.serve_and_backfill(durable.as_ref(), key, now).await;
                    return Some(newer.unwrap_or(record.value));
                }
                Ok(outcome) => {
                    self.mark_recovered();
                    if outcome == CacheLookup::Expired {
                        counter!(METRIC_CACHE_EXPIRED).increment(1);
                    }
                    if let Some(value) = self.serve_and_backfill(durable.as_ref(), key, now).await
                    {
                        self.record_hit();
                        return Some(value);
                    }
                    self.record_miss();
                    return None;
                }
                Err(err) => self.enter_fallback("get", key, &err),
            }
        }

        match self.fallback.lookup(key, now) {
            CacheLookup::Hit(record) => {
                self.record_hit();
                Some(record.value)
            }
            CacheLookup::Expired => {
                counter!(METRIC_CACHE_EXPIRED).increment(1);
                self.record_miss();
                None
            }
            CacheLookup::Missing => {
                self.record_miss();
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (or the configured default).
    ///
    /// Overwrites refresh the value and expiry but keep the access count and
    /// creation time.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = OffsetDateTime::now_utc();
        let entry = self.prepare_entry(key, value, now, ttl);

        if let Some(durable) = self.durable.as_ref() {
            match durable.upsert_entry(entry.clone()).await {
                Ok(_) => {
                    self.mark_recovered();
                    // A durable write supersedes anything parked in memory.
                    self.fallback.remove(key);
                    debug!(target: SOURCE, key, "stored cache entry");
                    return;
                }
                Err(err) => self.enter_fallback("set", key, &err),
            }
        }

        self.fallback.upsert(entry);
    }

    /// Decode a cached value into `T`. A value that no longer decodes counts as absent.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(target: SOURCE, key, error = %err, "cached value did not decode");
                None
            }
        }
    }

    pub async fn set_as<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl).await;
        Ok(())
    }

    /// Return the cached value or compute, store and return a fresh one.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Remove one entry from both stores.
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut removed = self.fallback.remove(key);
        if let Some(durable) = self.durable.as_ref() {
            match durable.delete_entry(key).await {
                Ok(found) => {
                    self.mark_recovered();
                    removed |= found;
                }
                Err(err) => self.enter_fallback("invalidate", key, &err),
            }
        }
        removed
    }

    /// Remove every entry of a category from both stores.
    pub async fn invalidate_category(&self, category: &str) -> u64 {
        let mut removed = self.fallback.remove_category(category);
        if let Some(durable) = self.durable.as_ref() {
            match durable.delete_category(category).await {
                Ok(count) => {
                    self.mark_recovered();
                    removed += count;
                }
                Err(err) => self.enter_fallback("invalidate_category", category, &err),
            }
        }
        removed
    }

    /// Delete every entry and reset the local hit/miss counters.
    pub async fn clear(&self) {
        let mut removed = self.fallback.clear();
        if let Some(durable) = self.durable.as_ref() {
            match durable.clear_entries().await {
                Ok(count) => {
                    self.mark_recovered();
                    removed += count;
                }
                Err(err) => self.enter_fallback("clear", "*", &err),
            }
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!(target: SOURCE, removed, "cleared cache");
    }

    /// Bulk-delete entries with `expires_at < now`. Meant for periodic maintenance.
    pub async fn cleanup_expired(&self) -> u64 {
        let now = OffsetDateTime::now_utc();
        let mut removed = self.fallback.remove_expired(now);
        if let Some(durable) = self.durable.as_ref() {
            match durable.delete_expired(now).await {
                Ok(count) => {
                    self.mark_recovered();
                    removed += count;
                }
                Err(err) => self.enter_fallback("cleanup_expired", "*", &err),
            }
        }
        if removed > 0 {
            counter!(METRIC_CACHE_EXPIRED).increment(removed);
            info!(target: SOURCE, removed, "removed expired cache entries");
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let memory_entries = self.fallback.len() as u64;

        let mut total_entries = memory_entries;
        let mut stored_hits = self.fallback.access_surplus();
        if let Some(durable) = self.durable.as_ref() {
            match durable.entry_stats().await {
                Ok(durable_stats) => {
                    self.mark_recovered();
                    total_entries += durable_stats.total_entries;
                    stored_hits += durable_stats.access_surplus;
                }
                Err(err) => self.enter_fallback("stats", "*", &err),
            }
        }

        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            total_entries,
            memory_entries,
            stored_hits,
            fallback_active: self.fallback_active(),
        }
    }

    /// Entry counts per category across both stores.
    pub async fn category_counts(&self) -> Vec<CategoryCount> {
        let mut counts = self.fallback.category_counts();
        if let Some(durable) = self.durable.as_ref() {
            match durable.category_counts().await {
                Ok(durable_counts) => {
                    self.mark_recovered();
                    for durable_count in durable_counts {
                        match counts
                            .iter_mut()
                            .find(|c| c.category == durable_count.category)
                        {
                            Some(existing) => existing.count += durable_count.count,
                            None => counts.push(durable_count),
                        }
                    }
                }
                Err(err) => self.enter_fallback("category_counts", "*", &err),
            }
        }
        counts.sort_by(|a, b| a.category.cmp(&b.category));
        counts
    }

    /// True while the last durable attempt failed, the fallback map still holds
    /// entries, or no durable backend is configured.
    pub fn fallback_active(&self) -> bool {
        self.durable.is_none() || self.degraded.load(Ordering::Relaxed) || !self.fallback.is_empty()
    }

    fn prepare_entry(
        &self,
        key: &str,
        value: Value,
        now: OffsetDateTime,
        ttl: Option<Duration>,
    ) -> UpsertCacheEntry {
        let ttl = self.config.resolve_ttl(ttl);
        let parsed = self.codec.parse(key);
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        let expires_at = now.checked_add(ttl).unwrap_or(OffsetDateTime::new_utc(
            time::Date::MAX,
            time::Time::MIDNIGHT,
        ));

        UpsertCacheEntry {
            cache_key: key.to_string(),
            content_hash: parsed.content_hash,
            category: parsed.category,
            value,
            now,
            expires_at,
        }
    }

    /// Serve an entry written during an outage and move it into the durable store.
    ///
    /// Any successful durable `set` drops the memory copy, so a parked entry is
    /// always newer than the durable row for the same key.
    async fn serve_and_backfill(
        &self,
        durable: &dyn CacheEntriesRepo,
        key: &str,
        now: OffsetDateTime,
    ) -> Option<Value> {
        if self.fallback.is_empty() {
            return None;
        }
        let CacheLookup::Hit(record) = self.fallback.lookup(key, now) else {
            return None;
        };

        let entry = UpsertCacheEntry {
            cache_key: record.cache_key.clone(),
            content_hash: record.content_hash.clone(),
            category: record.category.clone(),
            value: record.value.clone(),
            now,
            expires_at: record.expires_at,
        };
        match durable.upsert_entry(entry).await {
            Ok(_) => {
                self.fallback.take(key);
                info!(target: SOURCE, key, "backfilled fallback entry into durable cache");
            }
            Err(err) => self.enter_fallback("backfill", key, &err),
        }
        Some(record.value)
    }

    fn enter_fallback(&self, op: &'static str, key: &str, err: &RepoError) {
        counter!(METRIC_CACHE_FALLBACK, "op" => op).increment(1);
        let was_degraded = self.degraded.swap(true, Ordering::Relaxed);
        if !was_degraded {
            warn!(
                target: SOURCE,
                op,
                key,
                error = %err,
                "durable cache unavailable, serving from process memory"
            );
        } else {
            debug!(target: SOURCE, op, key, error = %err, "durable cache still unavailable");
        }
    }

    fn mark_recovered(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(
                target: SOURCE,
                memory_entries = self.fallback.len(),
                "durable cache reachable again"
            );
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT).increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn memory_cache() -> ArtifactCache {
        ArtifactCache::in_memory(CacheConfig::default())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = memory_cache();
        cache.set("summary:abc", json!({"q": ["x"]}), None).await;
        assert_eq!(cache.get("summary:abc").await, Some(json!({"q": ["x"]})));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn missing_key_counts_as_miss() {
        let cache = memory_cache();
        assert!(cache.get("nope").await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn clear_resets_counters() {
        let cache = memory_cache();
        cache.set("a:1", json!(1), None).await;
        cache.get("a:1").await;
        cache.get("a:2").await;
        cache.clear().await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn get_or_compute_only_computes_once() {
        let cache = memory_cache();
        let first: Result<Value, ()> = cache
            .get_or_compute("c:1", None, || async { Ok(json!("computed")) })
            .await;
        let second: Result<Value, ()> = cache
            .get_or_compute("c:1", None, || async { Ok(json!("recomputed")) })
            .await;

        assert_eq!(first, Ok(json!("computed")));
        assert_eq!(second, Ok(json!("computed")));
    }

    #[tokio::test]
    async fn typed_helpers_round_trip() {
        let cache = memory_cache();
        cache
            .set_as("c:typed", &vec!["a".to_string(), "b".to_string()], None)
            .await
            .expect("serialize");
        let value: Option<Vec<String>> = cache.get_as("c:typed").await;
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));

        let mismatched: Option<u32> = cache.get_as("c:typed").await;
        assert!(mismatched.is_none());
    }

    #[tokio::test]
    async fn invalidate_category_removes_only_that_category() {
        let cache = memory_cache();
        cache.set("summary:1", json!(1), None).await;
        cache.set("summary:2", json!(2), None).await;
        cache.set("query_gen:1", json!(3), None).await;

        assert_eq!(cache.invalidate_category("summary").await, 2);
        assert!(cache.get("query_gen:1").await.is_some());
        assert!(cache.invalidate("query_gen:1").await);
        assert!(!cache.invalidate("query_gen:1").await);
    }

    #[tokio::test]
    async fn memory_only_cache_reports_fallback() {
        let cache = memory_cache();
        assert!(cache.fallback_active());
        assert!(cache.stats().await.fallback_active);
    }
}
