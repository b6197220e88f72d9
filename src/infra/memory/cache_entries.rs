use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{
    CacheEntriesRepo, CacheEntryRecord, CacheLookup, CategoryCount, DurableCacheStats, RepoError,
    UpsertCacheEntry,
};
use crate::cache::FallbackStore;

use super::OutageSwitch;

const STORE: &str = "cache entry store";

/// Durable-cache stand-in backed by a process-local map.
#[derive(Default)]
pub struct InMemoryCacheEntries {
    entries: FallbackStore,
    outage: OutageSwitch,
}

impl InMemoryCacheEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheEntriesRepo for InMemoryCacheEntries {
    async fn lookup_entry(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> Result<CacheLookup, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.lookup(key, now))
    }

    async fn upsert_entry(&self, entry: UpsertCacheEntry) -> Result<CacheEntryRecord, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.upsert(entry))
    }

    async fn delete_entry(&self, key: &str) -> Result<bool, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.remove(key))
    }

    async fn delete_category(&self, category: &str) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.remove_category(category))
    }

    async fn clear_entries(&self) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.clear())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.remove_expired(now))
    }

    async fn entry_stats(&self) -> Result<DurableCacheStats, RepoError> {
        self.outage.check(STORE)?;
        Ok(DurableCacheStats {
            total_entries: self.entries.len() as u64,
            access_surplus: self.entries.access_surplus(),
        })
    }

    async fn category_counts(&self) -> Result<Vec<CategoryCount>, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.entries.category_counts())
    }
}
