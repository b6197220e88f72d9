//! Process-local cache map used when the durable backend cannot be reached.
//!
//! Entries follow the same TTL and access accounting rules as durable rows and
//! are lost when the process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use time::OffsetDateTime;

use crate::application::repos::{CacheEntryRecord, CacheLookup, CategoryCount, UpsertCacheEntry};

use super::lock::{read_lock, write_lock};

#[derive(Default)]
pub struct FallbackStore {
    entries: RwLock<HashMap<String, CacheEntryRecord>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read with the durable semantics: expired rows are dropped, hits are counted.
    pub fn lookup(&self, key: &str, now: OffsetDateTime) -> CacheLookup {
        let mut entries = write_lock(&self.entries, "fallback.lookup");
        let expired = match entries.get(key) {
            None => return CacheLookup::Missing,
            Some(entry) => entry.expires_at <= now,
        };
        if expired {
            entries.remove(key);
            return CacheLookup::Expired;
        }

        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = now;
                entry.access_count = entry.access_count.saturating_add(1);
                CacheLookup::Hit(entry.clone())
            }
            None => CacheLookup::Missing,
        }
    }

    pub fn upsert(&self, entry: UpsertCacheEntry) -> CacheEntryRecord {
        let mut entries = write_lock(&self.entries, "fallback.upsert");
        let record = match entries.remove(&entry.cache_key) {
            Some(existing) => CacheEntryRecord {
                value: entry.value,
                content_hash: entry.content_hash,
                category: entry.category,
                last_accessed: entry.now,
                expires_at: entry.expires_at,
                ..existing
            },
            None => CacheEntryRecord {
                cache_key: entry.cache_key,
                content_hash: entry.content_hash,
                category: entry.category,
                value: entry.value,
                created_at: entry.now,
                last_accessed: entry.now,
                access_count: 1,
                expires_at: entry.expires_at,
            },
        };
        entries.insert(record.cache_key.clone(), record.clone());
        record
    }

    /// Remove and return an entry without touching its access metadata.
    pub fn take(&self, key: &str) -> Option<CacheEntryRecord> {
        write_lock(&self.entries, "fallback.take").remove(key)
    }

    pub fn peek_value(&self, key: &str) -> Option<Value> {
        read_lock(&self.entries, "fallback.peek")
            .get(key)
            .map(|entry| entry.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        write_lock(&self.entries, "fallback.remove")
            .remove(key)
            .is_some()
    }

    pub fn remove_category(&self, category: &str) -> u64 {
        let mut entries = write_lock(&self.entries, "fallback.remove_category");
        let before = entries.len();
        entries.retain(|_, entry| entry.category != category);
        (before - entries.len()) as u64
    }

    /// Drop entries with `expires_at < now`.
    pub fn remove_expired(&self, now: OffsetDateTime) -> u64 {
        let mut entries = write_lock(&self.entries, "fallback.remove_expired");
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        (before - entries.len()) as u64
    }

    pub fn clear(&self) -> u64 {
        let mut entries = write_lock(&self.entries, "fallback.clear");
        let removed = entries.len() as u64;
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        read_lock(&self.entries, "fallback.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `access_count - 1`, mirroring the durable hit approximation.
    pub fn access_surplus(&self) -> u64 {
        read_lock(&self.entries, "fallback.access_surplus")
            .values()
            .map(|entry| entry.access_count.saturating_sub(1).max(0) as u64)
            .sum()
    }

    pub fn category_counts(&self) -> Vec<CategoryCount> {
        let entries = read_lock(&self.entries, "fallback.category_counts");
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for entry in entries.values() {
            *counts.entry(entry.category.as_str()).or_default() += 1;
        }
        let mut counts: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category: category.to_string(),
                count,
            })
            .collect();
        counts.sort_by(|a, b| a.category.cmp(&b.category));
        counts
    }
}
