//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::versions::RenumberPlan;
use crate::domain::types::EntityKind;
use crate::domain::versions::Versionable;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Whether the failure is a property of the backend rather than of the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepoError::Unavailable(_) | RepoError::Timeout | RepoError::Persistence(_)
        )
    }
}

/// Persisted snapshot of a versioned entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionRecord {
    pub id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub version_number: i32,
    pub snapshot: Value,
    /// Meaningful for report versions only; always false for templates.
    pub is_current: bool,
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait VersionsRepo: Send + Sync {
    /// Insert a version row. A clash on `(entity_id, version_number)` is `RepoError::Duplicate`.
    async fn insert_version(&self, record: VersionRecord) -> Result<(), RepoError>;

    async fn find_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError>;

    async fn max_version_number(&self, entity_id: Uuid) -> Result<Option<i32>, RepoError>;

    /// Newest first by creation time.
    async fn list_recent(&self, entity_id: Uuid, limit: u32)
    -> Result<Vec<VersionRecord>, RepoError>;

    /// Oldest first by creation time, ties broken by version number.
    async fn list_chronological(&self, entity_id: Uuid) -> Result<Vec<VersionRecord>, RepoError>;

    async fn count_versions(&self, entity_id: Uuid) -> Result<u64, RepoError>;

    /// Delete everything except the `keep` most recent versions. Returns the number removed.
    ///
    /// When the current marker is pruned it moves to the newest survivor in the same unit of work.
    async fn prune_versions(&self, entity_id: Uuid, keep: u32) -> Result<u64, RepoError>;

    /// Delete one version, moving its current marker to the newest survivor if it carried one.
    async fn delete_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError>;

    async fn delete_versions_for_entity(&self, entity_id: Uuid) -> Result<u64, RepoError>;

    /// Apply both phases of a renumbering plan as one transaction.
    async fn apply_renumbering(&self, plan: &RenumberPlan) -> Result<(), RepoError>;

    /// Clear the current marker on every version of the entity and set it on `version_id`.
    /// Returns false when the version does not belong to the entity.
    async fn mark_current(&self, entity_id: Uuid, version_id: Uuid) -> Result<bool, RepoError>;

    async fn find_marked_current(
        &self,
        entity_id: Uuid,
    ) -> Result<Option<VersionRecord>, RepoError>;
}

/// Access to the live entities that carry version history.
#[async_trait]
pub trait EntityRepository<E: Versionable + Send + Sync + 'static>: Send + Sync {
    /// Load an entity on behalf of `owner`. An owner mismatch is `RepoError::NotFound`.
    async fn get(&self, entity_id: Uuid, owner: &str) -> Result<E, RepoError>;

    /// Overwrite the entity's snapshot-relevant fields and persist.
    async fn apply_snapshot(&self, entity_id: Uuid, payload: &E::Payload) -> Result<E, RepoError>;

    async fn delete(&self, entity_id: Uuid, owner: &str) -> Result<(), RepoError>;
}

/// Durable cache row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryRecord {
    pub cache_key: String,
    pub content_hash: String,
    pub category: String,
    pub value: Value,
    pub created_at: OffsetDateTime,
    pub last_accessed: OffsetDateTime,
    pub access_count: i64,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UpsertCacheEntry {
    pub cache_key: String,
    pub content_hash: String,
    pub category: String,
    pub value: Value,
    pub now: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Outcome of a read against the durable cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Missing,
    /// The entry had expired and has been removed.
    Expired,
    /// Access metadata has already been bumped on the returned record.
    Hit(CacheEntryRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurableCacheStats {
    pub total_entries: u64,
    /// Sum of `access_count - 1` over all rows.
    pub access_surplus: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

#[async_trait]
pub trait CacheEntriesRepo: Send + Sync {
    /// Read an entry, deleting it when `expires_at <= now` and bumping access metadata otherwise.
    async fn lookup_entry(&self, key: &str, now: OffsetDateTime)
    -> Result<CacheLookup, RepoError>;

    /// Insert or overwrite. Overwrites keep `created_at` and `access_count`.
    async fn upsert_entry(&self, entry: UpsertCacheEntry) -> Result<CacheEntryRecord, RepoError>;

    async fn delete_entry(&self, key: &str) -> Result<bool, RepoError>;

    async fn delete_category(&self, category: &str) -> Result<u64, RepoError>;

    async fn clear_entries(&self) -> Result<u64, RepoError>;

    /// Delete every entry with `expires_at < now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;

    async fn entry_stats(&self) -> Result<DurableCacheStats, RepoError>;

    async fn category_counts(&self) -> Result<Vec<CategoryCount>, RepoError>;
}
