//! Version history for templates and reports.
//!
//! Snapshots are numbered `1..N` per entity in creation order. Creation can
//! deduplicate against existing snapshots, retention keeps the newest
//! `retention_cap` rows, and every deletion is followed by a renumbering pass so
//! the sequence stays contiguous.

mod renumber;
mod types;

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::repos::{EntityRepository, RepoError, VersionRecord, VersionsRepo};
use crate::domain::versions::{SnapshotError, Versionable};

pub use renumber::{RENUMBER_OFFSET, RenumberAssignment, RenumberPlan};
pub use types::{ReportSnapshot, TemplateSnapshot};

pub const DEFAULT_RETENTION_CAP: u32 = 10;
pub const DEFAULT_LIST_LIMIT: u32 = 10;
/// Upper bound on the retention cap; keeps regular numbers clear of `RENUMBER_OFFSET`.
pub const MAX_RETENTION_CAP: u32 = 1_000;

const METRIC_VERSIONS_CREATED: &str = "keepsake_versions_created_total";
const METRIC_VERSIONS_PRUNED: &str = "keepsake_versions_pruned_total";
const METRIC_VERSIONS_RENUMBER: &str = "keepsake_versions_renumber_total";
const METRIC_VERSIONS_RENUMBER_FAILED: &str = "keepsake_versions_renumber_failed_total";

#[derive(Debug, Error)]
pub enum VersionServiceError {
    #[error("version or entity not found")]
    NotFound,
    #[error("version {version_number} of entity {entity_id} was claimed by a concurrent writer")]
    Conflict { entity_id: Uuid, version_number: i32 },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("version store unavailable: {0}")]
    TransientStoreFailure(String),
    #[error("version deleted but renumbering entity {entity_id} failed: {source}")]
    Renumbering {
        entity_id: Uuid,
        #[source]
        source: RepoError,
    },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Repo(RepoError),
}

impl VersionServiceError {
    /// Conflicts are resolved by recomputing the number and trying again; store
    /// failures by repeating the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            VersionServiceError::Conflict { .. } | VersionServiceError::TransientStoreFailure(_) => {
                true
            }
            VersionServiceError::Repo(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<RepoError> for VersionServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => VersionServiceError::NotFound,
            RepoError::InvalidInput { message } => VersionServiceError::Validation(message),
            RepoError::Unavailable(message) => VersionServiceError::TransientStoreFailure(message),
            RepoError::Timeout => {
                VersionServiceError::TransientStoreFailure("database timeout".to_string())
            }
            other => VersionServiceError::Repo(other),
        }
    }
}

/// Caller-selected behaviour for `create_version`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Return an existing version whose snapshot equals the entity's fields instead of inserting.
    pub dedupe: bool,
    /// Recompute the number and retry once after a `Conflict`.
    pub retry_on_conflict: bool,
}

impl CreateOptions {
    pub fn deduplicated() -> Self {
        Self {
            dedupe: true,
            retry_on_conflict: false,
        }
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry_on_conflict = retry;
        self
    }
}

#[derive(Clone)]
pub struct VersionService {
    repo: Arc<dyn VersionsRepo>,
    retention_cap: u32,
    retry_on_conflict: bool,
}

impl VersionService {
    pub fn new(repo: Arc<dyn VersionsRepo>) -> Self {
        Self::with_retention(repo, DEFAULT_RETENTION_CAP)
    }

    /// Build a service with a custom retention cap, clamped to `1..=MAX_RETENTION_CAP`.
    pub fn with_retention(repo: Arc<dyn VersionsRepo>, retention_cap: u32) -> Self {
        Self {
            repo,
            retention_cap: retention_cap.clamp(1, MAX_RETENTION_CAP),
            retry_on_conflict: false,
        }
    }

    /// Retry every create once after a `Conflict`, whatever the caller's options say.
    pub fn retry_conflicts(mut self, retry: bool) -> Self {
        self.retry_on_conflict = retry;
        self
    }

    pub fn retention_cap(&self) -> u32 {
        self.retention_cap
    }

    #[instrument(skip_all, fields(kind = %E::KIND, entity_id = %entity.id()))]
    pub async fn create_version<E: Versionable>(
        &self,
        entity: &E,
        options: CreateOptions,
    ) -> Result<VersionRecord, VersionServiceError> {
        let payload = entity.to_snapshot()?;
        E::validate_snapshot(&payload)?;
        let entity_id = entity.id();

        if options.dedupe
            && let Some(existing) = self.find_matching::<E>(entity_id, &payload).await?
        {
            debug!(
                version_id = %existing.id,
                version_number = existing.version_number,
                "snapshot matches existing version, skipping insert"
            );
            return Ok(existing);
        }

        let snapshot = serde_json::to_value(&payload)
            .map_err(|err| SnapshotError::Decode(err.to_string()))?;

        let mut retried = false;
        let record = loop {
            let version_number = self.next_version_number(entity_id).await?;
            let record = VersionRecord {
                id: Uuid::new_v4(),
                entity_kind: E::KIND,
                entity_id,
                version_number,
                snapshot: snapshot.clone(),
                is_current: false,
                created_at: OffsetDateTime::now_utc(),
            };

            match self.repo.insert_version(record.clone()).await {
                Ok(()) => break record,
                Err(RepoError::Duplicate { constraint }) => {
                    if (options.retry_on_conflict || self.retry_on_conflict) && !retried {
                        warn!(
                            version_number,
                            constraint = %constraint,
                            "version number claimed concurrently, retrying once"
                        );
                        retried = true;
                        continue;
                    }
                    return Err(VersionServiceError::Conflict {
                        entity_id,
                        version_number,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        };

        counter!(METRIC_VERSIONS_CREATED, "kind" => E::KIND.as_str()).increment(1);
        info!(
            version_id = %record.id,
            version_number = record.version_number,
            "created version"
        );

        if self.enforce_retention(entity_id).await? {
            // Pruning renumbers the survivors, including the row just inserted.
            if let Some(updated) = self.repo.find_version(record.id).await? {
                return Ok(updated);
            }
        }

        Ok(record)
    }

    /// Newest first by creation time, capped at `limit` (default 10).
    pub async fn list_versions(
        &self,
        entity_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<VersionRecord>, VersionServiceError> {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_RETENTION_CAP);
        Ok(self.repo.list_recent(entity_id, limit).await?)
    }

    pub async fn get_version(&self, version_id: Uuid) -> Result<VersionRecord, VersionServiceError> {
        self.repo
            .find_version(version_id)
            .await?
            .ok_or(VersionServiceError::NotFound)
    }

    /// Identify the version matching the entity's live fields.
    ///
    /// A sole version is current by definition. Otherwise the first version by
    /// number whose snapshot equals the live fields wins; `None` means the
    /// entity has diverged from every recorded snapshot.
    pub async fn current_version_id<E: Versionable>(
        &self,
        entity: &E,
    ) -> Result<Option<Uuid>, VersionServiceError> {
        let mut versions = self.repo.list_chronological(entity.id()).await?;
        if versions.len() == 1 {
            return Ok(versions.pop().map(|v| v.id));
        }

        let payload = entity.to_snapshot()?;
        versions.sort_by_key(|v| v.version_number);
        Ok(first_match::<E>(&versions, &payload).map(|v| v.id))
    }

    /// Restore `version_id` onto `entity`, preserving the pre-restore state first.
    #[instrument(skip_all, fields(kind = %E::KIND, entity_id = %entity.id(), %version_id))]
    pub async fn restore<E, R>(
        &self,
        entities: &R,
        entity: &E,
        version_id: Uuid,
    ) -> Result<E, VersionServiceError>
    where
        E: Versionable + Send + Sync + 'static,
        R: EntityRepository<E> + ?Sized,
    {
        let version = self
            .repo
            .find_version(version_id)
            .await?
            .ok_or(VersionServiceError::NotFound)?;

        if version.entity_id != entity.id() || version.entity_kind != E::KIND {
            return Err(VersionServiceError::NotFound);
        }

        let payload = decode_snapshot::<E>(&version)?;
        E::validate_snapshot(&payload)?;

        self.create_version(entity, CreateOptions::deduplicated())
            .await?;

        let restored = entities.apply_snapshot(entity.id(), &payload).await?;
        info!(
            version_number = version.version_number,
            "restored entity from version"
        );
        Ok(restored)
    }

    /// Delete a version and close the resulting gap.
    ///
    /// Returns `Ok(false)` when no such version exists. A renumbering failure is
    /// reported as `Renumbering`; the deletion itself stands.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, version_id: Uuid) -> Result<bool, VersionServiceError> {
        let Some(deleted) = self.repo.delete_version(version_id).await? else {
            return Ok(false);
        };

        info!(
            entity_id = %deleted.entity_id,
            version_number = deleted.version_number,
            "deleted version"
        );

        if let Err(source) = self.renumber(deleted.entity_id).await {
            counter!(METRIC_VERSIONS_RENUMBER_FAILED).increment(1);
            error!(
                entity_id = %deleted.entity_id,
                error = %source,
                "renumbering after deletion failed; version numbers may contain a gap"
            );
            return Err(VersionServiceError::Renumbering {
                entity_id: deleted.entity_id,
                source,
            });
        }

        Ok(true)
    }

    /// Mark exactly one report version as current.
    pub async fn set_current(
        &self,
        entity_id: Uuid,
        version_id: Uuid,
    ) -> Result<(), VersionServiceError> {
        let version = self.get_version(version_id).await?;
        if version.entity_id != entity_id {
            return Err(VersionServiceError::NotFound);
        }
        if !version.entity_kind.tracks_current_marker() {
            return Err(VersionServiceError::Validation(format!(
                "{} versions do not carry a current marker",
                version.entity_kind
            )));
        }

        if !self.repo.mark_current(entity_id, version_id).await? {
            return Err(VersionServiceError::NotFound);
        }
        debug!(%entity_id, %version_id, "marked version current");
        Ok(())
    }

    /// The version explicitly marked current, if any.
    pub async fn flagged_current(
        &self,
        entity_id: Uuid,
    ) -> Result<Option<VersionRecord>, VersionServiceError> {
        Ok(self.repo.find_marked_current(entity_id).await?)
    }

    /// Remove all history for an entity that has been deleted.
    pub async fn purge_entity(&self, entity_id: Uuid) -> Result<u64, VersionServiceError> {
        let removed = self.repo.delete_versions_for_entity(entity_id).await?;
        debug!(%entity_id, removed, "purged version history");
        Ok(removed)
    }

    /// Delete the entity through its repository, then drop its history.
    pub async fn delete_entity<E, R>(
        &self,
        entities: &R,
        entity_id: Uuid,
        owner: &str,
    ) -> Result<u64, VersionServiceError>
    where
        E: Versionable + Send + Sync + 'static,
        R: EntityRepository<E> + ?Sized,
    {
        entities.delete(entity_id, owner).await?;
        self.purge_entity(entity_id).await
    }

    /// Rewrite the entity's version numbers to `1..M` in creation order.
    pub async fn renumber(&self, entity_id: Uuid) -> Result<(), RepoError> {
        let versions = self.repo.list_chronological(entity_id).await?;
        let plan = RenumberPlan::for_chronological(entity_id, &versions);
        if plan.is_noop() {
            return Ok(());
        }

        self.repo.apply_renumbering(&plan).await?;
        counter!(METRIC_VERSIONS_RENUMBER).increment(1);
        debug!(%entity_id, versions = plan.len(), "renumbered versions");
        Ok(())
    }

    async fn next_version_number(&self, entity_id: Uuid) -> Result<i32, VersionServiceError> {
        let next = self
            .repo
            .max_version_number(entity_id)
            .await?
            .map(|n| n + 1)
            .unwrap_or(1);
        Ok(next)
    }

    async fn find_matching<E: Versionable>(
        &self,
        entity_id: Uuid,
        payload: &E::Payload,
    ) -> Result<Option<VersionRecord>, VersionServiceError> {
        let mut versions = self.repo.list_chronological(entity_id).await?;
        versions.sort_by_key(|v| v.version_number);
        Ok(first_match::<E>(&versions, payload).cloned())
    }

    /// Prune beyond the retention cap. Returns true when rows were removed.
    async fn enforce_retention(&self, entity_id: Uuid) -> Result<bool, VersionServiceError> {
        let removed = self
            .repo
            .prune_versions(entity_id, self.retention_cap)
            .await?;
        if removed == 0 {
            return Ok(false);
        }

        counter!(METRIC_VERSIONS_PRUNED).increment(removed);
        debug!(%entity_id, removed, cap = self.retention_cap, "pruned old versions");

        if let Err(err) = self.renumber(entity_id).await {
            counter!(METRIC_VERSIONS_RENUMBER_FAILED).increment(1);
            warn!(%entity_id, error = %err, "renumbering after pruning failed");
        }
        Ok(true)
    }
}

/// Decode a stored snapshot into the entity's payload type.
pub fn decode_snapshot<E: Versionable>(
    record: &VersionRecord,
) -> Result<E::Payload, SnapshotError> {
    serde_json::from_value(record.snapshot.clone())
        .map_err(|err| SnapshotError::Decode(err.to_string()))
}

fn first_match<'a, E: Versionable>(
    versions: &'a [VersionRecord],
    payload: &E::Payload,
) -> Option<&'a VersionRecord> {
    versions.iter().find(|version| {
        if version.entity_kind != E::KIND {
            return false;
        }
        match decode_snapshot::<E>(version) {
            Ok(stored) => &stored == payload,
            Err(err) => {
                warn!(version_id = %version.id, error = %err, "skipping undecodable snapshot");
                false
            }
        }
    })
}
