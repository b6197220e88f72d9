use std::cmp::Reverse;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{RepoError, VersionRecord, VersionsRepo};
use crate::application::versions::RenumberPlan;

use super::OutageSwitch;

const STORE: &str = "version store";
const NUMBER_CONSTRAINT: &str = "entity_versions_entity_number_key";

/// Version history held in process memory with the same uniqueness rules as the table.
#[derive(Default)]
pub struct InMemoryVersions {
    rows: RwLock<Vec<VersionRecord>>,
    outage: OutageSwitch,
    renumbering: OutageSwitch,
}

impl InMemoryVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call while offline.
    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    /// Fails only renumbering while offline.
    pub fn renumbering(&self) -> &OutageSwitch {
        &self.renumbering
    }

    pub async fn snapshot(&self) -> Vec<VersionRecord> {
        self.rows.read().await.clone()
    }
}

fn clashes(rows: &[VersionRecord], entity_id: Uuid, number: i32, except: Uuid) -> bool {
    rows.iter()
        .any(|r| r.entity_id == entity_id && r.version_number == number && r.id != except)
}

fn chronological(rows: &[VersionRecord], entity_id: Uuid) -> Vec<VersionRecord> {
    let mut versions: Vec<VersionRecord> = rows
        .iter()
        .filter(|r| r.entity_id == entity_id)
        .cloned()
        .collect();
    versions.sort_by_key(|v| (v.created_at, v.version_number));
    versions
}

/// Hand the current marker to the newest surviving version of the entity.
fn promote_newest(rows: &mut [VersionRecord], entity_id: Uuid) {
    if let Some(newest) = rows
        .iter_mut()
        .filter(|r| r.entity_id == entity_id)
        .max_by_key(|r| (r.created_at, r.version_number))
    {
        newest.is_current = true;
    }
}

#[async_trait]
impl VersionsRepo for InMemoryVersions {
    async fn insert_version(&self, record: VersionRecord) -> Result<(), RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        if rows.iter().any(|r| r.id == record.id) {
            return Err(RepoError::Duplicate {
                constraint: "entity_versions_pkey".to_string(),
            });
        }
        if clashes(&rows, record.entity_id, record.version_number, record.id) {
            return Err(RepoError::Duplicate {
                constraint: NUMBER_CONSTRAINT.to_string(),
            });
        }
        rows.push(record);
        Ok(())
    }

    async fn find_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError> {
        self.outage.check(STORE)?;
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn max_version_number(&self, entity_id: Uuid) -> Result<Option<i32>, RepoError> {
        self.outage.check(STORE)?;
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .map(|r| r.version_number)
            .max())
    }

    async fn list_recent(
        &self,
        entity_id: Uuid,
        limit: u32,
    ) -> Result<Vec<VersionRecord>, RepoError> {
        self.outage.check(STORE)?;
        let mut versions = chronological(&self.rows.read().await, entity_id);
        versions.reverse();
        versions.truncate(limit as usize);
        Ok(versions)
    }

    async fn list_chronological(&self, entity_id: Uuid) -> Result<Vec<VersionRecord>, RepoError> {
        self.outage.check(STORE)?;
        Ok(chronological(&self.rows.read().await, entity_id))
    }

    async fn count_versions(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .count() as u64)
    }

    async fn prune_versions(&self, entity_id: Uuid, keep: u32) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        let mut newest = chronological(&rows, entity_id);
        newest.sort_by_key(|v| Reverse((v.created_at, v.version_number)));
        let doomed: Vec<Uuid> = newest
            .iter()
            .skip(keep as usize)
            .map(|v| v.id)
            .collect();

        let marker_removed = newest
            .iter()
            .skip(keep as usize)
            .any(|v| v.is_current);
        rows.retain(|r| !doomed.contains(&r.id));
        if marker_removed {
            promote_newest(&mut rows, entity_id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        let Some(index) = rows.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = rows.remove(index);
        if removed.is_current {
            promote_newest(&mut rows, removed.entity_id);
        }
        Ok(Some(removed))
    }

    async fn delete_versions_for_entity(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.entity_id != entity_id);
        Ok((before - rows.len()) as u64)
    }

    async fn apply_renumbering(&self, plan: &RenumberPlan) -> Result<(), RepoError> {
        self.outage.check(STORE)?;
        self.renumbering.check(STORE)?;

        let mut rows = self.rows.write().await;
        // Work on a copy so a failed phase leaves the committed rows untouched.
        let mut staged = rows.clone();

        for phase in [
            plan.temporary_numbers().collect::<Vec<_>>(),
            plan.final_numbers().collect::<Vec<_>>(),
        ] {
            for (version_id, number) in phase {
                if clashes(&staged, plan.entity_id, number, version_id) {
                    return Err(RepoError::Duplicate {
                        constraint: NUMBER_CONSTRAINT.to_string(),
                    });
                }
                let row = staged
                    .iter_mut()
                    .find(|r| r.id == version_id && r.entity_id == plan.entity_id)
                    .ok_or_else(|| RepoError::Integrity {
                        message: format!("version {version_id} vanished during renumbering"),
                    })?;
                row.version_number = number;
            }
        }

        *rows = staged;
        Ok(())
    }

    async fn mark_current(&self, entity_id: Uuid, version_id: Uuid) -> Result<bool, RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        if !rows
            .iter()
            .any(|r| r.id == version_id && r.entity_id == entity_id)
        {
            return Ok(false);
        }
        for row in rows.iter_mut().filter(|r| r.entity_id == entity_id) {
            row.is_current = row.id == version_id;
        }
        Ok(true)
    }

    async fn find_marked_current(
        &self,
        entity_id: Uuid,
    ) -> Result<Option<VersionRecord>, RepoError> {
        self.outage.check(STORE)?;
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|r| r.entity_id == entity_id && r.is_current)
            .cloned())
    }
}
