use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{EntityRepository, RepoError};
use crate::domain::entities::{ReportRecord, TemplateRecord};
use crate::domain::versions::Versionable;

use super::OutageSwitch;

const STORE: &str = "entity store";

/// An entity that can be owned and overwritten from its own snapshot.
pub trait SnapshotTarget: Versionable + Clone {
    fn owner(&self) -> &str;

    fn apply(&mut self, payload: &Self::Payload, now: OffsetDateTime);
}

impl SnapshotTarget for TemplateRecord {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn apply(&mut self, payload: &Self::Payload, now: OffsetDateTime) {
        self.name = payload.name.clone();
        self.description = payload.description.clone();
        self.tags = payload.tags.clone();
        self.configuration = payload.configuration.clone();
        self.updated_at = now;
    }
}

impl SnapshotTarget for ReportRecord {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn apply(&mut self, payload: &Self::Payload, now: OffsetDateTime) {
        self.name = payload.name.clone();
        self.description = payload.description.clone();
        self.tags = payload.tags.clone();
        self.content = payload.content.clone();
        self.updated_at = now;
    }
}

pub struct InMemoryEntities<E> {
    rows: RwLock<HashMap<Uuid, E>>,
    outage: OutageSwitch,
}

impl<E> Default for InMemoryEntities<E> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            outage: OutageSwitch::default(),
        }
    }
}

impl<E: SnapshotTarget> InMemoryEntities<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    pub async fn insert(&self, entity: E) {
        self.rows.write().await.insert(entity.id(), entity);
    }

    /// Replace a stored entity, as an ordinary edit would.
    pub async fn update(&self, entity: E) -> Result<(), RepoError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entity.id()) {
            Some(existing) => {
                *existing = entity;
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }
}

#[async_trait]
impl<E> EntityRepository<E> for InMemoryEntities<E>
where
    E: SnapshotTarget + Send + Sync + 'static,
{
    async fn get(&self, entity_id: Uuid, owner: &str) -> Result<E, RepoError> {
        self.outage.check(STORE)?;
        self.rows
            .read()
            .await
            .get(&entity_id)
            .filter(|entity| entity.owner() == owner)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn apply_snapshot(&self, entity_id: Uuid, payload: &E::Payload) -> Result<E, RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        let entity = rows.get_mut(&entity_id).ok_or(RepoError::NotFound)?;
        entity.apply(payload, OffsetDateTime::now_utc());
        Ok(entity.clone())
    }

    async fn delete(&self, entity_id: Uuid, owner: &str) -> Result<(), RepoError> {
        self.outage.check(STORE)?;
        let mut rows = self.rows.write().await;
        match rows.get(&entity_id) {
            Some(entity) if entity.owner() == owner => {
                rows.remove(&entity_id);
                Ok(())
            }
            _ => Err(RepoError::NotFound),
        }
    }
}
