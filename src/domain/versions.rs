use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::types::EntityKind;

/// Longest name a snapshot may carry.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("snapshot payload could not be decoded: {0}")]
    Decode(String),
}

pub trait Versionable {
    /// Snapshot-relevant fields. Equality on this type is the deduplication contract.
    type Payload: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync;

    const KIND: EntityKind;

    /// Stable identifier for the entity being versioned.
    fn id(&self) -> Uuid;

    /// Capture the entity's current snapshot-relevant fields.
    fn to_snapshot(&self) -> Result<Self::Payload, SnapshotError>;

    /// Validate a snapshot payload before it is stored or applied.
    fn validate_snapshot(payload: &Self::Payload) -> Result<(), SnapshotError>;
}

pub(crate) fn validate_name(name: &str) -> Result<(), SnapshotError> {
    if name.trim().is_empty() {
        return Err(SnapshotError::Validation("name cannot be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(SnapshotError::Validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_tags<'a>(
    tags: impl IntoIterator<Item = &'a String>,
) -> Result<(), SnapshotError> {
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(SnapshotError::Validation("tags cannot be blank".into()));
        }
    }
    Ok(())
}
