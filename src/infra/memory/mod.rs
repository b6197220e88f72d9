//! In-process repository implementations.
//!
//! Used when no database is configured and by the integration tests. Each
//! repository can be switched offline, after which every call fails with
//! `RepoError::Unavailable` the way a dropped database connection would.

mod cache_entries;
mod entities;
mod versions;

pub use cache_entries::InMemoryCacheEntries;
pub use entities::{InMemoryEntities, SnapshotTarget};
pub use versions::InMemoryVersions;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::repos::RepoError;

/// Availability toggle shared by the in-memory repositories.
#[derive(Debug, Default)]
pub struct OutageSwitch {
    offline: AtomicBool,
}

impl OutageSwitch {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, store: &str) -> Result<(), RepoError> {
        if self.is_offline() {
            return Err(RepoError::unavailable(format!("{store} is offline")));
        }
        Ok(())
    }
}
