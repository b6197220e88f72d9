//! Gap-free renumbering of an entity's surviving versions.
//!
//! Numbers are rewritten in two passes so the `(entity_id, version_number)`
//! unique constraint holds after every single row update: first every row is
//! parked on `RENUMBER_OFFSET + index`, then every row receives `index + 1`.
//! Both passes must run inside one transaction.

use uuid::Uuid;

use crate::application::repos::VersionRecord;

/// Base of the temporary number range. Regular numbers stay below it because
/// retention caps are bounded well under this value.
pub const RENUMBER_OFFSET: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenumberAssignment {
    pub version_id: Uuid,
    pub from: i32,
    pub temporary: i32,
    pub to: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenumberPlan {
    pub entity_id: Uuid,
    pub assignments: Vec<RenumberAssignment>,
}

impl RenumberPlan {
    /// Build a plan from versions ordered oldest first.
    pub fn for_chronological(entity_id: Uuid, versions: &[VersionRecord]) -> Self {
        let assignments = versions
            .iter()
            .enumerate()
            .map(|(index, version)| {
                let index = index as i32;
                RenumberAssignment {
                    version_id: version.id,
                    from: version.version_number,
                    temporary: RENUMBER_OFFSET + index,
                    to: index + 1,
                }
            })
            .collect();

        Self {
            entity_id,
            assignments,
        }
    }

    /// True when every version already carries its target number.
    pub fn is_noop(&self) -> bool {
        self.assignments.iter().all(|a| a.from == a.to)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn temporary_numbers(&self) -> impl Iterator<Item = (Uuid, i32)> + '_ {
        self.assignments.iter().map(|a| (a.version_id, a.temporary))
    }

    pub fn final_numbers(&self) -> impl Iterator<Item = (Uuid, i32)> + '_ {
        self.assignments.iter().map(|a| (a.version_id, a.to))
    }
}
