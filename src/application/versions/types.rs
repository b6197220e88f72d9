use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::configuration::{ReportContent, TemplateConfiguration};
use crate::domain::entities::{ReportRecord, TemplateRecord};
use crate::domain::types::EntityKind;
use crate::domain::versions::{SnapshotError, Versionable, validate_name, validate_tags};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub configuration: TemplateConfiguration,
}

impl Versionable for TemplateRecord {
    type Payload = TemplateSnapshot;

    const KIND: EntityKind = EntityKind::Template;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_snapshot(&self) -> Result<Self::Payload, SnapshotError> {
        let payload = TemplateSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            configuration: self.configuration.clone(),
        };
        Self::validate_snapshot(&payload)?;
        Ok(payload)
    }

    fn validate_snapshot(payload: &Self::Payload) -> Result<(), SnapshotError> {
        validate_name(&payload.name)?;
        validate_tags(&payload.tags)?;
        for section in &payload.configuration.sections {
            if section.title().trim().is_empty() {
                return Err(SnapshotError::Validation(
                    "section title cannot be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub content: ReportContent,
}

impl Versionable for ReportRecord {
    type Payload = ReportSnapshot;

    const KIND: EntityKind = EntityKind::Report;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_snapshot(&self) -> Result<Self::Payload, SnapshotError> {
        let payload = ReportSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            content: self.content.clone(),
        };
        Self::validate_snapshot(&payload)?;
        Ok(payload)
    }

    fn validate_snapshot(payload: &Self::Payload) -> Result<(), SnapshotError> {
        validate_name(&payload.name)?;
        validate_tags(&payload.tags)?;
        let mut keys = BTreeSet::new();
        for section in &payload.content.sections {
            if !keys.insert(section.key.as_str()) {
                return Err(SnapshotError::Validation(format!(
                    "duplicate report section key `{}`",
                    section.key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::domain::configuration::ReportSection;

    fn template(name: &str) -> TemplateRecord {
        TemplateRecord {
            id: Uuid::new_v4(),
            owner: "alice".to_string(),
            name: name.to_string(),
            description: None,
            tags: BTreeSet::new(),
            configuration: TemplateConfiguration::default(),
            usage_count: 0,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn template_snapshot_ignores_non_snapshot_fields() {
        let mut first = template("Quarterly");
        let mut second = first.clone();
        first.usage_count = 3;
        second.usage_count = 42;
        second.owner = "bob".to_string();

        assert_eq!(
            first.to_snapshot().expect("snapshot"),
            second.to_snapshot().expect("snapshot")
        );
    }

    #[test]
    fn template_snapshot_rejects_blank_name() {
        let record = template("   ");
        assert!(matches!(
            record.to_snapshot(),
            Err(SnapshotError::Validation(_))
        ));
    }

    #[test]
    fn report_snapshot_rejects_duplicate_section_keys() {
        let section = ReportSection {
            key: "summary".to_string(),
            heading: "Summary".to_string(),
            body: "text".to_string(),
        };
        let payload = ReportSnapshot {
            name: "Report".to_string(),
            description: None,
            tags: BTreeSet::new(),
            content: ReportContent {
                sections: vec![section.clone(), section],
                metadata: Default::default(),
            },
        };
        assert!(ReportRecord::validate_snapshot(&payload).is_err());
    }

    #[test]
    fn tag_order_does_not_affect_equality() {
        let mut first = template("Tags");
        first.tags = ["b", "a"].iter().map(|s| s.to_string()).collect();
        let mut second = first.clone();
        second.tags = ["a", "b"].iter().map(|s| s.to_string()).collect();

        assert_eq!(
            first.to_snapshot().expect("snapshot"),
            second.to_snapshot().expect("snapshot")
        );
    }
}
