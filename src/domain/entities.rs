//! Domain entities mirrored from persistent storage.

use std::collections::BTreeSet;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::configuration::{ReportContent, TemplateConfiguration};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateRecord {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub configuration: TemplateConfiguration,
    pub usage_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub id: Uuid,
    pub owner: String,
    pub template_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub content: ReportContent,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
