use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{EntityRepository, RepoError};
use crate::application::versions::{ReportSnapshot, TemplateSnapshot};
use crate::domain::configuration::{ReportContent, TemplateConfiguration};
use crate::domain::entities::{ReportRecord, TemplateRecord};

use super::{PostgresRepositories, map_sqlx_error};

const TEMPLATE_COLUMNS: &str =
    "id, owner, name, description, tags, configuration, usage_count, created_at, updated_at";
const REPORT_COLUMNS: &str =
    "id, owner, template_id, name, description, tags, content, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    owner: String,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    configuration: Json<TemplateConfiguration>,
    usage_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TemplateRow> for TemplateRecord {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            owner: row.owner,
            name: row.name,
            description: row.description,
            tags: row.tags.into_iter().collect(),
            configuration: row.configuration.0,
            usage_count: row.usage_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    owner: String,
    template_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    content: Json<ReportContent>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ReportRow> for ReportRecord {
    fn from(row: ReportRow) -> Self {
        Self {
            id: row.id,
            owner: row.owner,
            template_id: row.template_id,
            name: row.name,
            description: row.description,
            tags: row.tags.into_iter().collect(),
            content: row.content.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn tag_list(tags: &BTreeSet<String>) -> Vec<String> {
    tags.iter().cloned().collect()
}

impl PostgresRepositories {
    pub async fn insert_template(&self, record: &TemplateRecord) -> Result<(), RepoError> {
        sqlx::query(&format!(
            "INSERT INTO templates ({TEMPLATE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(record.id)
        .bind(&record.owner)
        .bind(&record.name)
        .bind(&record.description)
        .bind(tag_list(&record.tags))
        .bind(Json(&record.configuration))
        .bind(record.usage_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    pub async fn insert_report(&self, record: &ReportRecord) -> Result<(), RepoError> {
        sqlx::query(&format!(
            "INSERT INTO reports ({REPORT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(record.id)
        .bind(&record.owner)
        .bind(record.template_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(tag_list(&record.tags))
        .bind(Json(&record.content))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[async_trait]
impl EntityRepository<TemplateRecord> for PostgresRepositories {
    async fn get(&self, entity_id: Uuid, owner: &str) -> Result<TemplateRecord, RepoError> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1 AND owner = $2"
        ))
        .bind(entity_id)
        .bind(owner)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(TemplateRecord::from).ok_or(RepoError::NotFound)
    }

    async fn apply_snapshot(
        &self,
        entity_id: Uuid,
        payload: &TemplateSnapshot,
    ) -> Result<TemplateRecord, RepoError> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            r#"
            UPDATE templates
            SET name = $2, description = $3, tags = $4, configuration = $5, updated_at = now()
            WHERE id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(entity_id)
        .bind(&payload.name)
        .bind(&payload.description)
        .bind(tag_list(&payload.tags))
        .bind(Json(&payload.configuration))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(TemplateRecord::from).ok_or(RepoError::NotFound)
    }

    async fn delete(&self, entity_id: Uuid, owner: &str) -> Result<(), RepoError> {
        let removed = sqlx::query("DELETE FROM templates WHERE id = $1 AND owner = $2")
            .bind(entity_id)
            .bind(owner)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if removed == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository<ReportRecord> for PostgresRepositories {
    async fn get(&self, entity_id: Uuid, owner: &str) -> Result<ReportRecord, RepoError> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1 AND owner = $2"
        ))
        .bind(entity_id)
        .bind(owner)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ReportRecord::from).ok_or(RepoError::NotFound)
    }

    async fn apply_snapshot(
        &self,
        entity_id: Uuid,
        payload: &ReportSnapshot,
    ) -> Result<ReportRecord, RepoError> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            r#"
            UPDATE reports
            SET name = $2, description = $3, tags = $4, content = $5, updated_at = now()
            WHERE id = $1
            RETURNING {REPORT_COLUMNS}
            "#
        ))
        .bind(entity_id)
        .bind(&payload.name)
        .bind(&payload.description)
        .bind(tag_list(&payload.tags))
        .bind(Json(&payload.content))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ReportRecord::from).ok_or(RepoError::NotFound)
    }

    async fn delete(&self, entity_id: Uuid, owner: &str) -> Result<(), RepoError> {
        let removed = sqlx::query("DELETE FROM reports WHERE id = $1 AND owner = $2")
            .bind(entity_id)
            .bind(owner)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if removed == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
