use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{RepoError, VersionRecord, VersionsRepo};
use crate::application::versions::RenumberPlan;
use crate::domain::types::EntityKind;

use super::util::convert_count;
use super::{PostgresRepositories, map_sqlx_error};

const VERSION_COLUMNS: &str =
    "id, entity_kind, entity_id, version_number, snapshot, is_current, created_at";

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: Uuid,
    entity_kind: EntityKind,
    entity_id: Uuid,
    version_number: i32,
    snapshot: Value,
    is_current: bool,
    created_at: OffsetDateTime,
}

impl From<VersionRow> for VersionRecord {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            entity_kind: row.entity_kind,
            entity_id: row.entity_id,
            version_number: row.version_number,
            snapshot: row.snapshot,
            is_current: row.is_current,
            created_at: row.created_at,
        }
    }
}

/// Hand the current marker to the newest surviving version of the entity.
async fn promote_newest(
    tx: &mut Transaction<'_, Postgres>,
    entity_id: Uuid,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"
        UPDATE entity_versions
        SET is_current = TRUE
        WHERE id = (
            SELECT id
            FROM entity_versions
            WHERE entity_id = $1
            ORDER BY created_at DESC, version_number DESC
            LIMIT 1
        )
        "#,
    )
    .bind(entity_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl VersionsRepo for PostgresRepositories {
    async fn insert_version(&self, record: VersionRecord) -> Result<(), RepoError> {
        let (template_id, report_id) = match record.entity_kind {
            EntityKind::Template => (Some(record.entity_id), None),
            EntityKind::Report => (None, Some(record.entity_id)),
        };

        sqlx::query(
            r#"
            INSERT INTO entity_versions (
                id, entity_kind, template_id, report_id, version_number, snapshot, is_current, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.entity_kind)
        .bind(template_id)
        .bind(report_id)
        .bind(record.version_number)
        .bind(record.snapshot)
        .bind(record.is_current)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError> {
        let row: Option<VersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM entity_versions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(VersionRecord::from))
    }

    async fn max_version_number(&self, entity_id: Uuid) -> Result<Option<i32>, RepoError> {
        sqlx::query_scalar("SELECT MAX(version_number) FROM entity_versions WHERE entity_id = $1")
            .bind(entity_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_recent(
        &self,
        entity_id: Uuid,
        limit: u32,
    ) -> Result<Vec<VersionRecord>, RepoError> {
        let rows: Vec<VersionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM entity_versions
            WHERE entity_id = $1
            ORDER BY created_at DESC, version_number DESC
            LIMIT $2
            "#
        ))
        .bind(entity_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(VersionRecord::from).collect())
    }

    async fn list_chronological(&self, entity_id: Uuid) -> Result<Vec<VersionRecord>, RepoError> {
        let rows: Vec<VersionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM entity_versions
            WHERE entity_id = $1
            ORDER BY created_at ASC, version_number ASC
            "#
        ))
        .bind(entity_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(VersionRecord::from).collect())
    }

    async fn count_versions(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entity_versions WHERE entity_id = $1")
                .bind(entity_id)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        convert_count(count)
    }

    async fn prune_versions(&self, entity_id: Uuid, keep: u32) -> Result<u64, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let removed: Vec<bool> = sqlx::query_scalar(
            r#"
            DELETE FROM entity_versions
            WHERE entity_id = $1
              AND id NOT IN (
                SELECT id
                FROM entity_versions
                WHERE entity_id = $1
                ORDER BY created_at DESC, version_number DESC
                LIMIT $2
              )
            RETURNING is_current
            "#,
        )
        .bind(entity_id)
        .bind(i64::from(keep))
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if removed.iter().any(|was_current| *was_current) {
            promote_newest(&mut tx, entity_id).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(removed.len() as u64)
    }

    async fn delete_version(&self, id: Uuid) -> Result<Option<VersionRecord>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row: Option<VersionRow> = sqlx::query_as(&format!(
            "DELETE FROM entity_versions WHERE id = $1 RETURNING {VERSION_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(deleted) = row.as_ref()
            && deleted.is_current
        {
            promote_newest(&mut tx, deleted.entity_id).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.map(VersionRecord::from))
    }

    async fn delete_versions_for_entity(&self, entity_id: Uuid) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM entity_versions WHERE entity_id = $1")
            .bind(entity_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn apply_renumbering(&self, plan: &RenumberPlan) -> Result<(), RepoError> {
        if plan.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        for phase in [
            plan.temporary_numbers().collect::<Vec<_>>(),
            plan.final_numbers().collect::<Vec<_>>(),
        ] {
            let (ids, numbers): (Vec<Uuid>, Vec<i32>) = phase.into_iter().unzip();
            let result = sqlx::query(
                r#"
                UPDATE entity_versions AS v
                SET version_number = u.number
                FROM UNNEST($1::uuid[], $2::int4[]) AS u(id, number)
                WHERE v.id = u.id AND v.entity_id = $3
                "#,
            )
            .bind(&ids)
            .bind(&numbers)
            .bind(plan.entity_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            // A row that vanished mid-plan leaves the numbering unknowable; the
            // dropped transaction rolls back both phases.
            if result.rows_affected() != ids.len() as u64 {
                return Err(RepoError::Integrity {
                    message: format!(
                        "renumbering touched {} of {} versions",
                        result.rows_affected(),
                        ids.len()
                    ),
                });
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_current(&self, entity_id: Uuid, version_id: Uuid) -> Result<bool, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE entity_versions SET is_current = FALSE WHERE entity_id = $1 AND is_current AND id <> $2",
        )
        .bind(entity_id)
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let marked = sqlx::query(
            "UPDATE entity_versions SET is_current = TRUE WHERE id = $1 AND entity_id = $2",
        )
        .bind(version_id)
        .bind(entity_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if marked != 1 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn find_marked_current(
        &self,
        entity_id: Uuid,
    ) -> Result<Option<VersionRecord>, RepoError> {
        let row: Option<VersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM entity_versions WHERE entity_id = $1 AND is_current LIMIT 1"
        ))
        .bind(entity_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(VersionRecord::from))
    }
}
