use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::application::repos::{
    CacheEntriesRepo, CacheEntryRecord, CacheLookup, CategoryCount, DurableCacheStats, RepoError,
    UpsertCacheEntry,
};

use super::util::convert_count;
use super::{PostgresRepositories, map_sqlx_error};

const ENTRY_COLUMNS: &str =
    "cache_key, content_hash, category, cached_value, created_at, last_accessed, access_count, expires_at";

#[derive(sqlx::FromRow)]
struct CacheEntryRow {
    cache_key: String,
    content_hash: String,
    category: String,
    cached_value: Value,
    created_at: OffsetDateTime,
    last_accessed: OffsetDateTime,
    access_count: i64,
    expires_at: OffsetDateTime,
}

impl From<CacheEntryRow> for CacheEntryRecord {
    fn from(row: CacheEntryRow) -> Self {
        Self {
            cache_key: row.cache_key,
            content_hash: row.content_hash,
            category: row.category,
            value: row.cached_value,
            created_at: row.created_at,
            last_accessed: row.last_accessed,
            access_count: row.access_count,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryCountRow {
    category: String,
    count: i64,
}

#[async_trait]
impl CacheEntriesRepo for PostgresRepositories {
    async fn lookup_entry(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> Result<CacheLookup, RepoError> {
        let touched: Option<CacheEntryRow> = sqlx::query_as(&format!(
            r#"
            UPDATE cache_entries
            SET last_accessed = $2, access_count = access_count + 1
            WHERE cache_key = $1 AND expires_at > $2
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(key)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = touched {
            return Ok(CacheLookup::Hit(row.into()));
        }

        let expired = sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1 AND expires_at <= $2")
            .bind(key)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        Ok(if expired > 0 {
            CacheLookup::Expired
        } else {
            CacheLookup::Missing
        })
    }

    async fn upsert_entry(&self, entry: UpsertCacheEntry) -> Result<CacheEntryRecord, RepoError> {
        let row: CacheEntryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO cache_entries (
                cache_key, content_hash, category, cached_value, created_at, last_accessed, access_count, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $5, 1, $6)
            ON CONFLICT (cache_key) DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                category = EXCLUDED.category,
                cached_value = EXCLUDED.cached_value,
                last_accessed = EXCLUDED.last_accessed,
                expires_at = EXCLUDED.expires_at
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(&entry.cache_key)
        .bind(&entry.content_hash)
        .bind(&entry.category)
        .bind(&entry.value)
        .bind(entry.now)
        .bind(entry.expires_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn delete_entry(&self, key: &str) -> Result<bool, RepoError> {
        let removed = sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        Ok(removed > 0)
    }

    async fn delete_category(&self, category: &str) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE category = $1")
            .bind(category)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn clear_entries(&self) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn entry_stats(&self) -> Result<DurableCacheStats, RepoError> {
        let (total, surplus): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(access_count - 1), 0)::BIGINT FROM cache_entries",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(DurableCacheStats {
            total_entries: convert_count(total)?,
            access_surplus: convert_count(surplus)?,
        })
    }

    async fn category_counts(&self) -> Result<Vec<CategoryCount>, RepoError> {
        let rows: Vec<CategoryCountRow> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*) AS count
            FROM cache_entries
            GROUP BY category
            ORDER BY category
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(CategoryCount {
                    category: row.category,
                    count: convert_count(row.count)?,
                })
            })
            .collect()
    }
}
