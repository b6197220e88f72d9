//! Repository behaviour against a real Postgres.
//!
//! Run with `DATABASE_URL` pointing at a disposable server and `--ignored`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use keepsake::application::repos::{
    CacheEntriesRepo, CacheLookup, EntityRepository, UpsertCacheEntry, VersionsRepo,
};
use keepsake::application::versions::{CreateOptions, VersionService};
use keepsake::cache::{ArtifactCache, CacheConfig};
use keepsake::domain::configuration::{ReportContent, ReportSection, TemplateConfiguration};
use keepsake::domain::entities::{ReportRecord, TemplateRecord};
use keepsake::domain::versions::Versionable;
use keepsake::infra::db::PostgresRepositories;
use serde_json::json;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const OWNER: &str = "db@example.com";

fn template(name: &str) -> TemplateRecord {
    let now = OffsetDateTime::now_utc();
    TemplateRecord {
        id: Uuid::new_v4(),
        owner: OWNER.to_string(),
        name: name.to_string(),
        description: None,
        tags: BTreeSet::from(["ops".to_string()]),
        configuration: TemplateConfiguration::default(),
        usage_count: 0,
        created_at: now,
        updated_at: now,
    }
}

fn report(name: &str) -> ReportRecord {
    let now = OffsetDateTime::now_utc();
    ReportRecord {
        id: Uuid::new_v4(),
        owner: OWNER.to_string(),
        template_id: None,
        name: name.to_string(),
        description: None,
        tags: BTreeSet::new(),
        content: ReportContent {
            sections: vec![ReportSection {
                key: "summary".to_string(),
                heading: "Summary".to_string(),
                body: "All clear.".to_string(),
            }],
            metadata: BTreeMap::new(),
        },
        created_at: now,
        updated_at: now,
    }
}

fn upsert(key: &str, value: serde_json::Value, ttl: Duration) -> UpsertCacheEntry {
    let now = OffsetDateTime::now_utc();
    UpsertCacheEntry {
        cache_key: key.to_string(),
        content_hash: "abc".to_string(),
        category: "summary".to_string(),
        value,
        now,
        expires_at: now + ttl,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn retention_keeps_numbers_contiguous(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut entity = template("Weekly");
    repos.insert_template(&entity).await.expect("insert template");

    let service = VersionService::new(repos.clone());
    for edit in 0..12 {
        entity.name = format!("Weekly {edit}");
        service
            .create_version(&entity, CreateOptions::default())
            .await
            .expect("create version");
    }

    let numbers: Vec<i32> = service
        .list_versions(entity.id, None)
        .await
        .expect("list")
        .into_iter()
        .map(|v| v.version_number)
        .collect();
    assert_eq!(numbers, (1..=10).rev().collect::<Vec<_>>());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn deleting_a_version_renumbers_survivors(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut entity = template("Monthly");
    repos.insert_template(&entity).await.expect("insert template");
    let service = VersionService::new(repos.clone());

    let mut ids = Vec::new();
    for edit in 0..3 {
        entity.name = format!("Monthly {edit}");
        let created = service
            .create_version(&entity, CreateOptions::default())
            .await
            .expect("create version");
        ids.push(created.id);
    }

    assert!(service.delete_version(ids[0]).await.expect("delete"));

    let second = service.get_version(ids[1]).await.expect("second");
    let third = service.get_version(ids[2]).await.expect("third");
    assert_eq!((second.version_number, third.version_number), (1, 2));
    assert_eq!(repos.count_versions(entity.id).await.expect("count"), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_number_surfaces_as_duplicate(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let entity = template("Dup");
    repos.insert_template(&entity).await.expect("insert template");
    let service = VersionService::new(repos.clone());

    let first = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("create version");

    let mut clash = first.clone();
    clash.id = Uuid::new_v4();
    let err = repos
        .insert_version(clash)
        .await
        .expect_err("same number must clash");
    assert!(matches!(
        err,
        keepsake::application::repos::RepoError::Duplicate { .. }
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn current_marker_moves_between_report_versions(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut entity = report("Incident");
    repos.insert_report(&entity).await.expect("insert report");
    let service = VersionService::new(repos.clone());

    let first = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("first");
    entity.name = "Incident (final)".to_string();
    let second = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("second");

    service.set_current(entity.id, first.id).await.expect("mark first");
    service.set_current(entity.id, second.id).await.expect("mark second");

    let flagged = service
        .flagged_current(entity.id)
        .await
        .expect("flagged")
        .expect("one version is flagged");
    assert_eq!(flagged.id, second.id);
    assert!(!service.get_version(first.id).await.expect("first").is_current);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn deleting_the_marked_version_hands_the_marker_on(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    repos.health_check().await.expect("database reachable");
    let mut entity = report("Handover");
    repos.insert_report(&entity).await.expect("insert report");
    let service = VersionService::new(repos.clone());

    let first = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("first");
    entity.name = "Handover (final)".to_string();
    let second = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("second");

    service.set_current(entity.id, second.id).await.expect("mark second");
    assert!(service.delete_version(second.id).await.expect("delete"));

    let flagged = service
        .flagged_current(entity.id)
        .await
        .expect("flagged")
        .expect("marker handed on");
    assert_eq!(flagged.id, first.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn pruning_the_marked_version_hands_the_marker_on(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut entity = report("Rolling");
    repos.insert_report(&entity).await.expect("insert report");
    let service = VersionService::with_retention(repos.clone(), 2);

    let first = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("first");
    service.set_current(entity.id, first.id).await.expect("mark first");

    let mut last = first.clone();
    for edit in 1..=2 {
        entity.name = format!("Rolling {edit}");
        last = service
            .create_version(&entity, CreateOptions::default())
            .await
            .expect("create");
    }

    let flagged = service
        .flagged_current(entity.id)
        .await
        .expect("flagged")
        .expect("marker handed on");
    assert_eq!(flagged.id, last.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn restore_applies_snapshot_to_live_row(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let mut entity = template("Original");
    repos.insert_template(&entity).await.expect("insert template");
    let service = VersionService::new(repos.clone());

    let original = service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("create version");

    entity.name = "Edited".to_string();
    let live = EntityRepository::<TemplateRecord>::apply_snapshot(
        repos.as_ref(),
        entity.id,
        &entity.to_snapshot().expect("snapshot"),
    )
    .await
    .expect("apply edit");
    assert_eq!(live.name, "Edited");

    let restored = service
        .restore(repos.as_ref(), &live, original.id)
        .await
        .expect("restore");
    assert_eq!(restored.name, "Original");

    let fetched = EntityRepository::<TemplateRecord>::get(repos.as_ref(), entity.id, OWNER)
        .await
        .expect("get");
    assert_eq!(fetched.name, "Original");
    assert_eq!(repos.count_versions(entity.id).await.expect("count"), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn deleting_an_entity_cascades_to_versions(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let entity = report("Doomed");
    repos.insert_report(&entity).await.expect("insert report");
    let service = VersionService::new(repos.clone());
    service
        .create_version(&entity, CreateOptions::default())
        .await
        .expect("create version");

    EntityRepository::<ReportRecord>::delete(repos.as_ref(), entity.id, OWNER)
        .await
        .expect("delete entity");

    assert_eq!(repos.count_versions(entity.id).await.expect("count"), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn cache_upsert_preserves_access_count(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    repos
        .upsert_entry(upsert("summary:abc", json!("old"), Duration::hours(1)))
        .await
        .expect("insert");

    let hit = repos
        .lookup_entry("summary:abc", OffsetDateTime::now_utc())
        .await
        .expect("lookup");
    assert!(matches!(&hit, CacheLookup::Hit(record) if record.access_count == 2));

    let replaced = repos
        .upsert_entry(upsert("summary:abc", json!("new"), Duration::hours(1)))
        .await
        .expect("overwrite");
    assert_eq!(replaced.access_count, 2);
    assert_eq!(replaced.value, json!("new"));

    let stats = repos.entry_stats().await.expect("stats");
    assert_eq!((stats.total_entries, stats.access_surplus), (1, 1));

    let stored: serde_json::Value =
        sqlx::query_scalar("SELECT cached_value FROM cache_entries WHERE cache_key = $1")
            .bind("summary:abc")
            .fetch_one(repos.pool())
            .await
            .expect("cached_value column");
    assert_eq!(stored, json!("new"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn expired_cache_rows_are_deleted_on_read(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    repos
        .upsert_entry(upsert("summary:old", json!(1), Duration::seconds(1)))
        .await
        .expect("insert");

    let later = OffsetDateTime::now_utc() + Duration::seconds(5);
    assert_eq!(
        repos.lookup_entry("summary:old", later).await.expect("lookup"),
        CacheLookup::Expired
    );
    assert_eq!(
        repos.lookup_entry("summary:old", later).await.expect("lookup"),
        CacheLookup::Missing
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn artifact_cache_round_trips_through_postgres(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let cache = ArtifactCache::new(repos.clone(), CacheConfig::default());

    cache
        .set("query_gen:abc:discriminator_1", json!({"q": ["x"]}), None)
        .await;
    assert_eq!(
        cache.get("query_gen:abc:discriminator_1").await,
        Some(json!({"q": ["x"]}))
    );

    let counts = repos.category_counts().await.expect("counts");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].category, "query_gen");
    assert!(!cache.fallback_active());
}
