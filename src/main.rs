use std::{process, sync::Arc};

use keepsake::{
    application::{error::AppError, versions::VersionService},
    cache::{ArtifactCache, CacheConfig, spawn_sweeper},
    config::{self, CacheCommand, Command, VersionsCommand},
    infra::{
        db::PostgresRepositories, error::InfraError, memory::InMemoryCacheEntries, telemetry,
    },
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, error = %report.joined(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.joined(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Migrate => run_migrate(&settings).await,
        Command::Cache(args) => run_cache(&settings, args.command).await,
        Command::Versions(args) => run_versions(&settings, args.command).await,
    }
}

async fn connect(settings: &config::Settings) -> Result<PostgresRepositories, AppError> {
    let url = settings.database.url.as_deref().ok_or_else(|| {
        InfraError::configuration("database.url is required for this command")
    })?;
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(InfraError::from)?;
    Ok(repositories)
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = connect(settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| InfraError::Migration(err.to_string()))?;
    info!(target = "keepsake::migrate", "database migrations applied");
    Ok(())
}

async fn build_cache(settings: &config::Settings) -> Result<ArtifactCache, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    if !cache_config.durable {
        return Ok(ArtifactCache::in_memory(cache_config));
    }

    if settings.database.url.is_none() {
        warn!(
            target = "keepsake::cache",
            "no database configured, cache entries will not outlive this process"
        );
        return Ok(ArtifactCache::new(
            Arc::new(InMemoryCacheEntries::new()),
            cache_config,
        ));
    }

    let repositories = connect(settings).await?;
    Ok(ArtifactCache::new(Arc::new(repositories), cache_config))
}

async fn run_cache(settings: &config::Settings, command: CacheCommand) -> Result<(), AppError> {
    let cache = Arc::new(build_cache(settings).await?);

    match command {
        CacheCommand::Sweep => {
            let interval = cache.config().sweep_interval();
            info!(
                target = "keepsake::cache",
                interval_secs = interval.as_secs(),
                "starting cache sweeper"
            );
            let handle = spawn_sweeper(cache.clone(), interval);
            let signal = tokio::signal::ctrl_c().await;
            handle.abort();
            let _ = handle.await;
            signal.map_err(InfraError::from)?;
            info!(target = "keepsake::cache", "cache sweeper stopped");
        }
        CacheCommand::Cleanup => {
            let removed = cache.cleanup_expired().await;
            print_json(&json!({ "removed": removed }))?;
        }
        CacheCommand::Stats => {
            let stats = cache.stats().await;
            let categories = cache.category_counts().await;
            print_json(&json!({ "stats": stats, "categories": categories }))?;
        }
        CacheCommand::Clear(args) => {
            let removed = match args.category {
                Some(category) => cache.invalidate_category(&category).await,
                None => {
                    let before = cache.stats().await.total_entries;
                    cache.clear().await;
                    before
                }
            };
            print_json(&json!({ "removed": removed }))?;
        }
    }

    Ok(())
}

async fn run_versions(
    settings: &config::Settings,
    command: VersionsCommand,
) -> Result<(), AppError> {
    let repositories = connect(settings).await?;
    let service = VersionService::with_retention(
        Arc::new(repositories),
        settings.versions.retention_cap,
    )
    .retry_conflicts(settings.versions.conflict_retry);

    match command {
        VersionsCommand::List(args) => {
            let versions = service.list_versions(args.entity_id, args.limit).await?;
            print_json(&json!({ "entity_id": args.entity_id, "versions": versions }))?;
        }
        VersionsCommand::Delete(args) => {
            if !service.delete_version(args.version_id).await? {
                return Err(AppError::NotFound);
            }
            print_json(&json!({ "deleted": args.version_id }))?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
