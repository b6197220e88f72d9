use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the keepsake binary.
#[derive(Debug, Parser)]
#[command(
    name = "keepsake",
    version,
    about = "Version history and artifact cache maintenance"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "KEEPSAKE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Artifact cache maintenance.
    Cache(CacheArgs),
    /// Inspect and edit version history.
    Versions(VersionsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT", global = true)]
    pub database_max_connections: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Remove expired entries periodically until interrupted.
    Sweep,
    /// Remove expired entries once.
    Cleanup,
    /// Print cache statistics as JSON.
    Stats,
    /// Delete cached entries.
    Clear(ClearArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ClearArgs {
    /// Only delete entries of this category.
    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Use the durable cache table.
    #[arg(
        long = "cache-durable",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub durable: Option<bool>,

    /// Override the default entry TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub default_ttl_seconds: Option<u64>,

    /// Override the sweep interval.
    #[arg(long = "cache-sweep-interval-seconds", value_name = "SECONDS")]
    pub sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct VersionsArgs {
    #[command(subcommand)]
    pub command: VersionsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum VersionsCommand {
    /// List the newest versions of an entity.
    List(ListVersionsArgs),
    /// Delete a version and renumber the remaining history.
    Delete(DeleteVersionArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ListVersionsArgs {
    /// Template or report identifier.
    #[arg(value_name = "ENTITY_ID")]
    pub entity_id: Uuid,

    /// Maximum number of versions to print.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct DeleteVersionArgs {
    #[arg(value_name = "VERSION_ID")]
    pub version_id: Uuid,
}
