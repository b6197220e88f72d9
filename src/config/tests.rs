use clap::Parser;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.database.url = Some("postgres://file".to_string());

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        database_url: Some("postgres://cli".to_string()),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.database.url.as_deref(), Some("postgres://cli"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn version_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.versions.retention_cap, 10);
    assert!(!settings.versions.conflict_retry);
}

#[test]
fn retention_cap_is_validated() {
    let mut raw = RawSettings::default();
    raw.versions.retention_cap = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero cap rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "versions.retention_cap",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.versions.retention_cap = Some(MAX_RETENTION_CAP + 1);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.durable);
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(31_536_000));
    assert_eq!(settings.cache.sweep_interval, Duration::from_secs(3600));
    assert_eq!(settings.cache.key_marker, "discriminator");
}

#[test]
fn cache_settings_can_be_overridden_via_cli() {
    let mut raw = RawSettings::default();
    let overrides = CacheOverrides {
        durable: Some(false),
        default_ttl_seconds: Some(60),
        ..Default::default()
    };

    raw.apply_cache_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.durable);
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(60));
    // Other fields should still use defaults
    assert_eq!(settings.cache.sweep_interval, Duration::from_secs(3600));
}

#[test]
fn zero_cache_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.default_ttl_seconds",
            ..
        })
    ));
}

#[test]
fn key_marker_must_not_contain_separator() {
    let mut raw = RawSettings::default();
    raw.cache.key_marker = Some("bad:marker".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_migrate_with_global_overrides() {
    let args = CliArgs::parse_from([
        "keepsake",
        "migrate",
        "--database-url",
        "postgres://example",
        "--log-json=true",
    ]);

    assert!(matches!(args.command, Command::Migrate));
    assert_eq!(
        args.overrides.database_url.as_deref(),
        Some("postgres://example")
    );
    assert_eq!(args.overrides.log_json, Some(true));
}

#[test]
fn parse_cache_cli_arguments() {
    let args = CliArgs::parse_from([
        "keepsake",
        "cache",
        "--cache-durable=false",
        "--cache-sweep-interval-seconds",
        "30",
        "clear",
        "--category",
        "summary",
    ]);

    match args.command {
        Command::Cache(cache) => {
            assert_eq!(cache.overrides.durable, Some(false));
            assert_eq!(cache.overrides.sweep_interval_seconds, Some(30));
            match cache.command {
                CacheCommand::Clear(clear) => {
                    assert_eq!(clear.category.as_deref(), Some("summary"));
                }
                _ => panic!("wrong cache command parsed"),
            }
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_versions_list_arguments() {
    let entity_id = "5f0c6c1e-8a51-4a53-9c59-2f1b8f1a7d10";
    let args = CliArgs::parse_from(["keepsake", "versions", "list", entity_id, "--limit", "3"]);

    match args.command {
        Command::Versions(versions) => match versions.command {
            VersionsCommand::List(list) => {
                assert_eq!(list.entity_id.to_string(), entity_id);
                assert_eq!(list.limit, Some(3));
            }
            _ => panic!("wrong versions command parsed"),
        },
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn rejects_malformed_version_id() {
    let result = CliArgs::try_parse_from(["keepsake", "versions", "delete", "not-a-uuid"]);
    assert!(result.is_err());
}
