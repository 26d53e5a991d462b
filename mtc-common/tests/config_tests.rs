//! Configuration resolution tests
//!
//! Tests the priority order CLI → ENV → TOML → defaults and the validation
//! rules applied to the merged settings.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Every test that resolves settings reads `MTC_*` variables and is marked
//! #[serial].

use mtc_common::config::{
    load_toml_config, CliOverrides, RunSettings, TomlConfig, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_OUTPUT_PATH, DEFAULT_WORKERS,
};
use mtc_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "MTC_QUERIES",
    "MTC_YEAR_FROM",
    "MTC_YEAR_TO",
    "MTC_WORKERS",
    "MTC_MAX_ATTEMPTS",
    "MTC_RETRY_DELAY_MS",
    "MTC_MAX_RESULTS",
    "MTC_TAXONOMY_PATH",
    "MTC_OUTPUT_PATH",
    "MTC_NCBI_EMAIL",
    "MTC_NCBI_API_KEY",
    "MTC_LOG_LEVEL",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn cli_with_query() -> CliOverrides {
    CliOverrides {
        queries: vec!["Lung Neoplasms".to_string()],
        year_from: Some(2015),
        year_to: Some(2015),
        ..Default::default()
    }
}

#[test]
#[serial]
fn test_defaults_apply_when_only_queries_given() {
    clear_env();

    let settings = RunSettings::resolve(&cli_with_query(), &TomlConfig::default()).unwrap();

    assert_eq!(settings.workers, DEFAULT_WORKERS);
    assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(settings.retry_delay, Duration::from_millis(1000));
    assert_eq!(settings.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
    assert_eq!(settings.years(), 2015..=2015);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn test_cli_overrides_env_and_toml() {
    clear_env();
    env::set_var("MTC_WORKERS", "6");

    let toml = TomlConfig {
        workers: Some(2),
        ..Default::default()
    };
    let cli = CliOverrides {
        workers: Some(9),
        ..cli_with_query()
    };

    let settings = RunSettings::resolve(&cli, &toml).unwrap();
    assert_eq!(settings.workers, 9);

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    env::set_var("MTC_MAX_ATTEMPTS", "2");
    env::set_var("MTC_QUERIES", "Lung cancer, Carcinoma, ");

    let toml = TomlConfig {
        max_attempts: Some(7),
        queries: vec!["ignored".to_string()],
        year_from: Some(2020),
        year_to: Some(2021),
        ..Default::default()
    };

    let settings = RunSettings::resolve(&CliOverrides::default(), &toml).unwrap();
    assert_eq!(settings.max_attempts, 2);
    assert_eq!(settings.queries, vec!["Lung cancer", "Carcinoma"]);
    assert_eq!(settings.years(), 2020..=2021);

    clear_env();
}

#[test]
#[serial]
fn test_year_from_defaults_to_year_to() {
    clear_env();

    let cli = CliOverrides {
        queries: vec!["q".to_string()],
        year_to: Some(2018),
        ..Default::default()
    };
    let settings = RunSettings::resolve(&cli, &TomlConfig::default()).unwrap();
    assert_eq!(settings.year_from, 2018);
}

#[test]
#[serial]
fn test_inverted_year_range_rejected() {
    clear_env();

    let cli = CliOverrides {
        year_from: Some(2020),
        year_to: Some(2019),
        ..cli_with_query()
    };
    let result = RunSettings::resolve(&cli, &TomlConfig::default());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_zero_workers_rejected() {
    clear_env();

    let cli = CliOverrides {
        workers: Some(0),
        ..cli_with_query()
    };
    let result = RunSettings::resolve(&cli, &TomlConfig::default());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_missing_queries_rejected() {
    clear_env();

    let result = RunSettings::resolve(&CliOverrides::default(), &TomlConfig::default());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_unparsable_env_value_is_config_error() {
    clear_env();
    env::set_var("MTC_WORKERS", "four");

    let result = RunSettings::resolve(&cli_with_query(), &TomlConfig::default());
    assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("MTC_WORKERS")));

    clear_env();
}

#[test]
fn test_load_toml_from_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
queries = ["Lung cancer", "Lung Neoplasms"]
year_from = 2015
year_to = 2016
retry_delay_ms = 250
taxonomy_path = "/data/desc2024.xml"

[entrez]
email = "curator@example.org"
api_key = "abc123"

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.queries.len(), 2);
    assert_eq!(config.year_from, Some(2015));
    assert_eq!(config.retry_delay_ms, Some(250));
    assert_eq!(config.taxonomy_path, Some(PathBuf::from("/data/desc2024.xml")));
    assert_eq!(config.entrez.api_key.as_deref(), Some("abc123"));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_missing_toml_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_toml_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert!(config.queries.is_empty());
    assert!(config.workers.is_none());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "queries = [unterminated").unwrap();

    let result = load_toml_config(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_blank_cli_queries_are_dropped() {
    clear_env();

    let cli = CliOverrides {
        queries: vec!["".to_string(), "  Lung cancer ".to_string(), "   ".to_string()],
        ..cli_with_query()
    };
    let settings = RunSettings::resolve(&cli, &TomlConfig::default()).unwrap();

    assert_eq!(settings.queries, vec!["Lung cancer"]);
}

#[test]
#[serial]
fn test_all_blank_cli_queries_fall_through_to_toml() {
    clear_env();

    let cli = CliOverrides {
        queries: vec!["".to_string()],
        ..cli_with_query()
    };
    let toml = TomlConfig {
        queries: vec![" Lung Neoplasms".to_string(), "".to_string()],
        ..Default::default()
    };
    let settings = RunSettings::resolve(&cli, &toml).unwrap();

    assert_eq!(settings.queries, vec!["Lung Neoplasms"]);
}
