//! Configuration loading and run settings resolution
//!
//! Every run setting resolves in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MTC_*`)
//! 3. TOML config file
//! 4. Built-in default (fallback)
//!
//! A missing TOML file never terminates the run: a warning is logged and the
//! remaining tiers apply.

use crate::{Error, Result};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// esearch refuses to page past 10k ids for PubMed
pub const DEFAULT_MAX_RESULTS: u32 = 10_000;
pub const DEFAULT_TAXONOMY_PATH: &str = "desc2024.xml";
pub const DEFAULT_OUTPUT_PATH: &str = "sorted_articles.csv";

/// Bootstrap configuration loaded from TOML file
///
/// All fields are optional; anything left out falls through to the
/// built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Topical queries to expand over the year range
    #[serde(default)]
    pub queries: Vec<String>,

    /// First publication year (inclusive)
    #[serde(default)]
    pub year_from: Option<i32>,

    /// Last publication year (inclusive)
    #[serde(default)]
    pub year_to: Option<i32>,

    /// Concurrent retrieval workers
    #[serde(default)]
    pub workers: Option<usize>,

    /// Attempts per retrieval call before giving up
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Fixed delay between attempts, in milliseconds
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    /// Maximum identifiers requested per query/year
    #[serde(default)]
    pub max_results: Option<u32>,

    /// MeSH descriptor XML (e.g. desc2024.xml)
    #[serde(default)]
    pub taxonomy_path: Option<PathBuf>,

    /// Consolidated CSV output
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// NCBI E-utilities identification
    #[serde(default)]
    pub entrez: EntrezConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NCBI E-utilities identification parameters
///
/// NCBI asks clients to identify themselves with `tool` and `email`; an API
/// key raises the request quota from 3/s to 10/s.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EntrezConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stdout when unset)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values supplied on the command line
///
/// `None` / empty means "not given", letting lower tiers decide.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub queries: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub workers: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_results: Option<u32>,
    pub taxonomy_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved, validated settings for one run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub queries: Vec<String>,
    pub year_from: i32,
    pub year_to: i32,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_results: u32,
    pub taxonomy_path: PathBuf,
    pub output_path: PathBuf,
    pub entrez: EntrezConfig,
    pub logging: LoggingConfig,
}

impl RunSettings {
    /// Merge CLI, environment, and TOML tiers, then validate
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let cli_queries = clean_queries(&cli.queries);
        let queries = if !cli_queries.is_empty() {
            cli_queries
        } else if let Some(env_queries) = env_list("MTC_QUERIES") {
            env_queries
        } else {
            clean_queries(&toml.queries)
        };

        let current_year = chrono::Utc::now().year();
        let year_to = pick(cli.year_to, env_value("MTC_YEAR_TO")?, toml.year_to)
            .unwrap_or(current_year);
        let year_from = pick(cli.year_from, env_value("MTC_YEAR_FROM")?, toml.year_from)
            .unwrap_or(year_to);

        let settings = Self {
            queries,
            year_from,
            year_to,
            workers: pick(cli.workers, env_value("MTC_WORKERS")?, toml.workers)
                .unwrap_or(DEFAULT_WORKERS),
            max_attempts: pick(cli.max_attempts, env_value("MTC_MAX_ATTEMPTS")?, toml.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            retry_delay: Duration::from_millis(
                pick(cli.retry_delay_ms, env_value("MTC_RETRY_DELAY_MS")?, toml.retry_delay_ms)
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            max_results: pick(cli.max_results, env_value("MTC_MAX_RESULTS")?, toml.max_results)
                .unwrap_or(DEFAULT_MAX_RESULTS),
            taxonomy_path: pick(
                cli.taxonomy_path.clone(),
                env_value("MTC_TAXONOMY_PATH")?,
                toml.taxonomy_path.clone(),
            )
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TAXONOMY_PATH)),
            output_path: pick(
                cli.output_path.clone(),
                env_value("MTC_OUTPUT_PATH")?,
                toml.output_path.clone(),
            )
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            entrez: EntrezConfig {
                email: pick(cli.email.clone(), env_string("MTC_NCBI_EMAIL"), toml.entrez.email.clone()),
                api_key: pick(
                    cli.api_key.clone(),
                    env_string("MTC_NCBI_API_KEY"),
                    toml.entrez.api_key.clone(),
                ),
                tool: toml.entrez.tool.clone(),
            },
            logging: LoggingConfig {
                level: pick(cli.log_level.clone(), env_string("MTC_LOG_LEVEL"), None)
                    .unwrap_or_else(|| toml.logging.level.clone()),
                file: toml.logging.file.clone(),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Inclusive publication-year range
    pub fn years(&self) -> RangeInclusive<i32> {
        self.year_from..=self.year_to
    }

    fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(Error::Config(
                "No queries configured. Use --query, MTC_QUERIES, or `queries = [...]` in the TOML config"
                    .to_string(),
            ));
        }
        if self.year_from > self.year_to {
            return Err(Error::Config(format!(
                "Year range is empty: {} > {}",
                self.year_from, self.year_to
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load the TOML config
///
/// Uses `explicit` when given, otherwise the platform config file
/// (`~/.config/mtc/config.toml` on Linux). A missing file yields defaults.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => {
                debug!("No platform config directory, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    if !path.exists() {
        if explicit.is_some() {
            warn!("Config file not found: {}, using defaults", path.display());
        } else {
            debug!("No config file at {}, using defaults", path.display());
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mtc").join("config.toml"))
}

fn pick<T>(cli: Option<T>, env: Option<T>, toml: Option<T>) -> Option<T> {
    cli.or(env).or(toml)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|raw| clean_queries(raw.split(',')))
}

/// Trimmed, non-blank queries; esearch treats an empty term as "match all"
fn clean_queries<I, S>(queries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    queries
        .into_iter()
        .map(|q| q.as_ref().trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid {}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}
