//! Command-line and environment configuration for the Supervisor (§4.10).
//!
//! Grounded in the teacher's `riptide-workers`/`riptide-api` `main.rs`
//! argument structs (`clap::Parser` with `#[arg(long, default_value =
//! ...)]`), extended with `env = "..."` so the same binary runs unchanged
//! under a process manager that only sets environment variables.

use clap::Parser;
use crawlforge_types::{CrawlError, DatabaseStatus, DatabaseUsage};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "crawlforge", about = "Distributed web crawler and link-graph analysis engine")]
pub struct Cli {
    /// Primary Postgres connection string (§4.1). Unset falls back to an
    /// in-memory store — useful for `--status`/`--reset` against nothing,
    /// or a short demo run, but state does not survive a restart.
    #[arg(long, env = "CRAWLFORGE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Additional Rotation Manager write targets (§4.2), as a JSON array
    /// of `{"name", "url", "auth_token", "storage_quota_bytes",
    /// "monthly_write_limit"}` objects. Unset registers the primary
    /// database as the sole write target.
    #[arg(long, env = "CRAWLFORGE_DATABASES")]
    pub databases: Option<String>,

    /// Address the Monitoring API (§4.9) binds to.
    #[arg(long, env = "CRAWLFORGE_BIND", default_value = "127.0.0.1:8090")]
    pub bind: SocketAddr,

    #[arg(
        long,
        env = "CRAWLFORGE_USER_AGENT",
        default_value = "CrawlForge/1.0 (+https://crawlforge.example/bot)"
    )]
    pub user_agent: String,

    #[arg(long, env = "CRAWLFORGE_GLOBAL_CONCURRENCY", default_value_t = 5)]
    pub global_concurrency: usize,

    #[arg(long, env = "CRAWLFORGE_PER_HOST_CONCURRENCY", default_value_t = 2)]
    pub per_host_concurrency: usize,

    #[arg(long, env = "CRAWLFORGE_MIN_HOST_DELAY_MS", default_value_t = 1500)]
    pub min_host_delay_ms: u64,

    #[arg(long, env = "CRAWLFORGE_BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    #[arg(long, env = "CRAWLFORGE_RECRAWL_WINDOW_DAYS", default_value_t = 7)]
    pub recrawl_window_days: i64,

    /// Max attempts for a retryable fetch failure (§4.4 default 3).
    #[arg(long, env = "CRAWLFORGE_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// Overall attempt budget per URL, covering all retries (§4.4 default
    /// 90000ms).
    #[arg(long, env = "CRAWLFORGE_GLOBAL_TIMEOUT_MS", default_value_t = 90_000)]
    pub global_timeout_ms: u64,

    #[arg(long, env = "CRAWLFORGE_RESPECT_ROBOTS", default_value_t = true)]
    pub respect_robots: bool,

    /// Print the current Progress checkpoint as JSON and exit.
    #[arg(long)]
    pub status: bool,

    /// Clear the Progress checkpoint (after confirmation) and exit.
    #[arg(long)]
    pub reset: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth_token: String,
    pub storage_quota_bytes: u64,
    pub monthly_write_limit: u64,
}

/// Validated, normalized configuration the Supervisor actually runs with.
/// Kept separate from `Cli` so invalid input is rejected in one place
/// (`from_cli`), before anything is connected or bound.
pub struct RuntimeConfig {
    pub primary_database_url: String,
    pub write_targets: Vec<DatabaseSpec>,
    pub bind: SocketAddr,
    pub user_agent: String,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub min_host_delay: Duration,
    pub batch_size: usize,
    pub recrawl_window: chrono::Duration,
    pub retry_attempts: u32,
    pub global_timeout: Duration,
    pub respect_robots: bool,
}

impl RuntimeConfig {
    /// Validate and normalize a parsed `Cli`, or reject it outright
    /// (§6: invalid configuration exits with code 3, never a panic).
    pub fn from_cli(cli: &Cli) -> Result<Self, CrawlError> {
        let primary_database_url = cli
            .database_url
            .clone()
            .ok_or_else(|| CrawlError::Config("CRAWLFORGE_DATABASE_URL / --database-url is required".into()))?;

        let write_targets = match &cli.databases {
            Some(raw) => {
                let specs: Vec<DatabaseSpec> = serde_json::from_str(raw)
                    .map_err(|e| CrawlError::Config(format!("CRAWLFORGE_DATABASES is not valid JSON: {e}")))?;
                if specs.is_empty() {
                    return Err(CrawlError::Config("CRAWLFORGE_DATABASES must list at least one database".into()));
                }
                specs
            }
            None => vec![DatabaseSpec {
                name: "primary".to_string(),
                url: primary_database_url.clone(),
                auth_token: String::new(),
                storage_quota_bytes: u64::MAX,
                monthly_write_limit: u64::MAX,
            }],
        };

        if cli.batch_size == 0 {
            return Err(CrawlError::Config("batch size must be >= 1".into()));
        }
        if cli.global_concurrency == 0 {
            return Err(CrawlError::Config("global concurrency must be >= 1".into()));
        }
        if cli.per_host_concurrency == 0 {
            return Err(CrawlError::Config("per-host concurrency must be >= 1".into()));
        }
        if cli.retry_attempts == 0 {
            return Err(CrawlError::Config("retry attempts must be >= 1".into()));
        }
        if cli.global_timeout_ms == 0 {
            return Err(CrawlError::Config("global timeout must be >= 1ms".into()));
        }

        Ok(Self {
            primary_database_url,
            write_targets,
            bind: cli.bind,
            user_agent: cli.user_agent.clone(),
            global_concurrency: cli.global_concurrency,
            per_host_concurrency: cli.per_host_concurrency,
            min_host_delay: Duration::from_millis(cli.min_host_delay_ms),
            batch_size: cli.batch_size,
            recrawl_window: chrono::Duration::days(cli.recrawl_window_days),
            retry_attempts: cli.retry_attempts,
            global_timeout: Duration::from_millis(cli.global_timeout_ms),
            respect_robots: cli.respect_robots,
        })
    }

    /// Seed values for `RotationManager::new` — every target starts
    /// `Healthy` with zeroed counters; real usage accrues from
    /// `record_write`/`record_health_probe` as the Supervisor runs.
    pub fn initial_database_usage(&self) -> Vec<DatabaseUsage> {
        let now = chrono::Utc::now();
        self.write_targets
            .iter()
            .map(|spec| DatabaseUsage {
                name: spec.name.clone(),
                url: spec.url.clone(),
                auth_token: spec.auth_token.clone(),
                bytes_used: 0,
                storage_quota_bytes: spec.storage_quota_bytes,
                writes_this_month: 0,
                monthly_write_limit: spec.monthly_write_limit,
                last_health_check: now,
                status: DatabaseStatus::Healthy,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            database_url: Some("postgres://localhost/crawlforge".to_string()),
            databases: None,
            bind: "127.0.0.1:8090".parse().unwrap(),
            user_agent: "CrawlForge/1.0".to_string(),
            global_concurrency: 5,
            per_host_concurrency: 2,
            min_host_delay_ms: 1500,
            batch_size: 50,
            recrawl_window_days: 7,
            retry_attempts: 3,
            global_timeout_ms: 90_000,
            respect_robots: true,
            status: false,
            reset: false,
        }
    }

    #[test]
    fn missing_database_url_is_a_config_error() {
        let mut cli = base_cli();
        cli.database_url = None;
        let err = RuntimeConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn no_databases_json_falls_back_to_single_primary_target() {
        let cli = base_cli();
        let config = RuntimeConfig::from_cli(&cli).unwrap();
        assert_eq!(config.write_targets.len(), 1);
        assert_eq!(config.write_targets[0].name, "primary");
        assert_eq!(config.write_targets[0].url, "postgres://localhost/crawlforge");
    }

    #[test]
    fn malformed_databases_json_is_a_config_error() {
        let mut cli = base_cli();
        cli.databases = Some("not json".to_string());
        let err = RuntimeConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn explicit_databases_json_is_used_verbatim() {
        let mut cli = base_cli();
        cli.databases = Some(
            r#"[{"name":"a","url":"postgres://a","storage_quota_bytes":1000,"monthly_write_limit":100},
                {"name":"b","url":"postgres://b","storage_quota_bytes":2000,"monthly_write_limit":200}]"#
                .to_string(),
        );
        let config = RuntimeConfig::from_cli(&cli).unwrap();
        assert_eq!(config.write_targets.len(), 2);
        assert_eq!(config.write_targets[1].name, "b");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cli = base_cli();
        cli.batch_size = 0;
        let err = RuntimeConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cli = base_cli();
        cli.global_concurrency = 0;
        assert!(RuntimeConfig::from_cli(&cli).is_err());
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let mut cli = base_cli();
        cli.retry_attempts = 0;
        assert!(RuntimeConfig::from_cli(&cli).is_err());
    }

    #[test]
    fn global_timeout_is_threaded_through_as_a_duration() {
        let mut cli = base_cli();
        cli.global_timeout_ms = 45_000;
        let config = RuntimeConfig::from_cli(&cli).unwrap();
        assert_eq!(config.global_timeout, Duration::from_millis(45_000));
        assert_eq!(config.retry_attempts, 3);
    }
}
