use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Sync engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local analytical store connection URL
    pub local_dsn: String,
    /// Upstream billing store connection URL
    pub upstream_dsn: String,
    /// IANA timezone all cron schedules are evaluated in
    pub timezone: chrono_tz::Tz,
    /// 6-field cron (with seconds) for the yearly cohort capture
    pub cron_cohort: String,
    /// 6-field cron for the monthly details sync
    pub cron_details: String,
    /// 6-field cron for the decrease alert
    pub cron_alert: String,
    pub enable_cohort: bool,
    pub enable_details: bool,
    pub enable_alert: bool,
    /// Branch codes; empty means fall back to the CSV file
    pub branches: Vec<String>,
    pub branches_csv_path: PathBuf,
    /// Concurrent per-branch executions within one job (default: 2)
    pub concurrency: usize,
    /// Additional attempts after a failed sync (default: 2)
    pub retries: u32,
    pub retry_delay: Duration,
    /// Customer codes per upstream IN-list query (default: 100)
    pub batch_size: usize,
    /// Cohort size N (default: 200)
    pub cohort_size_n: i64,
    /// Months of details backfilled after a cohort capture (default: 3)
    pub backfill_months: u32,
    pub alert_threshold_percent: f64,
    /// Webhook URL for outbound messages; None means log-only notifier
    pub alert_notify_url: Option<String>,
    pub alert_notify_target: String,
    /// Directory holding the SQL template files (default: sql)
    pub sql_dir: PathBuf,
    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,
    /// Statement deadline for upstream pulls and local transactions
    pub query_timeout: Duration,
}

impl SyncConfig {
    /// Load configuration from environment variables with validation.
    pub fn from_env() -> SyncResult<Self> {
        let local_dsn = env::var("LOCAL_DATABASE_URL")
            .map_err(|_| SyncError::Config("LOCAL_DATABASE_URL is required".into()))?;
        let upstream_dsn = env::var("UPSTREAM_DATABASE_URL")
            .map_err(|_| SyncError::Config("UPSTREAM_DATABASE_URL is required".into()))?;

        for (name, url) in [
            ("LOCAL_DATABASE_URL", &local_dsn),
            ("UPSTREAM_DATABASE_URL", &upstream_dsn),
        ] {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(SyncError::Config(format!(
                    "{name} has invalid URL format: {url}"
                )));
            }
        }

        let timezone_name =
            env::var("SYNC_TIMEZONE").unwrap_or_else(|_| "Asia/Bangkok".to_string());
        let timezone: chrono_tz::Tz = timezone_name
            .parse()
            .map_err(|_| SyncError::Config(format!("unknown timezone: {timezone_name}")))?;

        let cron_cohort =
            env::var("CRON_COHORT").unwrap_or_else(|_| "0 0 22 15 10 *".to_string());
        let cron_details =
            env::var("CRON_DETAILS").unwrap_or_else(|_| "0 0 8 16 * *".to_string());
        let cron_alert =
            env::var("CRON_ALERT").unwrap_or_else(|_| "0 10 9 16,30 * *".to_string());

        let enable_cohort = env_bool("ENABLE_COHORT", true);
        let enable_details = env_bool("ENABLE_DETAILS", true);
        let enable_alert = env_bool("ENABLE_ALERT", true);

        let branches: Vec<String> = env::var("SYNC_BRANCHES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if branches.is_empty() {
            log::warn!("[CONFIG] SYNC_BRANCHES not set - branch list will be loaded from CSV");
        }
        let branches_csv_path = PathBuf::from(
            env::var("BRANCHES_CSV_PATH").unwrap_or_else(|_| "branches.csv".to_string()),
        );

        let concurrency = env_parse("SYNC_CONCURRENCY", 2usize);
        if !(1..=32).contains(&concurrency) {
            return Err(SyncError::Config(format!(
                "SYNC_CONCURRENCY must be between 1 and 32, got: {concurrency}"
            )));
        }

        let retries = env_parse("SYNC_RETRIES", 2u32);
        if retries > 10 {
            return Err(SyncError::Config(format!(
                "SYNC_RETRIES must be between 0 and 10, got: {retries}"
            )));
        }

        let retry_delay = Duration::from_secs(env_parse("SYNC_RETRY_DELAY_SECS", 10u64));

        let batch_size = env_parse("SYNC_BATCH_SIZE", 100usize).max(1);

        let cohort_size_n = env_parse("COHORT_SIZE_N", 200i64);
        if !(1..=10_000).contains(&cohort_size_n) {
            return Err(SyncError::Config(format!(
                "COHORT_SIZE_N must be between 1 and 10000, got: {cohort_size_n}"
            )));
        }

        let backfill_months = env_parse("BACKFILL_MONTHS", 3u32);
        if backfill_months > 12 {
            return Err(SyncError::Config(format!(
                "BACKFILL_MONTHS must be between 0 and 12, got: {backfill_months}"
            )));
        }

        let alert_threshold_percent = env_parse("ALERT_THRESHOLD_PERCENT", 20.0f64);
        if alert_threshold_percent <= 0.0 {
            return Err(SyncError::Config(format!(
                "ALERT_THRESHOLD_PERCENT must be positive, got: {alert_threshold_percent}"
            )));
        }

        let alert_notify_url = env::var("ALERT_NOTIFY_URL").ok();
        if alert_notify_url.is_none() {
            log::warn!("[CONFIG] ALERT_NOTIFY_URL not set - notifications will be log-only");
        }
        let alert_notify_target = env::var("ALERT_NOTIFY_TARGET").unwrap_or_default();

        let sql_dir = PathBuf::from(env::var("SQL_DIR").unwrap_or_else(|_| "sql".to_string()));

        let db_max_connections = env_parse("DB_MAX_CONNECTIONS", 5u32);
        if !(1..=100).contains(&db_max_connections) {
            return Err(SyncError::Config(format!(
                "DB_MAX_CONNECTIONS must be between 1 and 100, got: {db_max_connections}"
            )));
        }
        // The pool serves every concurrent branch: one transaction plus one
        // cohort read each.
        if (db_max_connections as usize) < concurrency * 2 {
            log::warn!(
                "[CONFIG] DB_MAX_CONNECTIONS ({}) is below concurrency x 2 ({}) - branches may queue on the pool",
                db_max_connections,
                concurrency * 2
            );
        }

        let db_connect_timeout = Duration::from_secs(env_parse("DB_CONNECT_TIMEOUT_SECS", 10u64));
        let query_timeout = Duration::from_secs(env_parse("QUERY_TIMEOUT_SECS", 300u64));

        Ok(Self {
            local_dsn,
            upstream_dsn,
            timezone,
            cron_cohort,
            cron_details,
            cron_alert,
            enable_cohort,
            enable_details,
            enable_alert,
            branches,
            branches_csv_path,
            concurrency,
            retries,
            retry_delay,
            batch_size,
            cohort_size_n,
            backfill_months,
            alert_threshold_percent,
            alert_notify_url,
            alert_notify_target,
            sql_dir,
            db_max_connections,
            db_connect_timeout,
            query_timeout,
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required() {
        env::set_var("LOCAL_DATABASE_URL", "postgres://u:p@localhost/local");
        env::set_var("UPSTREAM_DATABASE_URL", "postgres://u:p@localhost/upstream");
    }

    // Single test: the cases share process-wide env vars and must run
    // sequentially.
    #[test]
    fn test_from_env_validation() {
        set_required();

        env::set_var("SYNC_CONCURRENCY", "0");
        assert!(SyncConfig::from_env().is_err());
        env::set_var("SYNC_CONCURRENCY", "2");

        env::set_var("COHORT_SIZE_N", "0");
        assert!(SyncConfig::from_env().is_err());
        env::set_var("COHORT_SIZE_N", "200");

        env::set_var("ALERT_THRESHOLD_PERCENT", "-5");
        assert!(SyncConfig::from_env().is_err());
        env::set_var("ALERT_THRESHOLD_PERCENT", "20");

        env::set_var("SYNC_BATCH_SIZE", "0");
        let cfg = SyncConfig::from_env().unwrap();
        assert_eq!(cfg.batch_size, 1);
        env::remove_var("SYNC_BATCH_SIZE");

        let cfg = SyncConfig::from_env().unwrap();
        assert_eq!(cfg.cohort_size_n, 200);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.cron_cohort, "0 0 22 15 10 *");
        assert_eq!(cfg.timezone, chrono_tz::Asia::Bangkok);
    }
}
