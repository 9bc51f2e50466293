use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use watersync::calendar::YearMonth;
use watersync::config::SyncConfig;
use watersync::error::{SyncError, SyncResult};
use watersync::models::TriggeredBy;
use watersync::notify::{LogNotifier, Notifier, WebhookNotifier};
use watersync::scheduler::Scheduler;
use watersync::sync::{alert, cohort, details, SyncDeps};
use watersync::templates::SqlTemplates;
use watersync::upstream::SqlUpstream;
use watersync::{branches, db};

#[derive(Parser)]
#[command(
    name = "watersync",
    about = "Top-200 water-usage cohort sync between the billing store and the local analytical store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cron scheduler until SIGINT/SIGTERM
    Serve,
    /// Capture the cohort once for the given reference month
    CohortOnce {
        /// Reference month YYYYMM, Gregorian or Buddhist
        #[arg(long)]
        ym: String,
        /// Restrict to one branch code
        #[arg(long)]
        branch: Option<String>,
    },
    /// Sync one month of details once
    DetailsOnce {
        /// Month YYYYMM, Gregorian or Buddhist
        #[arg(long)]
        ym: String,
        /// Restrict to one branch code
        #[arg(long)]
        branch: Option<String>,
    },
    /// Compute the decrease alert once for the given month
    AlertOnce {
        /// Month YYYYMM, Gregorian or Buddhist
        #[arg(long)]
        ym: String,
    },
    /// Check upstream connectivity
    UpstreamPing,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("[INIT] {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> SyncResult<ExitCode> {
    let config = SyncConfig::from_env()?;
    let templates = SqlTemplates::load(&config.sql_dir)?;

    let local = connect("local", &config.local_dsn, &config).await?;
    let upstream_pool = connect("upstream", &config.upstream_dsn, &config).await?;

    db::init_local_tables(&local)
        .await
        .map_err(|e| SyncError::Config(format!("local schema bootstrap: {e}")))?;

    // Modes that target a single branch (or none) can run without the full
    // branch list; scheduled and whole-fleet modes cannot.
    let branch_list = match branches::resolve(&config) {
        Ok(list) => list,
        Err(e) => match &cli.command {
            Commands::UpstreamPing
            | Commands::CohortOnce { branch: Some(_), .. }
            | Commands::DetailsOnce { branch: Some(_), .. } => {
                log::warn!("[MAIN] Branch list unavailable: {e}");
                Vec::new()
            }
            _ => return Err(e),
        },
    };
    let notifier: Arc<dyn Notifier> = match &config.alert_notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let deps = Arc::new(SyncDeps {
        local,
        upstream: Arc::new(SqlUpstream::new(upstream_pool, templates)),
        notifier,
        branches: branch_list,
        config,
    });

    match cli.command {
        Commands::Serve => {
            Scheduler::new(deps).run_until_shutdown().await?;
        }
        Commands::CohortOnce { ym, branch } => {
            let ym = YearMonth::parse(&ym)?;
            let fiscal_year = ym.fiscal_year();
            let debt_ym = ym.to_upstream();
            for branch_code in select_branches(&deps, branch.as_deref()) {
                // Per-branch failures are in the operation log; they never
                // change the exit code.
                if let Err(e) = cohort::capture(
                    &deps,
                    fiscal_year,
                    &branch_code,
                    &debt_ym,
                    TriggeredBy::Manual,
                )
                .await
                {
                    log::error!("[MAIN] Cohort capture failed for {branch_code}: {e}");
                }
            }
        }
        Commands::DetailsOnce { ym, branch } => {
            let ym = YearMonth::parse(&ym)?;
            for branch_code in select_branches(&deps, branch.as_deref()) {
                if let Err(e) = details::sync(&deps, ym, &branch_code, TriggeredBy::Manual).await {
                    log::error!("[MAIN] Details sync failed for {branch_code}: {e}");
                }
            }
        }
        Commands::AlertOnce { ym } => {
            let ym = YearMonth::parse(&ym)?;
            if let Err(e) =
                alert::compute_and_notify(&deps, ym, deps.config.alert_threshold_percent).await
            {
                log::error!("[MAIN] Alert computation failed: {e}");
            }
        }
        Commands::UpstreamPing => {
            deps.upstream.ping().await?;
            log::info!("[MAIN] Upstream reachable");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn connect(which: &str, dsn: &str, config: &SyncConfig) -> SyncResult<PgPool> {
    let options: PgConnectOptions = dsn
        .parse()
        .map_err(|e| SyncError::Config(format!("bad {which} DSN: {e}")))?;
    // Server-side statement deadline: a stuck monthly pull or transaction
    // fails as a retryable error instead of holding a connection forever.
    let options = options.options([(
        "statement_timeout",
        config.query_timeout.as_millis().to_string(),
    )]);

    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_connect_timeout)
        .connect_with(options)
        .await
        .map_err(|e| SyncError::Config(format!("cannot connect to {which} store: {e}")))
}

fn select_branches(deps: &SyncDeps, only: Option<&str>) -> Vec<String> {
    match only {
        Some(code) => vec![code.to_string()],
        None => deps.branches.clone(),
    }
}
