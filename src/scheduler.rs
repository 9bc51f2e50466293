// ─── Scheduler & job driver ─────────────────────────────────────────
// Drives the yearly cohort capture, the monthly details sync, and the
// decrease alert on cron, in the configured timezone. Within a job,
// branches fan out to a semaphore-bounded worker pool with a finite retry
// budget per branch; every attempt opens its own sync run. Outcomes are
// aggregated into one report per job.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::calendar::YearMonth;
use crate::error::{SyncError, SyncResult};
use crate::models::TriggeredBy;
use crate::sync::{alert, cohort, details, SyncDeps};

/// Terminal result of one branch within one job.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch_code: String,
    pub attempts: u32,
    pub error: Option<String>,
}

pub struct Scheduler {
    deps: Arc<SyncDeps>,
    cancel: CancellationToken,
    active_jobs: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(deps: Arc<SyncDeps>) -> Self {
        Self {
            deps,
            cancel: CancellationToken::new(),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the cron loop until SIGINT/SIGTERM, then drain in-flight jobs.
    pub async fn run_until_shutdown(&self) -> SyncResult<()> {
        let mut sched = JobScheduler::new()
            .await
            .map_err(|e| SyncError::Config(format!("scheduler init: {e}")))?;
        let tz = self.deps.config.timezone;

        if self.deps.config.enable_cohort {
            let cron = self.deps.config.cron_cohort.clone();
            self.add_job(&mut sched, &cron, tz, JobKind::Cohort).await?;
            log::info!("[SCHEDULER] Cohort capture scheduled: {} ({})", cron, tz);
        }
        if self.deps.config.enable_details {
            let cron = self.deps.config.cron_details.clone();
            self.add_job(&mut sched, &cron, tz, JobKind::Details).await?;
            log::info!("[SCHEDULER] Details sync scheduled: {} ({})", cron, tz);
        }
        if self.deps.config.enable_alert {
            let cron = self.deps.config.cron_alert.clone();
            self.add_job(&mut sched, &cron, tz, JobKind::Alert).await?;
            log::info!("[SCHEDULER] Decrease alert scheduled: {} ({})", cron, tz);
        }

        sched
            .start()
            .await
            .map_err(|e| SyncError::Config(format!("scheduler start: {e}")))?;

        wait_for_shutdown_signal().await;
        log::info!("[SCHEDULER] Shutdown signal received, draining in-flight jobs");

        self.cancel.cancel();
        sched.shutdown().await.ok();
        self.drain(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn add_job(
        &self,
        sched: &mut JobScheduler,
        cron: &str,
        tz: chrono_tz::Tz,
        kind: JobKind,
    ) -> SyncResult<()> {
        let deps = Arc::clone(&self.deps);
        let cancel = self.cancel.clone();
        let active = Arc::clone(&self.active_jobs);

        let job = Job::new_async_tz(cron, tz, move |_id, _lock| {
            let deps = Arc::clone(&deps);
            let cancel = cancel.clone();
            let active = Arc::clone(&active);
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return;
                }
                active.fetch_add(1, Ordering::SeqCst);
                match kind {
                    JobKind::Cohort => run_cohort_job(&deps, &cancel).await,
                    JobKind::Details => run_details_job(&deps, &cancel).await,
                    JobKind::Alert => run_alert_job(&deps).await,
                }
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .map_err(|e| SyncError::Config(format!("bad cron expression {cron:?}: {e}")))?;

        sched
            .add(job)
            .await
            .map_err(|e| SyncError::Config(format!("add job: {e}")))?;
        Ok(())
    }

    async fn drain(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_jobs.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "[SCHEDULER] {} jobs still active after {}s grace, exiting anyway",
                    self.active_jobs.load(Ordering::SeqCst),
                    grace.as_secs()
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Cohort,
    Details,
    Alert,
}

// ─── Scheduled job bodies ───────────────────────────────────────────

/// Yearly cohort capture: the reference period is October of the current
/// year in the configured timezone.
pub async fn run_cohort_job(deps: &Arc<SyncDeps>, cancel: &CancellationToken) {
    let now = Utc::now().with_timezone(&deps.config.timezone);
    let october = match YearMonth::new(now.year(), 10) {
        Ok(ym) => ym,
        Err(e) => {
            log::error!("[DRIVER] Cannot derive cohort reference period: {e}");
            return;
        }
    };
    let fiscal_year = october.fiscal_year();
    let debt_ym = october.to_upstream();

    let deps_for_op = Arc::clone(deps);
    let outcomes = run_branch_fanout(
        &deps.branches,
        deps.config.concurrency,
        deps.config.retries,
        deps.config.retry_delay,
        cancel.clone(),
        move |branch| {
            let deps = Arc::clone(&deps_for_op);
            let debt_ym = debt_ym.clone();
            async move {
                cohort::capture(
                    &deps,
                    fiscal_year,
                    &branch,
                    &debt_ym,
                    TriggeredBy::Scheduler,
                )
                .await
                .map(|_| ())
            }
        },
    )
    .await;

    report(deps, &format!("Cohort capture FY{fiscal_year}"), &outcomes).await;
}

/// Monthly details sync for the current month in the configured timezone.
pub async fn run_details_job(deps: &Arc<SyncDeps>, cancel: &CancellationToken) {
    let now = Utc::now().with_timezone(&deps.config.timezone);
    let ym = YearMonth::from_date(&now);

    let deps_for_op = Arc::clone(deps);
    let outcomes = run_branch_fanout(
        &deps.branches,
        deps.config.concurrency,
        deps.config.retries,
        deps.config.retry_delay,
        cancel.clone(),
        move |branch| {
            let deps = Arc::clone(&deps_for_op);
            async move {
                details::sync(&deps, ym, &branch, TriggeredBy::Scheduler)
                    .await
                    .map(|_| ())
            }
        },
    )
    .await;

    report(deps, &format!("Details sync {ym}"), &outcomes).await;
}

pub async fn run_alert_job(deps: &Arc<SyncDeps>) {
    let now = Utc::now().with_timezone(&deps.config.timezone);
    let ym = YearMonth::from_date(&now);

    if let Err(e) =
        alert::compute_and_notify(deps, ym, deps.config.alert_threshold_percent).await
    {
        log::error!("[DRIVER] Alert job failed for {ym}: {e}");
    }
}

// ─── Fan-out with retries ───────────────────────────────────────────

/// Run `op` once per branch on a pool of at most `concurrency` workers.
/// Each branch gets up to `retries` additional attempts with `retry_delay`
/// between them; a branch fails iff its final attempt errored. Retries
/// beyond a cancellation are abandoned.
pub async fn run_branch_fanout<F, Fut>(
    branches: &[String],
    concurrency: usize,
    retries: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
    op: F,
) -> Vec<BranchOutcome>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let op = Arc::new(op);

    let handles: Vec<JoinHandle<BranchOutcome>> = branches
        .iter()
        .map(|branch| {
            let branch = branch.clone();
            let semaphore = Arc::clone(&semaphore);
            let op = Arc::clone(&op);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return BranchOutcome {
                            branch_code: branch,
                            attempts: 0,
                            error: Some("worker pool closed".to_string()),
                        }
                    }
                };

                let max_attempts = retries + 1;
                let mut attempts = 0u32;
                let mut last_error: Option<String> = None;

                while attempts < max_attempts {
                    if cancel.is_cancelled() {
                        last_error = Some(
                            SyncError::Cancelled("shutdown before attempt".to_string())
                                .to_string(),
                        );
                        break;
                    }
                    attempts += 1;

                    match op(branch.clone()).await {
                        Ok(()) => {
                            last_error = None;
                            break;
                        }
                        Err(e) => {
                            log::warn!(
                                "[DRIVER] {} attempt {}/{} failed: {}",
                                branch,
                                attempts,
                                max_attempts,
                                e
                            );
                            last_error = Some(e.to_string());
                            if attempts < max_attempts {
                                tokio::select! {
                                    _ = tokio::time::sleep(retry_delay) => {}
                                    _ = cancel.cancelled() => {
                                        log::warn!(
                                            "[DRIVER] {} abandoning retries on shutdown",
                                            branch
                                        );
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }

                BranchOutcome {
                    branch_code: branch,
                    attempts,
                    error: last_error,
                }
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => log::error!("[DRIVER] Branch task panicked: {e}"),
        }
    }
    outcomes
}

/// One human-readable line per job run, plus the failed-branch list.
pub fn summarize_outcomes(job_name: &str, outcomes: &[BranchOutcome]) -> (String, bool) {
    let failed: Vec<&BranchOutcome> = outcomes.iter().filter(|o| o.error.is_some()).collect();
    let ok = outcomes.len() - failed.len();

    if failed.is_empty() {
        return (
            format!("{job_name}: all {ok} branches succeeded"),
            false,
        );
    }

    let codes: Vec<&str> = failed.iter().map(|o| o.branch_code.as_str()).collect();
    let representative = failed[0]
        .error
        .as_deref()
        .unwrap_or("unknown error");
    (
        format!(
            "{job_name}: {ok}/{} branches succeeded\nFailed: {}\nFirst error: {}",
            outcomes.len(),
            codes.join(", "),
            representative
        ),
        true,
    )
}

async fn report(deps: &Arc<SyncDeps>, job_name: &str, outcomes: &[BranchOutcome]) {
    let (body, any_failed) = summarize_outcomes(job_name, outcomes);
    if any_failed {
        log::error!("[DRIVER] {}", body);
    } else {
        log::info!("[DRIVER] {}", body);
    }

    if let Err(e) = deps
        .notifier
        .send_text(&deps.config.alert_notify_target, &body)
        .await
    {
        log::warn!("[DRIVER] Failed to send job report: {e}");
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn branches(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("BR{i}")).collect()
    }

    #[tokio::test]
    async fn test_fail_once_then_succeed() {
        let calls: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));
        let calls_in_op = Arc::clone(&calls);

        let outcomes = run_branch_fanout(
            &branches(1),
            2,
            2,
            Duration::ZERO,
            CancellationToken::new(),
            move |branch| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    let attempt = {
                        let mut map = calls.lock().unwrap();
                        let entry = map.entry(branch).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    if attempt == 1 {
                        Err(SyncError::UpstreamUnavailable("flaky".to_string()))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].attempts, 2);
        assert!(outcomes[0].error.is_none());
        // The branch must not appear in the failure report.
        let (_, any_failed) = summarize_outcomes("test", &outcomes);
        assert!(!any_failed);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let outcomes = run_branch_fanout(
            &branches(1),
            2,
            2,
            Duration::ZERO,
            CancellationToken::new(),
            |_branch| async { Err(SyncError::LocalStore("down".to_string())) },
        )
        .await;

        assert_eq!(outcomes[0].attempts, 3); // 1 + retries
        assert!(outcomes[0].error.is_some());

        let (body, any_failed) = summarize_outcomes("test", &outcomes);
        assert!(any_failed);
        // The branch appears exactly once in the report.
        assert_eq!(body.matches("BR1").count(), 1);
    }

    #[tokio::test]
    async fn test_all_branches_complete_under_narrow_pool() {
        let outcomes = run_branch_fanout(
            &branches(5),
            1,
            0,
            Duration::ZERO,
            CancellationToken::new(),
            |_branch| async { Ok(()) },
        )
        .await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.error.is_none()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = run_branch_fanout(
            &branches(2),
            2,
            2,
            Duration::ZERO,
            cancel,
            |_branch| async { Ok(()) },
        )
        .await;

        assert!(outcomes.iter().all(|o| o.attempts == 0));
        assert!(outcomes.iter().all(|o| o.error.is_some()));
    }

    #[test]
    fn test_summarize_lists_failed_branches() {
        let outcomes = vec![
            BranchOutcome {
                branch_code: "BA01".to_string(),
                attempts: 3,
                error: Some("upstream unavailable: pool timed out".to_string()),
            },
            BranchOutcome {
                branch_code: "BA02".to_string(),
                attempts: 1,
                error: None,
            },
        ];

        let (body, any_failed) = summarize_outcomes("Details sync 202410", &outcomes);
        assert!(any_failed);
        assert!(body.contains("1/2 branches succeeded"));
        assert!(body.contains("BA01"));
        assert!(body.contains("pool timed out"));
    }
}
