// ─── Cohort capture (yearly) ────────────────────────────────────────
// Fixes the set of tracked customers for one fiscal year at one branch:
// upsert the upstream top-N, prune members that fell out, then backfill
// recent months of details. One local transaction; no partial cohort
// state survives a failure.

use crate::calendar::YearMonth;
use crate::error::{db_context, SyncResult};
use crate::models::{SyncType, TriggeredBy};
use crate::sync::{details, runlog, SyncDeps};

pub struct CohortOutcome {
    pub upserted: i64,
}

pub async fn capture(
    deps: &SyncDeps,
    fiscal_year: i32,
    branch_code: &str,
    debt_ym_upstream: &str,
    triggered_by: TriggeredBy,
) -> SyncResult<CohortOutcome> {
    log::info!(
        "[COHORT] Starting capture for {} fiscal_year={} debt_ym={}",
        branch_code,
        fiscal_year,
        debt_ym_upstream
    );

    let run_id = runlog::start(
        &deps.local,
        runlog::NewRun {
            sync_type: SyncType::CohortCapture,
            branch_code,
            triggered_by,
            year_month: None,
            fiscal_year: Some(fiscal_year),
            debt_ym: Some(debt_ym_upstream.to_string()),
        },
    )
    .await;

    let upserted = match capture_inner(deps, fiscal_year, branch_code, debt_ym_upstream).await {
        Ok(n) => n,
        Err(e) => {
            log::error!("[COHORT] Capture failed for {}: {}", branch_code, e);
            runlog::fail(&deps.local, run_id, &e.to_string()).await;
            return Err(e);
        }
    };

    runlog::succeed(&deps.local, run_id, upserted, 0).await;
    log::info!(
        "[COHORT] Capture complete for {}: {} members",
        branch_code,
        upserted
    );

    // Auto-backfill the reference month plus preceding months. The capture
    // above is already terminal success; backfill failures produce their
    // own run rows and never propagate.
    backfill(deps, branch_code, debt_ym_upstream, triggered_by).await;

    Ok(CohortOutcome { upserted })
}

async fn capture_inner(
    deps: &SyncDeps,
    fiscal_year: i32,
    branch_code: &str,
    debt_ym_upstream: &str,
) -> SyncResult<i64> {
    let rows = deps
        .upstream
        .fetch_cohort(branch_code, debt_ym_upstream, deps.config.cohort_size_n)
        .await?;

    let mut tx = deps
        .local
        .begin()
        .await
        .map_err(|e| db_context("cohort TX begin", e))?;

    let mut keep: Vec<String> = Vec::with_capacity(rows.len());
    for row in &rows {
        sqlx::query(
            r#"INSERT INTO cohort_members
               (fiscal_year, branch_code, cust_code, org_name, use_type, use_name,
                cust_name, address, route_code, meter_no, meter_size, meter_brand,
                meter_state, debt_ym)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
               ON CONFLICT (fiscal_year, branch_code, cust_code) DO UPDATE SET
                   org_name = EXCLUDED.org_name,
                   use_type = EXCLUDED.use_type,
                   use_name = EXCLUDED.use_name,
                   cust_name = EXCLUDED.cust_name,
                   address = EXCLUDED.address,
                   route_code = EXCLUDED.route_code,
                   meter_no = EXCLUDED.meter_no,
                   meter_size = EXCLUDED.meter_size,
                   meter_brand = EXCLUDED.meter_brand,
                   meter_state = EXCLUDED.meter_state,
                   debt_ym = EXCLUDED.debt_ym,
                   updated_at = NOW()"#,
        )
        .bind(fiscal_year)
        .bind(branch_code)
        .bind(&row.cust_code)
        .bind(&row.org_name)
        .bind(&row.use_type)
        .bind(&row.use_name)
        .bind(&row.cust_name)
        .bind(&row.address)
        .bind(&row.route_code)
        .bind(&row.meter_no)
        .bind(&row.meter_size)
        .bind(&row.meter_brand)
        .bind(&row.meter_state)
        .bind(&row.debt_ym)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_context("upsert cohort member", e))?;

        keep.push(row.cust_code.clone());
    }

    // Prune to the exact new top-N. Skipped when upstream returned nothing:
    // an empty answer must not wipe a previously captured cohort.
    if !keep.is_empty() {
        let pruned = sqlx::query(
            r#"DELETE FROM cohort_members
               WHERE fiscal_year = $1 AND branch_code = $2 AND cust_code <> ALL($3)"#,
        )
        .bind(fiscal_year)
        .bind(branch_code)
        .bind(&keep)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_context("prune cohort members", e))?;

        if pruned.rows_affected() > 0 {
            log::info!(
                "[COHORT] Pruned {} stale members for {} fiscal_year={}",
                pruned.rows_affected(),
                branch_code,
                fiscal_year
            );
        }
    }

    tx.commit()
        .await
        .map_err(|e| db_context("cohort TX commit", e))?;

    Ok(keep.len() as i64)
}

async fn backfill(
    deps: &SyncDeps,
    branch_code: &str,
    debt_ym_upstream: &str,
    triggered_by: TriggeredBy,
) {
    if deps.config.backfill_months == 0 {
        return;
    }
    let reference = match YearMonth::parse(debt_ym_upstream) {
        Ok(ym) => ym,
        Err(e) => {
            log::warn!(
                "[COHORT] Skipping backfill for {}: bad reference period {}: {}",
                branch_code,
                debt_ym_upstream,
                e
            );
            return;
        }
    };

    for ym in reference.prior_months(deps.config.backfill_months) {
        match details::sync(deps, ym, branch_code, triggered_by).await {
            Ok(outcome) => log::info!(
                "[COHORT] Backfill {} for {}: upserted={} zeroed={}",
                ym,
                branch_code,
                outcome.upserted,
                outcome.zeroed
            ),
            Err(e) => log::warn!("[COHORT] Backfill {} failed for {}: {}", ym, branch_code, e),
        }
    }
}
