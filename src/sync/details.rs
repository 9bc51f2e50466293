// ─── Details sync (monthly) ─────────────────────────────────────────
// Pulls one month of readings for exactly the captured cohort and
// materializes a gap-free result set: real rows from upstream, synthetic
// zeros for members upstream has nothing for. One transaction per batch
// so a 40-batch run never holds a multi-minute write lock; earlier
// batches stay committed when a later one fails, and the idempotent
// upserts plus the pre-run prune heal the month on re-run.

use std::collections::HashSet;

use crate::calendar::YearMonth;
use crate::error::{db_context, SyncResult};
use crate::models::{CohortSnapshot, SyncType, TriggeredBy, UpstreamDetailRow};
use crate::sync::{runlog, SyncDeps};

pub struct DetailsOutcome {
    pub upserted: i64,
    pub zeroed: i64,
}

pub async fn sync(
    deps: &SyncDeps,
    ym: YearMonth,
    branch_code: &str,
    triggered_by: TriggeredBy,
) -> SyncResult<DetailsOutcome> {
    let fiscal_year = ym.fiscal_year();
    let ym_gregorian = ym.to_string();
    let ym_upstream = ym.to_upstream();

    log::info!(
        "[DETAILS] Starting sync for {} ym={} fiscal_year={}",
        branch_code,
        ym_gregorian,
        fiscal_year
    );

    let run_id = runlog::start(
        &deps.local,
        runlog::NewRun {
            sync_type: SyncType::DetailsSync,
            branch_code,
            triggered_by,
            year_month: Some(ym_gregorian.clone()),
            fiscal_year: Some(fiscal_year),
            debt_ym: Some(ym_upstream.clone()),
        },
    )
    .await;

    match sync_inner(deps, ym, branch_code).await {
        Ok(outcome) => {
            runlog::succeed(&deps.local, run_id, outcome.upserted, outcome.zeroed).await;
            log::info!(
                "[DETAILS] Sync complete for {} ym={}: upserted={} zeroed={}",
                branch_code,
                ym_gregorian,
                outcome.upserted,
                outcome.zeroed
            );
            Ok(outcome)
        }
        Err(e) => {
            log::error!(
                "[DETAILS] Sync failed for {} ym={}: {}",
                branch_code,
                ym_gregorian,
                e
            );
            runlog::fail(&deps.local, run_id, &e.to_string()).await;
            Err(e)
        }
    }
}

async fn sync_inner(
    deps: &SyncDeps,
    ym: YearMonth,
    branch_code: &str,
) -> SyncResult<DetailsOutcome> {
    let fiscal_year = ym.fiscal_year();
    let ym_gregorian = ym.to_string();
    let ym_upstream = ym.to_upstream();

    // Ordered load keeps batch membership and bind order identical across
    // retries.
    let cohort = sqlx::query_as::<_, CohortSnapshot>(
        r#"SELECT cust_code, use_type, meter_no, meter_state
           FROM cohort_members
           WHERE fiscal_year = $1 AND branch_code = $2
           ORDER BY cust_code"#,
    )
    .bind(fiscal_year)
    .bind(branch_code)
    .fetch_all(&deps.local)
    .await
    .map_err(|e| db_context("load cohort", e))?;

    if cohort.is_empty() {
        log::info!(
            "[DETAILS] No cohort for {} fiscal_year={}, nothing to sync",
            branch_code,
            fiscal_year
        );
        return Ok(DetailsOutcome {
            upserted: 0,
            zeroed: 0,
        });
    }

    let codes: Vec<String> = cohort.iter().map(|c| c.cust_code.clone()).collect();

    // Prune rows whose customer fell out of the cohort before writing
    // anything, so a shrunken cohort cannot leak stale members into the
    // month.
    let pruned = sqlx::query(
        r#"DELETE FROM meter_details
           WHERE fiscal_year = $1 AND year_month = $2 AND branch_code = $3
             AND cust_code <> ALL($4)"#,
    )
    .bind(fiscal_year)
    .bind(&ym_gregorian)
    .bind(branch_code)
    .bind(&codes)
    .execute(&deps.local)
    .await
    .map_err(|e| db_context("prune stale details", e))?;

    if pruned.rows_affected() > 0 {
        log::info!(
            "[DETAILS] Pruned {} stale rows for {} ym={}",
            pruned.rows_affected(),
            branch_code,
            ym_gregorian
        );
    }

    let batch_size = deps.config.batch_size.max(1);
    let mut upserted: i64 = 0;
    let mut zeroed: i64 = 0;

    for (index, batch) in cohort.chunks(batch_size).enumerate() {
        let start = index * batch_size;
        let batch_ctx = format!(
            "batch {}..{} of {} ym={}",
            start,
            start + batch.len(),
            branch_code,
            ym_gregorian
        );
        let batch_codes: Vec<String> = batch.iter().map(|c| c.cust_code.clone()).collect();

        let rows = deps
            .upstream
            .fetch_details(branch_code, &ym_upstream, &batch_codes)
            .await
            .map_err(|e| e.context(&batch_ctx))?;

        let (real, synthetic) = upsert_batch(
            deps,
            fiscal_year,
            &ym_gregorian,
            &ym_upstream,
            branch_code,
            batch,
            &rows,
        )
        .await
        .map_err(|e| e.context(&batch_ctx))?;

        upserted += real;
        zeroed += synthetic;
        log::debug!("[DETAILS] {}: {} real, {} zeroed", batch_ctx, real, synthetic);
    }

    Ok(DetailsOutcome { upserted, zeroed })
}

/// Write one batch in one transaction: real rows first, then a
/// synthetic-zero row for every batch member upstream did not mention.
async fn upsert_batch(
    deps: &SyncDeps,
    fiscal_year: i32,
    ym_gregorian: &str,
    ym_upstream: &str,
    branch_code: &str,
    batch: &[CohortSnapshot],
    rows: &[UpstreamDetailRow],
) -> SyncResult<(i64, i64)> {
    let mut tx = deps
        .local
        .begin()
        .await
        .map_err(|e| db_context("details TX begin", e))?;

    let mut seen: HashSet<&str> = HashSet::with_capacity(rows.len());
    for row in rows {
        // An upstream cust_code outside the batch is unexpected but
        // harmless; it is upserted like any other row.
        sqlx::query(
            r#"INSERT INTO meter_details
               (fiscal_year, year_month, branch_code, cust_code, meter_no,
                average, present_meter_count, present_water_usg, debt_ym)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (fiscal_year, year_month, branch_code, cust_code) DO UPDATE SET
                   meter_no = EXCLUDED.meter_no,
                   average = EXCLUDED.average,
                   present_meter_count = EXCLUDED.present_meter_count,
                   present_water_usg = EXCLUDED.present_water_usg,
                   debt_ym = EXCLUDED.debt_ym,
                   updated_at = NOW()"#,
        )
        .bind(fiscal_year)
        .bind(ym_gregorian)
        .bind(branch_code)
        .bind(&row.cust_code)
        .bind(&row.meter_no)
        .bind(row.average.unwrap_or_default())
        .bind(row.present_meter_count.unwrap_or_default())
        .bind(row.present_water_usg.unwrap_or_default())
        .bind(row.debt_ym.as_deref().unwrap_or(ym_upstream))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_context("upsert detail", e))?;

        seen.insert(row.cust_code.as_str());
    }

    let missing = missing_members(batch, &seen);
    for member in &missing {
        sqlx::query(
            r#"INSERT INTO meter_details
               (fiscal_year, year_month, branch_code, cust_code, org_name,
                use_type, meter_no, meter_state,
                average, present_meter_count, present_water_usg, debt_ym)
               VALUES ($1, $2, $3, $4, '', $5, $6, $7, 0, 0, 0, $8)
               ON CONFLICT (fiscal_year, year_month, branch_code, cust_code) DO UPDATE SET
                   org_name = EXCLUDED.org_name,
                   use_type = EXCLUDED.use_type,
                   meter_no = EXCLUDED.meter_no,
                   meter_state = EXCLUDED.meter_state,
                   average = 0,
                   present_meter_count = 0,
                   present_water_usg = 0,
                   debt_ym = EXCLUDED.debt_ym,
                   updated_at = NOW()"#,
        )
        .bind(fiscal_year)
        .bind(ym_gregorian)
        .bind(branch_code)
        .bind(&member.cust_code)
        .bind(&member.use_type)
        .bind(&member.meter_no)
        .bind(&member.meter_state)
        .bind(ym_upstream)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_context("upsert synthetic zero", e))?;
    }

    tx.commit()
        .await
        .map_err(|e| db_context("details TX commit", e))?;

    Ok((rows.len() as i64, missing.len() as i64))
}

/// Batch members with no upstream row, in batch order.
fn missing_members<'a>(
    batch: &'a [CohortSnapshot],
    seen: &HashSet<&str>,
) -> Vec<&'a CohortSnapshot> {
    batch
        .iter()
        .filter(|m| !seen.contains(m.cust_code.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(code: &str) -> CohortSnapshot {
        CohortSnapshot {
            cust_code: code.to_string(),
            use_type: Some("1".to_string()),
            meter_no: Some(format!("M{code}")),
            meter_state: Some("ACTIVE".to_string()),
        }
    }

    #[test]
    fn test_missing_members_complements_seen() {
        let batch = vec![snapshot("C1"), snapshot("C2"), snapshot("C3")];
        let seen: HashSet<&str> = ["C2"].into_iter().collect();

        let missing = missing_members(&batch, &seen);
        let codes: Vec<&str> = missing.iter().map(|m| m.cust_code.as_str()).collect();
        assert_eq!(codes, vec!["C1", "C3"]);
    }

    #[test]
    fn test_missing_members_empty_when_all_seen() {
        let batch = vec![snapshot("C1"), snapshot("C2")];
        let seen: HashSet<&str> = ["C1", "C2"].into_iter().collect();
        assert!(missing_members(&batch, &seen).is_empty());
    }

    // Zero-fill completeness over a whole month: real + synthetic always
    // covers the batch, and a customer outside the batch never shrinks the
    // synthetic set.
    #[test]
    fn test_unexpected_customer_does_not_displace_zero_fill() {
        let batch = vec![snapshot("C1"), snapshot("C2")];
        let seen: HashSet<&str> = ["C1", "C9"].into_iter().collect();

        let missing = missing_members(&batch, &seen);
        let codes: Vec<&str> = missing.iter().map(|m| m.cust_code.as_str()).collect();
        assert_eq!(codes, vec!["C2"]);
    }
}
