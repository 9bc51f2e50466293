// ─── Operation log ──────────────────────────────────────────────────
// One row per per-branch job execution. Append-only: a row is created
// in_progress and transitioned exactly once to success or error.
// Logging failures never fail the sync they describe: `start` returns 0
// and the terminal calls skip id 0.

use sqlx::PgPool;

use crate::error::{db_context, SyncResult};
use crate::models::{SyncRunRow, SyncType, TriggeredBy};

pub struct NewRun<'a> {
    pub sync_type: SyncType,
    pub branch_code: &'a str,
    pub triggered_by: TriggeredBy,
    pub year_month: Option<String>,
    pub fiscal_year: Option<i32>,
    pub debt_ym: Option<String>,
}

/// Open an in_progress run and return its id, or 0 if the log itself is
/// unavailable.
pub async fn start(pool: &PgPool, run: NewRun<'_>) -> i64 {
    let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"INSERT INTO sync_runs
           (sync_type, branch_code, year_month, fiscal_year, debt_ym, status, triggered_by)
           VALUES ($1, $2, $3, $4, $5, 'in_progress', $6)
           RETURNING id"#,
    )
    .bind(run.sync_type.as_str())
    .bind(run.branch_code)
    .bind(&run.year_month)
    .bind(run.fiscal_year)
    .bind(&run.debt_ym)
    .bind(run.triggered_by.as_str())
    .fetch_one(pool)
    .await;

    match result {
        Ok((id,)) => id,
        Err(e) => {
            log::warn!(
                "[RUNLOG] Failed to open run for {} {}: {}",
                run.sync_type.as_str(),
                run.branch_code,
                e
            );
            0
        }
    }
}

pub async fn succeed(pool: &PgPool, id: i64, upserted: i64, zeroed: i64) {
    if id == 0 {
        return;
    }
    let result = sqlx::query(
        r#"UPDATE sync_runs
           SET status = 'success',
               finished_at = NOW(),
               duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT,
               records_upserted = $2,
               records_zeroed = $3
           WHERE id = $1 AND status = 'in_progress'"#,
    )
    .bind(id)
    .bind(upserted)
    .bind(zeroed)
    .execute(pool)
    .await;

    if let Err(e) = result {
        log::warn!("[RUNLOG] Failed to close run {} as success: {}", id, e);
    }
}

pub async fn fail(pool: &PgPool, id: i64, error_message: &str) {
    if id == 0 {
        return;
    }
    let result = sqlx::query(
        r#"UPDATE sync_runs
           SET status = 'error',
               finished_at = NOW(),
               duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT,
               error_message = $2
           WHERE id = $1 AND status = 'in_progress'"#,
    )
    .bind(id)
    .bind(error_message)
    .execute(pool)
    .await;

    if let Err(e) = result {
        log::warn!("[RUNLOG] Failed to close run {} as error: {}", id, e);
    }
}

// ─── Query surface ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub branch_code: Option<String>,
    pub sync_type: Option<String>,
    pub status: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// List runs newest-first with a total count for pagination.
pub async fn list(pool: &PgPool, filter: &RunFilter) -> SyncResult<(Vec<SyncRunRow>, i64)> {
    let limit = if filter.limit == 0 {
        50
    } else {
        filter.limit.clamp(1, 500)
    };
    let offset = filter.offset.max(0);

    let rows = sqlx::query_as::<_, SyncRunRow>(
        r#"SELECT id, sync_type, branch_code, year_month, fiscal_year, debt_ym,
                  status, started_at, finished_at, duration_ms,
                  records_upserted, records_zeroed, error_message,
                  triggered_by, created_at
           FROM sync_runs
           WHERE ($1::TEXT IS NULL OR branch_code = $1)
             AND ($2::TEXT IS NULL OR sync_type = $2)
             AND ($3::TEXT IS NULL OR status = $3)
           ORDER BY created_at DESC
           LIMIT $4 OFFSET $5"#,
    )
    .bind(&filter.branch_code)
    .bind(&filter.sync_type)
    .bind(&filter.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(|e| db_context("list sync runs", e))?;

    let (total,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*)
           FROM sync_runs
           WHERE ($1::TEXT IS NULL OR branch_code = $1)
             AND ($2::TEXT IS NULL OR sync_type = $2)
             AND ($3::TEXT IS NULL OR status = $3)"#,
    )
    .bind(&filter.branch_code)
    .bind(&filter.sync_type)
    .bind(&filter.status)
    .fetch_one(pool)
    .await
    .map_err(|e| db_context("count sync runs", e))?;

    Ok((rows, total))
}
