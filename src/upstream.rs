use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{classify_upstream, SyncResult};
use crate::models::{UpstreamCohortRow, UpstreamDetailRow};
use crate::templates::SqlTemplates;

/// Read-only access to the authoritative billing store. A trait so tests
/// and the one-shot ping share the same seam as the real pool.
#[async_trait]
pub trait UpstreamReader: Send + Sync {
    async fn ping(&self) -> SyncResult<()>;

    /// Top-N customers for a branch at the reference debt period.
    async fn fetch_cohort(
        &self,
        branch_code: &str,
        debt_ym: &str,
        limit: i64,
    ) -> SyncResult<Vec<UpstreamCohortRow>>;

    /// Monthly readings for one batch of customer codes.
    async fn fetch_details(
        &self,
        branch_code: &str,
        debt_ym: &str,
        cust_codes: &[String],
    ) -> SyncResult<Vec<UpstreamDetailRow>>;
}

pub struct SqlUpstream {
    pool: PgPool,
    templates: SqlTemplates,
}

impl SqlUpstream {
    pub fn new(pool: PgPool, templates: SqlTemplates) -> Self {
        Self { pool, templates }
    }
}

#[async_trait]
impl UpstreamReader for SqlUpstream {
    async fn ping(&self) -> SyncResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_upstream("ping", e))?;
        Ok(())
    }

    async fn fetch_cohort(
        &self,
        branch_code: &str,
        debt_ym: &str,
        limit: i64,
    ) -> SyncResult<Vec<UpstreamCohortRow>> {
        let rows = sqlx::query_as::<_, UpstreamCohortRow>(self.templates.top_minimal())
            .bind(branch_code)
            .bind(debt_ym)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_upstream("fetch cohort", e))?;
        log::debug!(
            "[UPSTREAM] Cohort query returned {} rows for {} @ {}",
            rows.len(),
            branch_code,
            debt_ym
        );
        Ok(rows)
    }

    async fn fetch_details(
        &self,
        branch_code: &str,
        debt_ym: &str,
        cust_codes: &[String],
    ) -> SyncResult<Vec<UpstreamDetailRow>> {
        let sql = self.templates.details().with_cust_filter(cust_codes.len());
        let mut query = sqlx::query_as::<_, UpstreamDetailRow>(&sql)
            .bind(branch_code)
            .bind(debt_ym);
        for code in cust_codes {
            query = query.bind(code);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_upstream("fetch details", e))?;
        Ok(rows)
    }
}
