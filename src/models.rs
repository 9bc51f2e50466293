use chrono::{DateTime, Utc};
use serde::Serialize;

// ─── Job identity ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    CohortCapture,
    DetailsSync,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::CohortCapture => "cohort_capture",
            SyncType::DetailsSync => "details_sync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggeredBy {
    Scheduler,
    Api,
    Manual,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Api => "api",
            TriggeredBy::Manual => "manual",
        }
    }
}

// ─── Local rows ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CohortMemberRow {
    pub fiscal_year: i32,
    pub branch_code: String,
    pub cust_code: String,
    pub org_name: Option<String>,
    pub use_type: Option<String>,
    pub use_name: Option<String>,
    pub cust_name: Option<String>,
    pub address: Option<String>,
    pub route_code: Option<String>,
    pub meter_no: Option<String>,
    pub meter_size: Option<String>,
    pub meter_brand: Option<String>,
    pub meter_state: Option<String>,
    pub debt_ym: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeterDetailRow {
    pub fiscal_year: i32,
    pub year_month: String,
    pub branch_code: String,
    pub cust_code: String,
    pub org_name: Option<String>,
    pub use_type: Option<String>,
    pub use_name: Option<String>,
    pub cust_name: Option<String>,
    pub address: Option<String>,
    pub route_code: Option<String>,
    pub meter_no: Option<String>,
    pub meter_size: Option<String>,
    pub meter_brand: Option<String>,
    pub meter_state: Option<String>,
    pub average: f64,
    pub present_meter_count: f64,
    pub present_water_usg: f64,
    pub debt_ym: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One per-branch execution of a job. Append-only; terminal rows are never
/// mutated again.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncRunRow {
    pub id: i64,
    pub sync_type: String,
    pub branch_code: String,
    pub year_month: Option<String>,
    pub fiscal_year: Option<i32>,
    pub debt_ym: Option<String>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub records_upserted: Option<i64>,
    pub records_zeroed: Option<i64>,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

// ─── Upstream rows ──────────────────────────────────────────────────

/// One row of the cohort selection template. Every descriptive field may be
/// NULL upstream; none of them may break the scan.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpstreamCohortRow {
    pub branch_code: Option<String>,
    pub org_name: Option<String>,
    pub cust_code: String,
    pub use_type: Option<String>,
    pub use_name: Option<String>,
    pub cust_name: Option<String>,
    pub address: Option<String>,
    pub route_code: Option<String>,
    pub meter_no: Option<String>,
    pub meter_size: Option<String>,
    pub meter_brand: Option<String>,
    pub meter_state: Option<String>,
    pub debt_ym: Option<String>,
}

/// One row of the monthly details template. Numeric NULLs land as None and
/// are stored as 0.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpstreamDetailRow {
    pub cust_code: String,
    pub meter_no: Option<String>,
    pub average: Option<f64>,
    pub present_meter_count: Option<f64>,
    pub present_water_usg: Option<f64>,
    pub debt_ym: Option<String>,
}

/// The slice of a cohort member the monthly sync needs: the key plus the
/// snapshot fields carried onto synthetic-zero rows.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CohortSnapshot {
    pub cust_code: String,
    pub use_type: Option<String>,
    pub meter_no: Option<String>,
    pub meter_state: Option<String>,
}
