use sqlx::PgPool;

/// Initialize all local tables.
/// Safe to call on every startup — uses IF NOT EXISTS throughout, so an
/// externally migrated schema passes through untouched.
/// Each statement is executed individually (sqlx limitation: no multi-statement queries).
pub async fn init_local_tables(pool: &PgPool) -> Result<(), sqlx::Error> {
    for ddl in LOCAL_DDL_STATEMENTS {
        sqlx::query(ddl).execute(pool).await?;
    }
    log::info!("[DB] All local tables initialized");
    Ok(())
}

const LOCAL_DDL_STATEMENTS: &[&str] = &[
    // ─── Branches (seeded externally, read-only to the sync) ────────
    "CREATE TABLE IF NOT EXISTS branches (
        code        TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",

    // ─── Cohort members (one fiscal year's tracked customers) ───────
    "CREATE TABLE IF NOT EXISTS cohort_members (
        id            BIGSERIAL PRIMARY KEY,
        fiscal_year   INTEGER NOT NULL,
        branch_code   TEXT NOT NULL,
        cust_code     TEXT NOT NULL,
        org_name      TEXT,
        use_type      TEXT,
        use_name      TEXT,
        cust_name     TEXT,
        address       TEXT,
        route_code    TEXT,
        meter_no      TEXT,
        meter_size    TEXT,
        meter_brand   TEXT,
        meter_state   TEXT,
        debt_ym       TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_cohort_member UNIQUE (fiscal_year, branch_code, cust_code)
    )",
    "CREATE INDEX IF NOT EXISTS idx_cohort_members_branch ON cohort_members (fiscal_year, branch_code)",

    // ─── Meter details (one member-month reading) ───────────────────
    "CREATE TABLE IF NOT EXISTS meter_details (
        id                  BIGSERIAL PRIMARY KEY,
        fiscal_year         INTEGER NOT NULL,
        year_month          TEXT NOT NULL,
        branch_code         TEXT NOT NULL,
        cust_code           TEXT NOT NULL,
        org_name            TEXT,
        use_type            TEXT,
        use_name            TEXT,
        cust_name           TEXT,
        address             TEXT,
        route_code          TEXT,
        meter_no            TEXT,
        meter_size          TEXT,
        meter_brand         TEXT,
        meter_state         TEXT,
        average             DOUBLE PRECISION NOT NULL DEFAULT 0,
        present_meter_count DOUBLE PRECISION NOT NULL DEFAULT 0,
        present_water_usg   DOUBLE PRECISION NOT NULL DEFAULT 0,
        debt_ym             TEXT,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_meter_detail UNIQUE (fiscal_year, year_month, branch_code, cust_code)
    )",
    "CREATE INDEX IF NOT EXISTS idx_meter_details_month ON meter_details (fiscal_year, year_month, branch_code)",
    "CREATE INDEX IF NOT EXISTS idx_meter_details_cust  ON meter_details (cust_code)",

    // ─── Sync runs (append-only operation log) ──────────────────────
    "CREATE TABLE IF NOT EXISTS sync_runs (
        id               BIGSERIAL PRIMARY KEY,
        sync_type        TEXT NOT NULL,
        branch_code      TEXT NOT NULL,
        year_month       TEXT,
        fiscal_year      INTEGER,
        debt_ym          TEXT,
        status           TEXT NOT NULL DEFAULT 'in_progress',
        started_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        finished_at      TIMESTAMPTZ,
        duration_ms      BIGINT,
        records_upserted BIGINT,
        records_zeroed   BIGINT,
        error_message    TEXT,
        triggered_by     TEXT NOT NULL DEFAULT 'manual',
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_branch_type ON sync_runs (branch_code, sync_type)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_created     ON sync_runs (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_status      ON sync_runs (status)",
];
