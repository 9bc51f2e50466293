// ─── SQL template loader ────────────────────────────────────────────
// The two upstream queries live on disk. The details template carries a
// literal token that is replaced per batch with an IN-list of positional
// binds; the token is a contract of the file, verified once at load.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::{SyncError, SyncResult};

pub const CUSTCODE_FILTER_TOKEN: &str = "/*__CUSTCODE_FILTER__*/";

/// Binds consumed by the details template before the IN-list starts:
/// $1 = branch, $2 = debt YM.
const DETAILS_BASE_BINDS: usize = 2;

const MINIMAL_FILE: &str = "top200_minimal.sql";
const DETAILS_FILE: &str = "top200_details.sql";

#[derive(Debug, Clone)]
pub struct SqlTemplates {
    top_minimal: String,
    details: DetailsTemplate,
}

impl SqlTemplates {
    /// Load and validate both templates. Any problem here is fatal at
    /// startup, never a runtime surprise.
    pub fn load(dir: &Path) -> SyncResult<Self> {
        let top_minimal = read(dir, MINIMAL_FILE)?;
        let details = DetailsTemplate::new(read(dir, DETAILS_FILE)?)?;
        log::info!("[TEMPLATES] Loaded SQL templates from {}", dir.display());
        Ok(Self {
            top_minimal,
            details,
        })
    }

    pub fn top_minimal(&self) -> &str {
        &self.top_minimal
    }

    pub fn details(&self) -> &DetailsTemplate {
        &self.details
    }
}

fn read(dir: &Path, file: &str) -> SyncResult<String> {
    let path = dir.join(file);
    fs::read_to_string(&path)
        .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))
}

/// The monthly details query with its row limit stripped and the customer
/// filter token located.
#[derive(Debug, Clone)]
pub struct DetailsTemplate {
    body: String,
}

impl DetailsTemplate {
    pub fn new(raw: String) -> SyncResult<Self> {
        // The monthly pull must return all cohort matches, never a
        // truncated window.
        let fetch_first = Regex::new(r"(?i)FETCH\s+FIRST\s+\d+\s+ROWS?\s+ONLY")
            .expect("static regex");
        let body = fetch_first.replace_all(&raw, "").into_owned();

        if !body.contains(CUSTCODE_FILTER_TOKEN) {
            return Err(SyncError::Config(format!(
                "details template is missing the {CUSTCODE_FILTER_TOKEN} token"
            )));
        }
        Ok(Self { body })
    }

    /// Render the query for one batch: the token becomes
    /// `AND t.cust_code IN ($3, $4, …)` with stable, ordered positional
    /// binds following the two base binds.
    pub fn with_cust_filter(&self, batch_len: usize) -> String {
        if batch_len == 0 {
            log::warn!("[TEMPLATES] Requested details query for an empty batch");
            return self.body.replace(CUSTCODE_FILTER_TOKEN, "");
        }
        let placeholders: Vec<String> = (0..batch_len)
            .map(|i| format!("${}", DETAILS_BASE_BINDS + 1 + i))
            .collect();
        let clause = format!("AND t.cust_code IN ({})", placeholders.join(", "));
        self.body.replace(CUSTCODE_FILTER_TOKEN, &clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "SELECT t.cust_code FROM trn_debt_tr t \
        WHERE t.org_owner_id = $1 AND t.debt_ym = $2 \
        /*__CUSTCODE_FILTER__*/ \
        ORDER BY t.cust_code \
        FETCH FIRST 200 ROWS ONLY";

    #[test]
    fn test_strips_fetch_first() {
        let tpl = DetailsTemplate::new(RAW.to_string()).unwrap();
        let sql = tpl.with_cust_filter(1);
        assert!(!sql.to_lowercase().contains("fetch first"));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = DetailsTemplate::new("SELECT 1".to_string()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_filter_binds_are_ordered_and_stable() {
        let tpl = DetailsTemplate::new(RAW.to_string()).unwrap();
        let sql = tpl.with_cust_filter(3);
        assert!(sql.contains("AND t.cust_code IN ($3, $4, $5)"));
        // Re-rendering yields the identical query.
        assert_eq!(sql, tpl.with_cust_filter(3));
    }

    #[test]
    fn test_empty_batch_drops_filter() {
        let tpl = DetailsTemplate::new(RAW.to_string()).unwrap();
        let sql = tpl.with_cust_filter(0);
        assert!(!sql.contains(CUSTCODE_FILTER_TOKEN));
        assert!(!sql.contains("IN ("));
    }
}
