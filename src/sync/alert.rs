// ─── Decrease alert ─────────────────────────────────────────────────
// Compares each cohort member's usage between two adjacent months and
// reports customers whose usage dropped by at least the threshold.
// The flagging itself is pure; only the row loads and the notifier touch
// the outside world.

use std::collections::HashMap;

use crate::calendar::YearMonth;
use crate::error::{db_context, SyncResult};
use crate::sync::SyncDeps;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsagePoint {
    pub cust_code: String,
    pub present_water_usg: f64,
}

#[derive(Debug, Clone)]
pub struct Flagged {
    pub cust_code: String,
    pub previous: f64,
    pub current: f64,
    pub delta_percent: f64,
}

/// Customers present in both months whose usage decreased by at least
/// `threshold_percent`. Customers without a positive baseline are skipped.
pub fn flag_decreases(
    current: &[UsagePoint],
    previous: &[UsagePoint],
    threshold_percent: f64,
) -> Vec<Flagged> {
    let baseline: HashMap<&str, f64> = previous
        .iter()
        .map(|p| (p.cust_code.as_str(), p.present_water_usg))
        .collect();

    let mut flagged = Vec::new();
    for point in current {
        let Some(&prev) = baseline.get(point.cust_code.as_str()) else {
            continue;
        };
        if prev <= 0.0 {
            continue;
        }
        let delta_percent = (point.present_water_usg - prev) / prev * 100.0;
        if delta_percent <= -threshold_percent {
            flagged.push(Flagged {
                cust_code: point.cust_code.clone(),
                previous: prev,
                current: point.present_water_usg,
                delta_percent,
            });
        }
    }
    flagged
}

/// Compute decreases for every branch between `ym` and the prior month and
/// send one summary message.
pub async fn compute_and_notify(
    deps: &SyncDeps,
    ym: YearMonth,
    threshold_percent: f64,
) -> SyncResult<()> {
    let prev = ym.prev();
    log::info!(
        "[ALERT] Computing decreases {} vs {} (threshold {}%)",
        ym,
        prev,
        threshold_percent
    );

    let mut branch_lines: Vec<String> = Vec::new();
    let mut branches_flagged = 0usize;
    let mut total_flagged = 0usize;

    for branch_code in &deps.branches {
        let current = load_usage(deps, ym, branch_code).await?;
        let previous = load_usage(deps, prev, branch_code).await?;
        let flagged = flag_decreases(&current, &previous, threshold_percent);

        if !flagged.is_empty() {
            branches_flagged += 1;
            total_flagged += flagged.len();
            branch_lines.push(format!("- {}: {} customers", branch_code, flagged.len()));
        }
    }

    let body = format!(
        "Water usage decrease alert {} vs {}\n\
         Threshold: {}%\n\
         Flagged customers: {}\n\
         Branches with flags: {}/{}\n{}",
        ym,
        prev,
        threshold_percent,
        total_flagged,
        branches_flagged,
        deps.branches.len(),
        branch_lines.join("\n")
    );

    deps.notifier
        .send_text(&deps.config.alert_notify_target, &body)
        .await?;

    log::info!(
        "[ALERT] Sent summary: {} flagged across {}/{} branches",
        total_flagged,
        branches_flagged,
        deps.branches.len()
    );
    Ok(())
}

async fn load_usage(
    deps: &SyncDeps,
    ym: YearMonth,
    branch_code: &str,
) -> SyncResult<Vec<UsagePoint>> {
    sqlx::query_as::<_, UsagePoint>(
        r#"SELECT cust_code, present_water_usg
           FROM meter_details
           WHERE fiscal_year = $1 AND year_month = $2 AND branch_code = $3"#,
    )
    .bind(ym.fiscal_year())
    .bind(ym.to_string())
    .bind(branch_code)
    .fetch_all(&deps.local)
    .await
    .map_err(|e| db_context("load usage for alert", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(code: &str, usage: f64) -> UsagePoint {
        UsagePoint {
            cust_code: code.to_string(),
            present_water_usg: usage,
        }
    }

    #[test]
    fn test_flags_decrease_past_threshold() {
        let previous = vec![point("X", 1000.0)];
        let current = vec![point("X", 850.0)];

        let flagged = flag_decreases(&current, &previous, 10.0);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].cust_code, "X");
        assert!((flagged[0].delta_percent + 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_skips_customers_without_baseline() {
        // Y has prev = 0: never flagged regardless of current.
        let previous = vec![point("Y", 0.0)];
        let current = vec![point("Y", 0.0), point("Z", 5.0)];

        assert!(flag_decreases(&current, &previous, 10.0).is_empty());
    }

    #[test]
    fn test_decrease_below_threshold_not_flagged() {
        let previous = vec![point("X", 1000.0)];
        let current = vec![point("X", 950.0)];

        assert!(flag_decreases(&current, &previous, 10.0).is_empty());
    }

    #[test]
    fn test_exact_threshold_is_flagged() {
        let previous = vec![point("X", 1000.0)];
        let current = vec![point("X", 900.0)];

        let flagged = flag_decreases(&current, &previous, 10.0);
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn test_increase_not_flagged() {
        let previous = vec![point("X", 1000.0)];
        let current = vec![point("X", 1500.0)];

        assert!(flag_decreases(&current, &previous, 10.0).is_empty());
    }
}
