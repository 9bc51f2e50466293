use std::path::Path;

use serde::Deserialize;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Deserialize)]
struct BranchRecord {
    code: String,
    #[allow(dead_code)]
    name: Option<String>,
}

/// Resolve the branch list: explicit configuration wins, the CSV file is
/// the fallback. An empty final list cannot drive any job.
pub fn resolve(config: &SyncConfig) -> SyncResult<Vec<String>> {
    if !config.branches.is_empty() {
        return Ok(config.branches.clone());
    }

    let branches = from_csv(&config.branches_csv_path)?;
    if branches.is_empty() {
        return Err(SyncError::Config(format!(
            "branch list is empty: set SYNC_BRANCHES or populate {}",
            config.branches_csv_path.display()
        )));
    }
    log::info!(
        "[BRANCHES] Loaded {} branches from {}",
        branches.len(),
        config.branches_csv_path.display()
    );
    Ok(branches)
}

fn from_csv(path: &Path) -> SyncResult<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;

    let mut codes = Vec::new();
    for record in reader.deserialize::<BranchRecord>() {
        let record =
            record.map_err(|e| SyncError::Config(format!("bad row in {}: {}", path.display(), e)))?;
        let code = record.code.trim().to_string();
        if !code.is_empty() {
            codes.push(code);
        }
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_from_csv_reads_codes() {
        let path = std::env::temp_dir().join("watersync_branches_test.csv");
        fs::write(&path, "code,name\nBA01,Branch One\nBA02,Branch Two\n").unwrap();

        let codes = from_csv(&path).unwrap();
        assert_eq!(codes, vec!["BA01", "BA02"]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = from_csv(Path::new("/nonexistent/branches.csv")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
