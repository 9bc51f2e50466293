// ─── Calendar helpers ───────────────────────────────────────────────
// Two calendar domains meet here: the local store keeps Gregorian YYYYMM,
// the upstream billing store keeps Buddhist-era YYYYMM (year + 543).
// Everything public takes and returns Gregorian; `to_upstream` is the one
// place the Buddhist form is produced.

use std::fmt;

use chrono::Datelike;

use crate::error::{SyncError, SyncResult};

/// Buddhist-era years start at 543; any four-digit year at or above this
/// threshold is assumed to be Buddhist and is normalized on parse.
const BUDDHIST_YEAR_MIN: i32 = 2400;
const BUDDHIST_OFFSET: i32 = 543;

/// A validated Gregorian year-month. Never carried as a raw integer through
/// job signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> SyncResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(SyncError::InvalidInput(format!(
                "month must be 1-12, got {month}"
            )));
        }
        if !(1000..=9999).contains(&year) {
            return Err(SyncError::InvalidInput(format!(
                "year must be four digits, got {year}"
            )));
        }
        Ok(Self { year, month })
    }

    /// Parse a `YYYYMM` string in either calendar. A year >= 2400 is taken
    /// as Buddhist and reduced by 543; valid Gregorian input is unchanged.
    pub fn parse(s: &str) -> SyncResult<Self> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SyncError::InvalidInput(format!(
                "expected 6-digit YYYYMM, got {s:?}"
            )));
        }
        let mut year: i32 = s[0..4]
            .parse()
            .map_err(|_| SyncError::InvalidInput(format!("bad year in {s:?}")))?;
        let month: u32 = s[4..6]
            .parse()
            .map_err(|_| SyncError::InvalidInput(format!("bad month in {s:?}")))?;
        if year >= BUDDHIST_YEAR_MIN {
            year -= BUDDHIST_OFFSET;
        }
        Self::new(year, month)
    }

    /// The month containing the given date, in that date's calendar reading.
    pub fn from_date<D: Datelike>(d: &D) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Thai fiscal year: October starts the fiscal year labeled by the year
    /// in which it ends.
    pub fn fiscal_year(&self) -> i32 {
        if self.month >= 10 {
            self.year + 1
        } else {
            self.year
        }
    }

    /// Buddhist-era `YYYYMM` used for every upstream DEBT_YM bind.
    pub fn to_upstream(&self) -> String {
        format!("{:04}{:02}", self.year + BUDDHIST_OFFSET, self.month)
    }

    /// This month and the one before it, rolling the year on January.
    pub fn prev(&self) -> YearMonth {
        if self.month == 1 {
            YearMonth {
                year: self.year - 1,
                month: 12,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// `self, self-1, …, self-(k-1)`, newest first.
    pub fn prior_months(&self, k: u32) -> Vec<YearMonth> {
        let mut out = Vec::with_capacity(k as usize);
        let mut cur = *self;
        for _ in 0..k {
            out.push(cur);
            cur = cur.prev();
        }
        out
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gregorian_identity() {
        let ym = YearMonth::parse("202410").unwrap();
        assert_eq!(ym.to_string(), "202410");
        assert_eq!(ym.year(), 2024);
        assert_eq!(ym.month(), 10);
    }

    #[test]
    fn test_parse_buddhist_normalizes() {
        let ym = YearMonth::parse("256710").unwrap();
        assert_eq!(ym.to_string(), "202410");
    }

    #[test]
    fn test_upstream_round_trip() {
        // parse(b).to_upstream() == b for valid Buddhist input
        for b in ["256710", "256801", "254312"] {
            assert_eq!(YearMonth::parse(b).unwrap().to_upstream(), b);
        }
        assert_eq!(YearMonth::parse("202410").unwrap().to_upstream(), "256710");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(YearMonth::parse("202413").is_err());
        assert!(YearMonth::parse("202400").is_err());
        assert!(YearMonth::parse("20241").is_err());
        assert!(YearMonth::parse("2024-1").is_err());
        assert!(YearMonth::parse("").is_err());
    }

    #[test]
    fn test_fiscal_year_boundary() {
        assert_eq!(YearMonth::parse("202409").unwrap().fiscal_year(), 2024);
        assert_eq!(YearMonth::parse("202410").unwrap().fiscal_year(), 2025);
        assert_eq!(YearMonth::parse("202501").unwrap().fiscal_year(), 2025);
    }

    #[test]
    fn test_prior_months_rolls_year() {
        let months: Vec<String> = YearMonth::parse("202501")
            .unwrap()
            .prior_months(3)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(months, vec!["202501", "202412", "202411"]);
    }
}
