//! Monthly period labels and the rolling 12-period ("año móvil") window.

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::DashboardError;
use crate::types::CrimeTable;

pub const WINDOW_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period(NaiveDate);

impl Period {
    pub fn from_ym(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Period)
    }
}

impl FromStr for Period {
    type Err = DashboardError;

    /// Accepts `YYYY-MM-DD` (the day is ignored) or `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
            .map_err(|_| DashboardError::InvalidPeriodLabel(s.to_string()))?;
        date.with_day0(0)
            .map(Period)
            .ok_or_else(|| DashboardError::InvalidPeriodLabel(s.to_string()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Distinct periods present in the table, most recent first.
pub fn distinct_periods(table: &CrimeTable) -> Vec<Period> {
    let mut periods: Vec<Period> = table.records.iter().map(|r| r.period).collect();
    periods.sort_unstable_by(|a, b| b.cmp(a));
    periods.dedup();
    periods
}

pub fn latest_period(periods: &[Period]) -> Option<Period> {
    periods.first().copied()
}

/// Anchors offered to the user: every label with at least 12 older periods.
pub fn selectable_anchors(periods: &[Period]) -> &[Period] {
    &periods[..periods.len().saturating_sub(WINDOW_LEN)]
}

/// The anchor followed by its 11 predecessors, descending.
pub fn window(periods: &[Period], anchor: Period) -> Result<Vec<Period>, DashboardError> {
    let pos = periods
        .iter()
        .position(|p| *p == anchor)
        .ok_or_else(|| DashboardError::UnknownPeriod(anchor.to_string()))?;

    let available = periods.len() - pos - 1;
    if available < WINDOW_LEN - 1 {
        return Err(DashboardError::IncompleteWindow {
            anchor: anchor.to_string(),
            available,
        });
    }

    Ok(periods[pos..pos + WINDOW_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrimeRecord, MunicipalityKey};

    fn months(from: (i32, u32), count: usize) -> Vec<Period> {
        let (mut year, mut month) = from;
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(Period::from_ym(year, month).unwrap());
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        out.reverse();
        out
    }

    #[test]
    fn parses_both_label_formats() {
        let a: Period = "2023-12-01".parse().unwrap();
        let b: Period = "2023-12".parse().unwrap();
        let c: Period = "2023-12-15".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), "2023-12");
        assert!(matches!(
            "diciembre".parse::<Period>(),
            Err(DashboardError::InvalidPeriodLabel(_))
        ));
    }

    #[test]
    fn distinct_periods_sorted_descending() {
        let key = MunicipalityKey::new(9, 2);
        let table = CrimeTable {
            crime_types: vec!["Homicidio".into()],
            records: ["2023-02", "2023-01", "2023-03", "2023-01"]
                .iter()
                .map(|p| CrimeRecord { key, period: p.parse().unwrap(), counts: vec![1] })
                .collect(),
        };
        let periods = distinct_periods(&table);
        let labels: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, ["2023-03", "2023-02", "2023-01"]);
        assert_eq!(latest_period(&periods).unwrap().to_string(), "2023-03");
    }

    #[test]
    fn window_ending_at_december() {
        // Jan 2023 .. Jan 2024
        let periods = months((2023, 1), 13);
        let anchor = Period::from_ym(2023, 12).unwrap();
        let window = window(&periods, anchor).unwrap();

        assert_eq!(window.len(), WINDOW_LEN);
        assert_eq!(window.first().unwrap().to_string(), "2023-12");
        assert_eq!(window.last().unwrap().to_string(), "2023-01");
    }

    #[test]
    fn every_selectable_anchor_has_contiguous_full_window() {
        let periods = months((2019, 1), 60);
        let anchors = selectable_anchors(&periods);
        assert_eq!(anchors.len(), 48);

        for anchor in anchors {
            let w = window(&periods, *anchor).unwrap();
            assert_eq!(w.len(), 12);
            assert!(w.iter().all(|p| p <= anchor));

            let start = periods.iter().position(|p| p == anchor).unwrap();
            assert_eq!(&periods[start..start + 12], w.as_slice());

            let mut unique = w.clone();
            unique.dedup();
            assert_eq!(unique.len(), 12);
        }
    }

    #[test]
    fn oldest_twelve_are_not_selectable() {
        let periods = months((2023, 1), 13);
        let anchors = selectable_anchors(&periods);
        assert_eq!(anchors, &periods[..1]);

        assert!(selectable_anchors(&months((2023, 1), 12)).is_empty());
        assert!(selectable_anchors(&[]).is_empty());
    }

    #[test]
    fn short_history_is_rejected() {
        let periods = months((2023, 1), 13);
        let anchor = Period::from_ym(2023, 11).unwrap();
        assert_eq!(
            window(&periods, anchor),
            Err(DashboardError::IncompleteWindow { anchor: "2023-11".into(), available: 10 })
        );

        let missing = Period::from_ym(2030, 1).unwrap();
        assert!(matches!(window(&periods, missing), Err(DashboardError::UnknownPeriod(_))));
    }
}
