//! Rolling-window crime rates per 100,000 inhabitants.

use crate::error::DashboardError;
use crate::period::Period;
use crate::types::{AggregatedRate, CrimeTable, MunicipalityKey, PopulationRecord};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const PER_INHABITANTS: f64 = 100_000.0;
pub const DEFAULT_POPULATION_FLOOR: u64 = 100_000;

/// Which municipalities survive into the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationFloor {
    /// Keep only municipalities with more than this many inhabitants.
    Enforced(u64),
    /// Keep every municipality with a known, positive population.
    Off,
}

impl PopulationFloor {
    pub fn from_flag(enforced: bool, threshold: u64) -> Self {
        if enforced { Self::Enforced(threshold) } else { Self::Off }
    }

    /// Whether a municipality with this population is kept on the map.
    pub fn admits(self, population: Option<u64>) -> bool {
        match (self, population) {
            (_, None) => false,
            (Self::Enforced(threshold), Some(p)) => p > threshold,
            (Self::Off, Some(p)) => p > 0,
        }
    }
}

pub fn rate_per_100k(count: u64, population: Option<u64>) -> Option<f64> {
    match population {
        Some(p) if p > 0 => Some(count as f64 / p as f64 * PER_INHABITANTS),
        _ => None,
    }
}

/// Sums the selected crime over the window per municipality and joins population.
///
/// Output is sorted by key with one row per municipality present in the
/// window. Municipalities missing from the census keep `None` population
/// and rate.
pub fn aggregate(
    table: &CrimeTable,
    crime: &str,
    window: &[Period],
    population: &HashMap<MunicipalityKey, PopulationRecord>,
) -> Result<Vec<AggregatedRate>, DashboardError> {
    let column = table
        .crime_index(crime)
        .ok_or_else(|| DashboardError::UnknownCrimeType(crime.to_string()))?;
    let window: HashSet<Period> = window.iter().copied().collect();

    let mut sums: BTreeMap<MunicipalityKey, u64> = BTreeMap::new();
    for record in table.records.iter().filter(|r| window.contains(&r.period)) {
        let count = record.counts.get(column).copied().unwrap_or(0);
        *sums.entry(record.key).or_default() += count;
    }

    Ok(sums
        .into_iter()
        .map(|(key, summed_count)| {
            let total_population = population.get(&key).and_then(|p| p.total_population);
            AggregatedRate {
                key,
                summed_count,
                total_population,
                rate_per_100k: rate_per_100k(summed_count, total_population),
            }
        })
        .collect())
}

pub fn apply_floor(rates: Vec<AggregatedRate>, floor: PopulationFloor) -> Vec<AggregatedRate> {
    rates
        .into_iter()
        .filter(|r| floor.admits(r.total_population))
        .collect()
}

pub fn run(
    table: &CrimeTable,
    crime: &str,
    window: &[Period],
    population: &HashMap<MunicipalityKey, PopulationRecord>,
    floor: PopulationFloor,
) -> Result<Vec<AggregatedRate>, DashboardError> {
    let rates = aggregate(table, crime, window, population)?;
    Ok(apply_floor(rates, floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{self, Period};
    use crate::types::CrimeRecord;

    fn census(entries: &[(MunicipalityKey, Option<u64>)]) -> HashMap<MunicipalityKey, PopulationRecord> {
        entries
            .iter()
            .map(|(key, total)| {
                (*key, PopulationRecord {
                    key: *key,
                    state_name: String::new(),
                    municipality_name: key.to_string(),
                    total_population: *total,
                })
            })
            .collect()
    }

    /// Thirteen months, Jan 2023 .. Jan 2024, one record per municipality per month.
    fn year_of_ones(keys: &[MunicipalityKey]) -> CrimeTable {
        let mut records = Vec::new();
        for key in keys {
            for m in 0..13u32 {
                let (year, month) = if m < 12 { (2023, m + 1) } else { (2024, 1) };
                records.push(CrimeRecord {
                    key: *key,
                    period: Period::from_ym(year, month).unwrap(),
                    counts: vec![1, u64::from(m)],
                });
            }
        }
        CrimeTable {
            crime_types: vec!["Homicidio".into(), "Robo".into()],
            records,
        }
    }

    fn december_window(table: &CrimeTable) -> Vec<Period> {
        let periods = period::distinct_periods(table);
        period::window(&periods, Period::from_ym(2023, 12).unwrap()).unwrap()
    }

    #[test]
    fn twelve_ones_over_two_hundred_thousand() {
        let key = MunicipalityKey::new(19, 39);
        let table = year_of_ones(&[key]);
        let population = census(&[(key, Some(200_000))]);

        let rates = run(&table, "Homicidio", &december_window(&table), &population,
            PopulationFloor::Enforced(DEFAULT_POPULATION_FLOOR)).unwrap();

        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].summed_count, 12);
        assert_eq!(rates[0].total_population, Some(200_000));
        assert!((rates[0].rate_per_100k.unwrap() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn window_excludes_periods_outside_it() {
        let key = MunicipalityKey::new(1, 1);
        let table = year_of_ones(&[key]);
        let population = census(&[(key, Some(1_000))]);

        // Robo counts are the month offsets 0..=11 inside the window; January 2024 (12) is out.
        let rates = aggregate(&table, "Robo", &december_window(&table), &population).unwrap();
        assert_eq!(rates[0].summed_count, (0..12).sum::<u64>());
    }

    #[test]
    fn mass_is_conserved_and_keys_are_unique() {
        let keys = [
            MunicipalityKey::new(9, 2),
            MunicipalityKey::new(9, 3),
            MunicipalityKey::new(14, 39),
        ];
        let table = year_of_ones(&keys);
        let window = december_window(&table);
        let population = census(&[(keys[0], Some(500_000)), (keys[1], Some(0))]);

        let rates = aggregate(&table, "Robo", &window, &population).unwrap();

        let in_window: u64 = table.records.iter()
            .filter(|r| window.contains(&r.period))
            .map(|r| r.counts[1])
            .sum();
        assert_eq!(rates.iter().map(|r| r.summed_count).sum::<u64>(), in_window);

        let distinct: HashSet<_> = table.records.iter()
            .filter(|r| window.contains(&r.period))
            .map(|r| r.key)
            .collect();
        assert!(rates.len() <= distinct.len());
        let unique: HashSet<_> = rates.iter().map(|r| r.key).collect();
        assert_eq!(unique.len(), rates.len());
    }

    #[test]
    fn zero_and_unknown_population_have_no_rate() {
        let keys = [MunicipalityKey::new(9, 2), MunicipalityKey::new(9, 3)];
        let table = year_of_ones(&keys);
        let population = census(&[(keys[0], Some(0))]);

        let rates = aggregate(&table, "Homicidio", &december_window(&table), &population).unwrap();
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.rate_per_100k.is_none()));
        assert_eq!(rates[1].total_population, None);

        assert!(apply_floor(rates.clone(), PopulationFloor::Off).is_empty());
        assert!(apply_floor(rates, PopulationFloor::Enforced(100_000)).is_empty());
    }

    #[test]
    fn floor_drops_small_municipalities() {
        let keys = [
            MunicipalityKey::new(1, 1),
            MunicipalityKey::new(1, 2),
            MunicipalityKey::new(1, 3),
        ];
        let table = year_of_ones(&keys);
        let population = census(&[
            (keys[0], Some(100_000)),
            (keys[1], Some(100_001)),
            (keys[2], Some(50)),
        ]);
        let window = december_window(&table);

        let floored = run(&table, "Homicidio", &window, &population,
            PopulationFloor::from_flag(true, DEFAULT_POPULATION_FLOOR)).unwrap();
        assert_eq!(floored.len(), 1);
        assert_eq!(floored[0].key, keys[1]);
        assert!(floored.iter().all(|r| r.total_population.unwrap() > 100_000));

        let open = run(&table, "Homicidio", &window, &population,
            PopulationFloor::from_flag(false, DEFAULT_POPULATION_FLOOR)).unwrap();
        assert_eq!(open.len(), 3);
    }

    #[test]
    fn floor_threshold_is_exclusive() {
        let floor = PopulationFloor::Enforced(100_000);
        assert!(!floor.admits(Some(100_000)));
        assert!(floor.admits(Some(100_001)));
        assert!(!floor.admits(None));
        assert!(PopulationFloor::Off.admits(Some(1)));
        assert!(!PopulationFloor::Off.admits(Some(0)));
    }

    #[test]
    fn unknown_crime_type() {
        let table = year_of_ones(&[MunicipalityKey::new(1, 1)]);
        let err = aggregate(&table, "Piratería", &[], &HashMap::new()).unwrap_err();
        assert_eq!(err, DashboardError::UnknownCrimeType("Piratería".into()));
    }
}
