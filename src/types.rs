use geo::MultiPolygon;
use serde::Serialize;
use std::fmt;

use crate::period::Period;

/// INEGI state/municipality code pair. Every join in the pipeline is on this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MunicipalityKey {
    pub state_code: u16,
    pub municipality_code: u16,
}

impl MunicipalityKey {
    pub fn new(state_code: u16, municipality_code: u16) -> Self {
        Self { state_code, municipality_code }
    }
}

impl fmt::Display for MunicipalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:03}", self.state_code, self.municipality_code)
    }
}

/// One municipality in one period. `counts` lines up with `CrimeTable::crime_types`.
#[derive(Debug, Clone)]
pub struct CrimeRecord {
    pub key: MunicipalityKey,
    pub period: Period,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CrimeTable {
    pub crime_types: Vec<String>,
    pub records: Vec<CrimeRecord>,
}

impl CrimeTable {
    pub fn crime_index(&self, crime: &str) -> Option<usize> {
        self.crime_types.iter().position(|c| c == crime)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulationRecord {
    pub key: MunicipalityKey,
    pub state_name: String,
    pub municipality_name: String,
    pub total_population: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MunicipalGeometry {
    pub key: MunicipalityKey,
    pub id: String,
    pub polygon: MultiPolygon<f64>,
}

/// Municipal polygons dissolved into one outline per state.
#[derive(Debug, Clone)]
pub struct StateOutline {
    pub state_code: u16,
    pub polygon: MultiPolygon<f64>,
}

/// Per-municipality result of one query. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRate {
    pub key: MunicipalityKey,
    pub summed_count: u64,
    pub total_population: Option<u64>,
    pub rate_per_100k: Option<f64>,
}
