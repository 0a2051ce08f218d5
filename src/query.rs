//! One dashboard interaction: selector values in, filtered rates out.

use serde::Deserialize;

use crate::aggregate::{self, PopulationFloor};
use crate::data::Dataset;
use crate::error::DashboardError;
use crate::period::{self, Period};
use crate::types::AggregatedRate;

/// Raw selector values. Anything left out falls back to the dashboard defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Selection {
    pub crime: Option<String>,
    pub anchor: Option<String>,
    pub floor: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub crime: String,
    pub anchor: Period,
    /// Anchor first, then the 11 older periods.
    pub window: Vec<Period>,
    pub floor: PopulationFloor,
}

/// First crime column, most recent selectable anchor, floor enforced.
pub fn defaults(dataset: &Dataset) -> (Option<&str>, Option<Period>) {
    (
        dataset.crimes.crime_types.first().map(String::as_str),
        period::selectable_anchors(&dataset.periods).first().copied(),
    )
}

pub fn resolve(
    dataset: &Dataset,
    selection: &Selection,
    floor_threshold: u64,
) -> Result<Resolved, DashboardError> {
    let (default_crime, default_anchor) = defaults(dataset);

    let crime = match &selection.crime {
        Some(crime) if dataset.crimes.crime_index(crime).is_some() => crime.clone(),
        Some(crime) => return Err(DashboardError::UnknownCrimeType(crime.clone())),
        None => default_crime
            .ok_or_else(|| DashboardError::UnknownCrimeType(String::new()))?
            .to_string(),
    };

    let anchor = match &selection.anchor {
        Some(raw) => raw.parse::<Period>()?,
        None => default_anchor
            .ok_or_else(|| DashboardError::UnknownPeriod("no period has a full window".into()))?,
    };
    let window = period::window(&dataset.periods, anchor)?;

    Ok(Resolved {
        crime,
        anchor,
        window,
        floor: PopulationFloor::from_flag(selection.floor.unwrap_or(true), floor_threshold),
    })
}

/// All municipalities in the window, before the population floor.
pub fn aggregate_all(dataset: &Dataset, resolved: &Resolved) -> Result<Vec<AggregatedRate>, DashboardError> {
    aggregate::aggregate(&dataset.crimes, &resolved.crime, &resolved.window, &dataset.population)
}

/// The rows the map shows.
pub fn run(dataset: &Dataset, resolved: &Resolved) -> Result<Vec<AggregatedRate>, DashboardError> {
    aggregate::run(
        &dataset.crimes,
        &resolved.crime,
        &resolved.window,
        &dataset.population,
        resolved.floor,
    )
}
