use crate::config::{AppConfig, CrimeColumns, GeometryFields};
use crate::period::{self, Period};
use crate::projection::Reprojector;
use crate::types::{
    CrimeRecord, CrimeTable, MunicipalGeometry, MunicipalityKey, PopulationRecord, StateOutline,
};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use geo::{BooleanOps, MultiPolygon};
use rayon::prelude::*;
use shapefile::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything the dashboard reads from disk. Loaded once and shared read-only.
#[derive(Debug, Default)]
pub struct Dataset {
    pub crimes: CrimeTable,
    /// Distinct periods, most recent first.
    pub periods: Vec<Period>,
    pub population: HashMap<MunicipalityKey, PopulationRecord>,
    pub municipalities: Vec<MunicipalGeometry>,
    pub states: Vec<StateOutline>,
}

impl Dataset {
    pub fn new(
        crimes: CrimeTable,
        population: HashMap<MunicipalityKey, PopulationRecord>,
        municipalities: Vec<MunicipalGeometry>,
    ) -> Self {
        let periods = period::distinct_periods(&crimes);
        let states = dissolve_states(&municipalities);
        Self { crimes, periods, population, municipalities, states }
    }
}

pub fn load_data(config: &AppConfig) -> Result<Dataset> {
    let crimes_path = config.crimes_path();
    let file = File::open(&crimes_path)
        .with_context(|| format!("Failed to open crime CSV: {:?}", crimes_path))?;
    let crimes = read_crimes(file, &config.input.crime_columns)
        .with_context(|| format!("Failed to read crime CSV: {:?}", crimes_path))?;
    info!(
        rows = crimes.records.len(),
        crime_types = crimes.crime_types.len(),
        "loaded crime table"
    );

    let population_path = config.population_path();
    let file = File::open(&population_path)
        .with_context(|| format!("Failed to open population CSV: {:?}", population_path))?;
    let population = read_population(file)
        .with_context(|| format!("Failed to read population CSV: {:?}", population_path))?;
    info!(municipalities = population.len(), "loaded population census");

    let municipalities = load_geometry(config)?;
    info!(features = municipalities.len(), "loaded municipal geometry");

    let dataset = Dataset::new(crimes, population, municipalities);
    info!(
        states = dataset.states.len(),
        periods = dataset.periods.len(),
        latest = ?period::latest_period(&dataset.periods).map(|p| p.to_string()),
        "dataset ready"
    );
    Ok(dataset)
}

fn parse_code(raw: &str) -> Result<u16> {
    let raw = raw.trim();
    raw.parse::<u16>()
        .ok()
        .or_else(|| parse_integral(raw).and_then(|v| u16::try_from(v).ok()))
        .ok_or_else(|| anyhow!("Invalid INEGI code: {:?}", raw))
}

/// Accepts `12` as well as `12.0`.
fn parse_integral(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let v: f64 = raw.parse().ok()?;
    (v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
}

fn parse_count(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    parse_integral(raw).ok_or_else(|| anyhow!("Invalid count: {:?}", raw))
}

pub fn read_crimes<R: Read>(reader: R, columns: &CrimeColumns) -> Result<CrimeTable> {
    let mut rdr = ReaderBuilder::new().from_reader(reader);
    let headers = rdr.headers()?.clone();

    let position = |name: &str| {
        headers.iter().position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in crime CSV", name))
    };
    let state_idx = position(&columns.state)?;
    let mun_idx = position(&columns.municipality)?;
    let period_idx = position(&columns.period)?;

    // Every remaining column is a crime type, kept in header order.
    let crime_cols: Vec<(usize, String)> = headers.iter().enumerate()
        .filter(|(i, _)| ![state_idx, mun_idx, period_idx].contains(i))
        .map(|(i, h)| (i, h.trim().to_string()))
        .collect();

    let mut records = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let key = MunicipalityKey::new(parse_code(field(state_idx))?, parse_code(field(mun_idx))?);
        let period: Period = field(period_idx).parse()
            .with_context(|| format!("Bad period on data row {}", line + 1))?;
        let counts = crime_cols.iter()
            .map(|(idx, name)| parse_count(field(*idx))
                .with_context(|| format!("Column '{}' on data row {}", name, line + 1)))
            .collect::<Result<Vec<u64>>>()?;

        records.push(CrimeRecord { key, period, counts });
    }

    Ok(CrimeTable {
        crime_types: crime_cols.into_iter().map(|(_, name)| name).collect(),
        records,
    })
}

/// Reads the census table. Columns are positional:
/// `cve_ent, ent, cve_mun, mun, pobtot`, whatever the header says.
pub fn read_population<R: Read>(reader: R) -> Result<HashMap<MunicipalityKey, PopulationRecord>> {
    let mut rdr = ReaderBuilder::new().from_reader(reader);
    let width = rdr.headers()?.len();
    if width != 5 {
        return Err(anyhow!("Population CSV must have 5 columns, found {}", width));
    }

    let mut population = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let key = MunicipalityKey::new(parse_code(field(0))?, parse_code(field(2))?);
        let total_population = match field(4) {
            "" => None,
            raw => Some(parse_integral(raw).ok_or_else(|| anyhow!("Invalid population: {:?}", raw))?),
        };

        if population.contains_key(&key) {
            warn!(%key, "duplicate municipality in population CSV, keeping first row");
            continue;
        }
        population.insert(key, PopulationRecord {
            key,
            state_name: field(1).to_string(),
            municipality_name: field(3).to_string(),
            total_population,
        });
    }

    Ok(population)
}

/// Loads municipal polygons and reprojects them into the map CRS.
pub fn load_geometry(config: &AppConfig) -> Result<Vec<MunicipalGeometry>> {
    let path = resolve_geometry_file(&config.geometry_path())?;
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let fields = &config.input.geometry_fields;
    let raw = match extension.as_str() {
        "shp" => load_shapefile(&path, fields)?,
        "json" | "geojson" => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
            read_geojson(BufReader::new(file), fields)?
        }
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    let reprojector = Reprojector::new(config.input.source_crs);
    info!(crs = ?config.input.source_crs, features = raw.len(), "reprojecting geometry");
    Ok(raw.into_par_iter()
        .map(|mut g| {
            g.polygon = reprojector.project_polygon(&g.polygon);
            g
        })
        .collect())
}

/// A directory stands for the single shapefile inside it.
fn resolve_geometry_file(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    let mut shapefiles: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("Failed to list geometry directory: {:?}", path))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("shp")))
        .collect();
    shapefiles.sort();
    shapefiles.into_iter().next()
        .ok_or_else(|| anyhow!("No .shp file in geometry directory: {:?}", path))
}

fn dbase_text(value: &shapefile::dbase::FieldValue) -> Option<String> {
    use shapefile::dbase::FieldValue;
    match value {
        FieldValue::Character(s) => s.clone(),
        FieldValue::Numeric(n) => n.map(|v| v.to_string()),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Double(d) => Some(d.to_string()),
        FieldValue::Float(f) => f.map(|v| v.to_string()),
        _ => None,
    }
}

fn load_shapefile(path: &Path, fields: &GeometryFields) -> Result<Vec<MunicipalGeometry>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut out = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let attr = |name: &str| -> Result<Option<String>> {
            let value = record.get(name)
                .ok_or_else(|| anyhow!("Field '{}' not found in Shapefile", name))?;
            Ok(dbase_text(value))
        };
        let (Some(id), Some(state), Some(mun)) =
            (attr(&fields.id)?, attr(&fields.state)?, attr(&fields.municipality)?)
        else {
            continue; // null attributes
        };

        let polygon: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue, // Skip non-polygon shapes
        };

        out.push(MunicipalGeometry {
            key: MunicipalityKey::new(parse_code(&state)?, parse_code(&mun)?),
            id: id.trim().to_string(),
            polygon,
        });
    }

    Ok(out)
}

fn json_text(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a GeoJSON FeatureCollection. Coordinates are left in the source CRS.
pub fn read_geojson<R: Read>(reader: R, fields: &GeometryFields) -> Result<Vec<MunicipalGeometry>> {
    use geojson::GeoJson;

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut out = Vec::new();

    for feature in collection.features {
        let props = feature.properties.as_ref();
        let attr = |name: &str| json_text(props.and_then(|p| p.get(name)));
        let (Some(id), Some(state), Some(mun)) =
            (attr(&fields.id), attr(&fields.state), attr(&fields.municipality))
        else {
            continue;
        };

        let polygon = match feature.geometry {
            Some(geom) => {
                let geom: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                match geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        out.push(MunicipalGeometry {
            key: MunicipalityKey::new(parse_code(&state)?, parse_code(&mun)?),
            id,
            polygon,
        });
    }

    Ok(out)
}

/// Unions municipal polygons per state for the national boundary overlay.
pub fn dissolve_states(municipalities: &[MunicipalGeometry]) -> Vec<StateOutline> {
    let mut by_state: BTreeMap<u16, Vec<&MultiPolygon<f64>>> = BTreeMap::new();
    for m in municipalities {
        by_state.entry(m.key.state_code).or_default().push(&m.polygon);
    }

    by_state.into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(state_code, polygons)| {
            let polygon = polygons.into_iter()
                .fold(MultiPolygon::new(Vec::new()), |acc, p| acc.union(p));
            StateOutline { state_code, polygon }
        })
        .collect()
}
