use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

use crate::aggregate::DEFAULT_POPULATION_FLOOR;
use crate::projection::SourceCrs;

/// Environment variable that overrides `data_root` from the config file.
pub const DATA_ROOT_ENV: &str = "DELITOS_DATA_ROOT";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Directory the input paths are resolved against.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    pub crimes_csv: PathBuf,
    pub population_csv: PathBuf,
    /// Shapefile, directory holding one, or GeoJSON.
    pub geometry: PathBuf,
    pub source_crs: SourceCrs,
    pub crime_columns: CrimeColumns,
    pub geometry_fields: GeometryFields,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrimeColumns {
    pub state: String,
    pub municipality: String,
    pub period: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeometryFields {
    pub id: String,
    pub state: String,
    pub municipality: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub population_floor: u64,
    /// Fill for municipalities without a rate. Unfilled when absent.
    pub no_data_color: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("Data")
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            crimes_csv: PathBuf::from("delitos_mensuales.csv"),
            population_csv: PathBuf::from("Municipios.csv"),
            geometry: PathBuf::from("mapa_mexico"),
            source_crs: SourceCrs::default(),
            crime_columns: CrimeColumns::default(),
            geometry_fields: GeometryFields::default(),
        }
    }
}

impl Default for CrimeColumns {
    fn default() -> Self {
        Self {
            state: "cve_ent".to_string(),
            municipality: "cve_mun".to_string(),
            period: "Fecha".to_string(),
        }
    }
}

impl Default for GeometryFields {
    fn default() -> Self {
        Self {
            id: "CLAVE".to_string(),
            state: "CVE_EDO".to_string(),
            municipality: "CVE_MUNI".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 800,
            population_floor: DEFAULT_POPULATION_FLOOR,
            no_data_color: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            input: InputConfig::default(),
            render: RenderConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config file, falling back to defaults when it does not exist.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Fixes the data root once at startup: CLI flag, then environment, then file.
    pub fn resolve_data_root(&mut self, cli_override: Option<PathBuf>) {
        let env_override = std::env::var_os(DATA_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        self.apply_data_root(cli_override, env_override);
    }

    fn apply_data_root(&mut self, cli_override: Option<PathBuf>, env_override: Option<PathBuf>) {
        if let Some(root) = cli_override.or(env_override) {
            self.data_root = root;
        }
        tracing::info!(data_root = %self.data_root.display(), "data root resolved");
    }

    pub fn crimes_path(&self) -> PathBuf {
        self.data_root.join(&self.input.crimes_csv)
    }

    pub fn population_path(&self) -> PathBuf {
        self.data_root.join(&self.input.population_csv)
    }

    pub fn geometry_path(&self) -> PathBuf {
        self.data_root.join(&self.input.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.data_root, PathBuf::from("Data"));
        assert_eq!(config.input.crime_columns.period, "Fecha");
        assert_eq!(config.render.population_floor, 100_000);
        assert_eq!(config.input.source_crs, SourceCrs::InegiLambert);
        assert_eq!(config.crimes_path(), PathBuf::from("Data/delitos_mensuales.csv"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_toml(
            r##"
            data_root = "/srv/delitos"

            [input]
            geometry = "municipios.geojson"
            source_crs = "geographic"

            [render]
            no_data_color = "#dddddd"

            [server]
            port = 9000
            "##,
        )
        .unwrap();

        assert_eq!(config.geometry_path(), PathBuf::from("/srv/delitos/municipios.geojson"));
        assert_eq!(config.input.source_crs, SourceCrs::Geographic);
        assert_eq!(config.input.geometry_fields.id, "CLAVE");
        assert_eq!(config.render.no_data_color.as_deref(), Some("#dddddd"));
        assert_eq!(config.render.width, 1600);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn cli_flag_wins_over_environment() {
        let mut config = AppConfig::default();
        config.apply_data_root(Some("/cli".into()), Some("/env".into()));
        assert_eq!(config.data_root, PathBuf::from("/cli"));

        let mut config = AppConfig::default();
        config.apply_data_root(None, Some("/env".into()));
        assert_eq!(config.population_path(), PathBuf::from("/env/Municipios.csv"));

        let mut config = AppConfig::default();
        config.apply_data_root(None, None);
        assert_eq!(config.data_root, PathBuf::from("Data"));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(AppConfig::from_toml("data_root = ").is_err());
    }
}
