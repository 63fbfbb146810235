use serde::Deserialize;
use std::path::PathBuf;

use crate::catalog::matching::DEFAULT_MATCH_THRESHOLD;

pub const GEOFABRIK_INDEX_URL: &str = "https://download.geofabrik.de/index-v1-nogeom.json";

#[derive(Deserialize, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database_name: String,
    /// Database to connect to while checking for and creating `database_name`.
    #[serde(default = "default_maintenance_database")]
    pub maintenance_database: String,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct CatalogConfig {
    pub index_url: String,
    /// Minimum similarity in [0, 1] for a region name to be accepted.
    pub match_threshold: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            index_url: GEOFABRIK_INDEX_URL.to_string(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct ImportConfig {
    pub file_size_limit_mb: u64,
    pub rm_raw_file: bool,
    pub cache_parsed: bool,
    pub download_confirmation_required: bool,
    pub buffer_release_threshold: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            file_size_limit_mb: 100,
            rm_raw_file: true,
            cache_parsed: false,
            download_confirmation_required: false,
            buffer_release_threshold: 10_000,
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_maintenance_database() -> String {
    "postgres".to_string()
}
