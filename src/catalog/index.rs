use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use super::tree::{ParentLink, RegionIndex};

pub const USER_AGENT: &str = "osm-extracts";
const INDEX_CACHE_FILENAME: &str = "index-v1-nogeom.json";

/// Read access to the extract catalog.
pub trait Catalog {
    /// Every region and subregion name known to the catalog.
    fn subregion_names(&self) -> Vec<String>;
    fn region_subregion_index(&self) -> &RegionIndex;
    /// Names of all subregions that have no subregions of their own.
    fn no_subregion_list(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    OsmPbf,
    OsmBz2,
    ShpZip,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::OsmPbf => ".osm.pbf",
            FileFormat::OsmBz2 => ".osm.bz2",
            FileFormat::ShpZip => ".shp.zip",
        }
    }

    /// Key of the format in a catalog entry's `urls` map.
    fn url_key(&self) -> &'static str {
        match self {
            FileFormat::OsmPbf => "pbf",
            FileFormat::OsmBz2 => "bz2",
            FileFormat::ShpZip => "shp",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.') {
            "osm.pbf" | "pbf" => Ok(FileFormat::OsmPbf),
            "osm.bz2" | "bz2" => Ok(FileFormat::OsmBz2),
            "shp.zip" | "shp" => Ok(FileFormat::ShpZip),
            _ => Err(anyhow!(
                "Unknown file format {:?}, expected one of .osm.pbf, .osm.bz2, .shp.zip",
                s
            )),
        }
    }
}

#[derive(Deserialize, Debug)]
struct IndexDocument {
    features: Vec<IndexFeature>,
}

#[derive(Deserialize, Debug)]
struct IndexFeature {
    properties: CatalogEntry,
}

/// One region of the Geofabrik download index.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub parent: Option<String>,
    pub name: String,
    #[serde(default)]
    pub urls: HashMap<String, String>,
}

pub struct GeofabrikCatalog {
    entries: HashMap<String, CatalogEntry>,
    index: RegionIndex,
}

impl GeofabrikCatalog {
    /// Load the catalog, fetching the index from `index_url` when `update` is set or when
    /// there is no cached copy under `data_dir` yet.
    pub fn load(index_url: &str, data_dir: &Path, update: bool) -> anyhow::Result<Self> {
        let cache_filepath = get_index_cache_filepath(data_dir);
        let contents = if cache_filepath.exists() && !update {
            log::info!("Using cached catalog index {:?}", cache_filepath);
            fs::read_to_string(&cache_filepath)
                .with_context(|| format!("Reading cached catalog index {:?}", cache_filepath))?
        } else {
            let contents = download_index(index_url)?;
            if let Some(parent) = cache_filepath.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&cache_filepath, &contents)
                .with_context(|| format!("Caching catalog index to {:?}", cache_filepath))?;
            contents
        };
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        let document: IndexDocument =
            serde_json::from_str(contents).context("Parsing catalog index")?;
        let entries: Vec<CatalogEntry> = document
            .features
            .into_iter()
            .map(|feature| feature.properties)
            .collect();
        log::debug!("Catalog index has {} entries", entries.len());
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let index = RegionIndex::from_parent_links(entries.iter().map(|entry| ParentLink {
            id: &entry.id,
            parent: entry.parent.as_deref(),
            name: &entry.name,
        }));
        let mut entries_by_name = HashMap::new();
        for entry in entries {
            entries_by_name.entry(entry.name.clone()).or_insert(entry);
        }
        Self {
            entries: entries_by_name,
            index,
        }
    }

    pub fn entry(&self, name: &str) -> anyhow::Result<&CatalogEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| anyhow!("{:?} is not in the catalog", name))
    }

    pub fn download_url(&self, name: &str, format: FileFormat) -> anyhow::Result<&str> {
        let entry = self.entry(name)?;
        entry
            .urls
            .get(format.url_key())
            .map(|url| url.as_str())
            .ok_or_else(|| anyhow!("No {} download is published for {:?}", format, name))
    }
}

impl Catalog for GeofabrikCatalog {
    fn subregion_names(&self) -> Vec<String> {
        self.index.names()
    }

    fn region_subregion_index(&self) -> &RegionIndex {
        &self.index
    }

    fn no_subregion_list(&self) -> Vec<String> {
        self.index.leaf_names()
    }
}

pub fn get_index_cache_filepath(data_dir: &Path) -> PathBuf {
    data_dir.join("catalog").join(INDEX_CACHE_FILENAME)
}

fn download_index(index_url: &str) -> anyhow::Result<String> {
    log::info!("Downloading catalog index from {}", index_url);
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;
    let response = client.get(index_url).send()?.error_for_status()?;
    response
        .text()
        .or(Err(anyhow!("No response text from {}", index_url)))
}
