use anyhow::Context;
use gdal::vector::{FieldValue, LayerAccess};
use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use super::{
    data::{FeatureRecord, LayerData, OsmData},
    download::ExtractDownloader,
};
use crate::catalog::index::FileFormat;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// Download the extract again even if a local copy exists.
    pub update: bool,
    /// Ask on stdin before downloading a missing extract.
    pub download_confirmation_required: bool,
    /// Extracts larger than this are not read into memory.
    pub file_size_limit_mb: u64,
    /// Keep a JSON copy of the parsed data next to the extract and reuse it.
    pub cache_parsed: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            update: false,
            download_confirmation_required: false,
            file_size_limit_mb: 100,
            cache_parsed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TooLarge { size_mb: f64, limit_mb: u64 },
    DownloadDeclined,
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooLarge { size_mb, limit_mb } => {
                write!(f, "file is {:.1} MB, over the {} MB limit", size_mb, limit_mb)
            }
            SkipReason::DownloadDeclined => f.write_str("download was declined"),
            SkipReason::Unreadable(message) => write!(f, "file could not be read: {}", message),
        }
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Loaded(OsmData),
    Skipped(SkipReason),
}

/// Reads a subregion's whole extract into memory when that is feasible.
pub trait StructuredReader {
    fn read(&self, subregion: &str, options: &ReadOptions) -> anyhow::Result<ReadOutcome>;
}

/// Layer by layer, feature by feature access to an extract file.
pub trait RawExtract {
    fn layer_count(&self) -> usize;

    fn layer_name(&self, index: usize) -> anyhow::Result<String>;

    /// Call `visitor` on every feature of the layer in turn, stopping at the first error.
    /// Returns the number of features visited.
    fn visit_features(
        &self,
        index: usize,
        visitor: &mut dyn FnMut(FeatureRecord) -> anyhow::Result<()>,
    ) -> anyhow::Result<u64>;
}

pub trait RawExtractOpener {
    fn open(&self, filepath: &Path) -> anyhow::Result<Box<dyn RawExtract>>;
}

pub struct GdalExtract {
    dataset: gdal::Dataset,
}

impl GdalExtract {
    pub fn open(filepath: &Path) -> anyhow::Result<Self> {
        gdal::DriverManager::register_all();
        let mut open_options = gdal::DatasetOptions::default();
        open_options.open_flags = gdal::GdalOpenFlags::GDAL_OF_VECTOR;
        let dataset = gdal::Dataset::open_ex(filepath, open_options)
            .with_context(|| format!("Opening {:?}", filepath))?;
        Ok(Self { dataset })
    }
}

impl RawExtract for GdalExtract {
    fn layer_count(&self) -> usize {
        usize::try_from(self.dataset.layer_count()).unwrap_or(0)
    }

    fn layer_name(&self, index: usize) -> anyhow::Result<String> {
        let layer = self.dataset.layer(index.try_into()?)?;
        Ok(layer.name())
    }

    fn visit_features(
        &self,
        index: usize,
        visitor: &mut dyn FnMut(FeatureRecord) -> anyhow::Result<()>,
    ) -> anyhow::Result<u64> {
        let mut layer = self.dataset.layer(index.try_into()?)?;
        let mut count = 0;
        for gdal_feature in layer.features() {
            visitor(convert_feature(&gdal_feature)?)?;
            count += 1;
        }
        Ok(count)
    }
}

pub struct GdalExtractOpener;

impl RawExtractOpener for GdalExtractOpener {
    fn open(&self, filepath: &Path) -> anyhow::Result<Box<dyn RawExtract>> {
        Ok(Box::new(GdalExtract::open(filepath)?))
    }
}

fn convert_feature(gdal_feature: &gdal::vector::Feature) -> anyhow::Result<FeatureRecord> {
    let id = match gdal_feature.fid() {
        Some(fid) => Some(i64::try_from(fid)?),
        None => None,
    };
    // Features without geometry have a null geometry reference, which json() cannot export.
    let geometry = match gdal_feature.geometry_by_index(0).ok() {
        Some(geometry) => {
            let value: serde_json::Value = serde_json::from_str(&geometry.json()?)?;
            Some(geojson::Geometry::from_json_value(value)?)
        }
        None => None,
    };
    let properties = gdal_feature
        .fields()
        .map(|(name, value)| (name, field_value_to_json(value)))
        .collect();
    Ok(FeatureRecord {
        id,
        geometry,
        properties,
    })
}

fn field_value_to_json(value: Option<FieldValue>) -> serde_json::Value {
    use serde_json::Value;
    match value {
        None => Value::Null,
        Some(FieldValue::IntegerValue(value)) => Value::from(value),
        Some(FieldValue::IntegerListValue(values)) => Value::from(values),
        Some(FieldValue::Integer64Value(value)) => Value::from(value),
        Some(FieldValue::Integer64ListValue(values)) => Value::from(values),
        Some(FieldValue::StringValue(value)) => Value::from(value),
        Some(FieldValue::StringListValue(values)) => Value::from(values),
        // NaN and infinities have no JSON representation and become null.
        Some(FieldValue::RealValue(value)) => Value::from(value),
        Some(FieldValue::RealListValue(values)) => Value::from(values),
        Some(FieldValue::DateValue(date)) => Value::from(date.to_string()),
        Some(FieldValue::DateTimeValue(datetime)) => Value::from(datetime.to_rfc3339()),
    }
}

/// Read every layer of an extract into memory.
pub fn read_osm_data(extract: &dyn RawExtract, subregion: &str) -> anyhow::Result<OsmData> {
    let mut layers = Vec::with_capacity(extract.layer_count());
    for index in 0..extract.layer_count() {
        let name = extract.layer_name(index)?;
        let mut features = Vec::new();
        extract.visit_features(index, &mut |feature| {
            features.push(feature);
            Ok(())
        })?;
        log::debug!("Read {} features from layer {:?}", features.len(), name);
        layers.push(LayerData { name, features });
    }
    Ok(OsmData {
        subregion: subregion.to_string(),
        layers,
    })
}

pub fn get_parsed_cache_filepath(extract_filepath: &Path) -> PathBuf {
    let mut filepath = extract_filepath.as_os_str().to_owned();
    filepath.push(".json");
    PathBuf::from(filepath)
}

fn confirmed(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Structured reader over PBF extracts, downloading them on demand.
pub struct GdalStructuredReader<'a, D: ExtractDownloader> {
    downloader: &'a D,
    opener: &'a dyn RawExtractOpener,
    confirm: fn(&str) -> anyhow::Result<bool>,
}

impl<'a, D: ExtractDownloader> GdalStructuredReader<'a, D> {
    pub fn new(downloader: &'a D, opener: &'a dyn RawExtractOpener) -> Self {
        Self {
            downloader,
            opener,
            confirm: confirmed,
        }
    }

    pub fn with_confirmation(mut self, confirm: fn(&str) -> anyhow::Result<bool>) -> Self {
        self.confirm = confirm;
        self
    }
}

impl<D: ExtractDownloader> StructuredReader for GdalStructuredReader<'_, D> {
    fn read(&self, subregion: &str, options: &ReadOptions) -> anyhow::Result<ReadOutcome> {
        let extract_filepath = self.downloader.local_path(subregion, FileFormat::OsmPbf)?;
        let cache_filepath = get_parsed_cache_filepath(&extract_filepath);
        if options.cache_parsed && !options.update && cache_filepath.exists() {
            log::info!("Loading parsed data of {:?} from {:?}", subregion, cache_filepath);
            let contents = fs::read_to_string(&cache_filepath)?;
            let data: OsmData = serde_json::from_str(&contents)
                .with_context(|| format!("Parsing {:?}", cache_filepath))?;
            return Ok(ReadOutcome::Loaded(data));
        }

        if options.update || !extract_filepath.exists() {
            if options.download_confirmation_required
                && !(self.confirm)(&format!("Download the extract of {:?}?", subregion))?
            {
                return Ok(ReadOutcome::Skipped(SkipReason::DownloadDeclined));
            }
            self.downloader
                .download(subregion, FileFormat::OsmPbf, options.update)?;
        }

        let size_mb = fs::metadata(&extract_filepath)
            .with_context(|| format!("Reading metadata of {:?}", extract_filepath))?
            .len() as f64
            / BYTES_PER_MB;
        if size_mb > options.file_size_limit_mb as f64 {
            return Ok(ReadOutcome::Skipped(SkipReason::TooLarge {
                size_mb,
                limit_mb: options.file_size_limit_mb,
            }));
        }

        log::info!("Reading {:?} ({:.1} MB)", extract_filepath, size_mb);
        let data = match self
            .opener
            .open(&extract_filepath)
            .and_then(|extract| read_osm_data(extract.as_ref(), subregion))
        {
            Ok(data) => data,
            Err(err) => return Ok(ReadOutcome::Skipped(SkipReason::Unreadable(format!("{:#}", err)))),
        };

        if options.cache_parsed {
            fs::write(&cache_filepath, serde_json::to_string(&data)?)
                .with_context(|| format!("Writing {:?}", cache_filepath))?;
        }
        Ok(ReadOutcome::Loaded(data))
    }
}
