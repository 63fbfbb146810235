//! Recording fakes of the external systems, for unit tests.

use anyhow::anyhow;
use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};

use crate::{
    catalog::{index::Catalog, index::FileFormat, tree::RegionIndex},
    db::{IfExists, OsmSink},
    osm::{
        data::{FeatureRecord, LayerData, OsmData},
        download::{remove_subregion_osm_file, ExtractDownloader},
        reader::{
            RawExtract, RawExtractOpener, ReadOptions, ReadOutcome, SkipReason, StructuredReader,
        },
    },
};

pub struct FakeCatalog {
    index: RegionIndex,
}

impl FakeCatalog {
    pub fn new(index: RegionIndex) -> Self {
        Self { index }
    }
}

impl Catalog for FakeCatalog {
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

pub struct RecordingDownloader {
    dir: PathBuf,
    create_files: bool,
    failing_download: Option<String>,
    removal_error: Option<io::ErrorKind>,
    download_calls: RefCell<Vec<(String, FileFormat, bool)>>,
    removals: RefCell<Vec<PathBuf>>,
}

impl RecordingDownloader {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            create_files: false,
            failing_download: None,
            removal_error: None,
            download_calls: RefCell::new(Vec::new()),
            removals: RefCell::new(Vec::new()),
        }
    }

    /// Write a small placeholder file on download.
    pub fn creating_files(mut self) -> Self {
        self.create_files = true;
        self
    }

    pub fn failing_download(mut self, subregion: &str) -> Self {
        self.failing_download = Some(subregion.to_string());
        self
    }

    pub fn failing_removal(mut self, kind: io::ErrorKind) -> Self {
        self.removal_error = Some(kind);
        self
    }

    pub fn path_for(&self, subregion: &str) -> PathBuf {
        self.local_path(subregion, FileFormat::OsmPbf)
            .expect("local paths of the fake downloader are infallible")
    }

    pub fn downloads(&self) -> Vec<String> {
        self.download_calls
            .borrow()
            .iter()
            .map(|(subregion, _, _)| subregion.clone())
            .collect()
    }

    pub fn download_calls(&self) -> Vec<(String, FileFormat, bool)> {
        self.download_calls.borrow().clone()
    }

    pub fn removals(&self) -> Vec<PathBuf> {
        self.removals.borrow().clone()
    }
}

impl ExtractDownloader for RecordingDownloader {
    fn local_path(&self, subregion: &str, format: FileFormat) -> anyhow::Result<PathBuf> {
        let slug = subregion.to_lowercase().replace(' ', "-");
        Ok(self
            .dir
            .join(format!("{}-latest{}", slug, format.extension())))
    }

    fn download(
        &self,
        subregion: &str,
        format: FileFormat,
        update: bool,
    ) -> anyhow::Result<PathBuf> {
        self.download_calls
            .borrow_mut()
            .push((subregion.to_string(), format, update));
        if self.failing_download.as_deref() == Some(subregion) {
            return Err(anyhow!("Download of {:?} failed", subregion));
        }
        let filepath = self.local_path(subregion, format)?;
        if self.create_files {
            std::fs::write(&filepath, b"extract")?;
        }
        Ok(filepath)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.removals.borrow_mut().push(path.to_path_buf());
        match self.removal_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => remove_subregion_osm_file(path),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeExtract {
    layers: Vec<(String, Vec<FeatureRecord>)>,
    failing: Option<(String, usize)>,
}

impl FakeExtract {
    pub fn new(layers: Vec<(&str, Vec<FeatureRecord>)>) -> Self {
        Self {
            layers: layers
                .into_iter()
                .map(|(name, features)| (name.to_string(), features))
                .collect(),
            failing: None,
        }
    }

    /// Make reading `layer` fail once `after` of its features have been visited.
    pub fn failing_after(mut self, layer: &str, after: usize) -> Self {
        self.failing = Some((layer.to_string(), after));
        self
    }
}

impl RawExtract for FakeExtract {
    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer_name(&self, index: usize) -> anyhow::Result<String> {
        self.layers
            .get(index)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("No layer {}", index))
    }

    fn visit_features(
        &self,
        index: usize,
        visitor: &mut dyn FnMut(FeatureRecord) -> anyhow::Result<()>,
    ) -> anyhow::Result<u64> {
        let (name, features) = self
            .layers
            .get(index)
            .ok_or_else(|| anyhow!("No layer {}", index))?;
        let mut count = 0;
        for (position, feature) in features.iter().enumerate() {
            if let Some((failing_layer, after)) = &self.failing {
                if failing_layer == name && position == *after {
                    return Err(anyhow!("Corrupt feature in layer {:?}", name));
                }
            }
            visitor(feature.clone())?;
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct FakeExtractOpener {
    extract: Option<FakeExtract>,
    fail: bool,
    opened: Cell<usize>,
}

impl FakeExtractOpener {
    pub fn with_layers(layers: Vec<(&str, Vec<FeatureRecord>)>) -> Self {
        Self {
            extract: Some(FakeExtract::new(layers)),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.get()
    }
}

impl RawExtractOpener for FakeExtractOpener {
    fn open(&self, filepath: &Path) -> anyhow::Result<Box<dyn RawExtract>> {
        self.opened.set(self.opened.get() + 1);
        if self.fail {
            return Err(anyhow!("Cannot open {:?}", filepath));
        }
        Ok(Box::new(self.extract.clone().unwrap_or_default()))
    }
}

/// Loads every subregion with the same layers, or skips every subregion.
pub struct FakeReader {
    layers: Option<Vec<LayerData>>,
    failing_on: Option<String>,
    reads: RefCell<Vec<String>>,
}

impl FakeReader {
    pub fn loading_all(layers: Vec<(&str, Vec<FeatureRecord>)>) -> Self {
        let layers = layers
            .into_iter()
            .map(|(name, features)| LayerData {
                name: name.to_string(),
                features,
            })
            .collect();
        Self {
            layers: Some(layers),
            failing_on: None,
            reads: RefCell::new(Vec::new()),
        }
    }

    pub fn skipping_all() -> Self {
        Self {
            layers: None,
            failing_on: None,
            reads: RefCell::new(Vec::new()),
        }
    }

    pub fn failing_on(subregion: &str) -> Self {
        Self {
            failing_on: Some(subregion.to_string()),
            ..Self::skipping_all()
        }
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.borrow().clone()
    }
}

impl StructuredReader for FakeReader {
    fn read(&self, subregion: &str, _options: &ReadOptions) -> anyhow::Result<ReadOutcome> {
        self.reads.borrow_mut().push(subregion.to_string());
        if self.failing_on.as_deref() == Some(subregion) {
            return Err(anyhow!("Download of {:?} failed", subregion));
        }
        Ok(match &self.layers {
            Some(layers) => ReadOutcome::Loaded(OsmData {
                subregion: subregion.to_string(),
                layers: layers.clone(),
            }),
            None => ReadOutcome::Skipped(SkipReason::TooLarge {
                size_mb: 1000.0,
                limit_mb: 100,
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    DumpData {
        table: String,
        features: usize,
    },
    DumpLayerRecord {
        subregion: String,
        layer: String,
        if_exists: IfExists,
        id: Option<i64>,
    },
    ReleaseBuffers,
}

#[derive(Default)]
pub struct RecordingSink {
    pub calls: Vec<SinkCall>,
    failing_layers: HashSet<String>,
}

impl RecordingSink {
    pub fn failing_layer(mut self, layer: &str) -> Self {
        self.failing_layers.insert(layer.to_string());
        self
    }

    /// The write modes of all records written to one layer table, in order.
    pub fn layer_modes(&self, subregion: &str, layer: &str) -> Vec<IfExists> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::DumpLayerRecord {
                    subregion: call_subregion,
                    layer: call_layer,
                    if_exists,
                    ..
                } if call_subregion == subregion && call_layer == layer => Some(*if_exists),
                _ => None,
            })
            .collect()
    }
}

impl OsmSink for RecordingSink {
    fn dump_data(&mut self, data: &OsmData, table_name: &str) -> anyhow::Result<()> {
        self.calls.push(SinkCall::DumpData {
            table: table_name.to_string(),
            features: data.feature_count(),
        });
        Ok(())
    }

    fn dump_layer_record(
        &mut self,
        record: &FeatureRecord,
        subregion: &str,
        layer: &str,
        if_exists: IfExists,
    ) -> anyhow::Result<()> {
        if self.failing_layers.contains(layer) {
            return Err(anyhow!("Table for layer {:?} is locked", layer));
        }
        self.calls.push(SinkCall::DumpLayerRecord {
            subregion: subregion.to_string(),
            layer: layer.to_string(),
            if_exists,
            id: record.id,
        });
        Ok(())
    }

    fn release_buffers(&mut self) {
        self.calls.push(SinkCall::ReleaseBuffers);
    }
}
