use anyhow::Context;
use indicatif::ProgressBar;
use std::io;

use crate::{
    catalog::index::{Catalog, FileFormat},
    db::{IfExists, OsmSink},
    osm::{
        download::ExtractDownloader,
        reader::{RawExtract, RawExtractOpener, ReadOptions, ReadOutcome, StructuredReader},
    },
};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub read: ReadOptions,
    /// Delete each subregion's extract once it has been imported.
    pub rm_raw_file: bool,
    /// Release the sink's buffers after this many features of a layer.
    pub buffer_release_threshold: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            read: ReadOptions::default(),
            rm_raw_file: true,
            buffer_release_threshold: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerImport {
    pub name: String,
    pub features: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubregionImport {
    /// Read into memory and written with a single bulk dump.
    Bulk { features: usize },
    /// Written feature by feature, one table per layer.
    FeatureWise { layers: Vec<LayerImport> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubregionReport {
    pub subregion: String,
    pub import: SubregionImport,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub subregions: Vec<SubregionReport>,
}

impl ImportReport {
    pub fn failed_layer_count(&self) -> usize {
        self.subregions
            .iter()
            .map(|report| match &report.import {
                SubregionImport::FeatureWise { layers } => {
                    layers.iter().filter(|layer| layer.error.is_some()).count()
                }
                _ => 0,
            })
            .sum()
    }

    pub fn failed_subregion_count(&self) -> usize {
        self.subregions
            .iter()
            .filter(|report| matches!(report.import, SubregionImport::Failed(_)))
            .count()
    }
}

/// Imports the extracts of all leaf subregions of a catalog.
pub struct ExtractImporter<'a, C, D, R> {
    pub catalog: &'a C,
    pub downloader: &'a D,
    pub reader: &'a R,
    pub opener: &'a dyn RawExtractOpener,
}

impl<C: Catalog, D: ExtractDownloader, R: StructuredReader> ExtractImporter<'_, C, D, R> {
    /// Import every subregion without subregions, one after the other.
    ///
    /// Errors of a single layer, or of writing a single subregion, are logged and recorded in
    /// the report. Download errors and failures to remove an extract for reasons other than
    /// permissions end the run.
    pub fn import_all(
        &self,
        sink: &mut dyn OsmSink,
        options: &ImportOptions,
    ) -> anyhow::Result<ImportReport> {
        let subregions = self.catalog.no_subregion_list();
        log::info!("Importing {} subregions", subregions.len());
        let bar = ProgressBar::new(subregions.len() as u64);
        let mut report = ImportReport::default();
        for subregion in &subregions {
            report
                .subregions
                .push(self.import_subregion(subregion, sink, options)?);
            bar.inc(1);
        }
        bar.finish_and_clear();
        log::info!(
            "Imported {} subregions, {} failed, {} layers failed",
            report.subregions.len(),
            report.failed_subregion_count(),
            report.failed_layer_count()
        );
        Ok(report)
    }

    pub fn import_subregion(
        &self,
        subregion: &str,
        sink: &mut dyn OsmSink,
        options: &ImportOptions,
    ) -> anyhow::Result<SubregionReport> {
        let extract_filepath = self.downloader.local_path(subregion, FileFormat::OsmPbf)?;

        let import = match self.reader.read(subregion, &options.read)? {
            ReadOutcome::Loaded(data) => {
                let features = data.feature_count();
                match sink.dump_data(&data, subregion) {
                    Ok(()) => SubregionImport::Bulk { features },
                    Err(err) => {
                        log::warn!("Failed to dump {:?}: {:#}", subregion, err);
                        SubregionImport::Failed(format!("{:#}", err))
                    }
                }
            }
            ReadOutcome::Skipped(reason) => {
                log::info!(
                    "Parsing and importing {:?} feature-wise, {}",
                    subregion,
                    reason
                );
                match self.opener.open(&extract_filepath) {
                    Ok(extract) => SubregionImport::FeatureWise {
                        layers: import_layers_feature_wise(
                            extract.as_ref(),
                            subregion,
                            sink,
                            options.buffer_release_threshold,
                        ),
                    },
                    Err(err) => {
                        log::warn!("Failed to open {:?}: {:#}", extract_filepath, err);
                        SubregionImport::Failed(format!("{:#}", err))
                    }
                }
            }
        };

        if options.rm_raw_file && !matches!(import, SubregionImport::Failed(_)) {
            match self.downloader.remove(&extract_filepath) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                    log::debug!("No permission to remove {:?}, keeping it", extract_filepath)
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("Removing {:?}", extract_filepath))
                }
            }
        }

        Ok(SubregionReport {
            subregion: subregion.to_string(),
            import,
        })
    }
}

/// Write every feature of every layer as its own row, replacing each layer's table on its
/// first feature and appending afterwards. A failing layer does not stop the others.
pub fn import_layers_feature_wise(
    extract: &dyn RawExtract,
    subregion: &str,
    sink: &mut dyn OsmSink,
    buffer_release_threshold: u64,
) -> Vec<LayerImport> {
    let mut layers = Vec::with_capacity(extract.layer_count());
    for index in 0..extract.layer_count() {
        let name = match extract.layer_name(index) {
            Ok(name) => name,
            Err(err) => {
                log::warn!("Failed to read layer {} of {:?}: {:#}", index, subregion, err);
                layers.push(LayerImport {
                    name: format!("#{}", index),
                    features: 0,
                    error: Some(format!("{:#}", err)),
                });
                continue;
            }
        };

        let mut written: u64 = 0;
        let result = extract.visit_features(index, &mut |record| {
            let if_exists = if written == 0 {
                IfExists::Replace
            } else {
                IfExists::Append
            };
            sink.dump_layer_record(&record, subregion, &name, if_exists)?;
            written += 1;
            if written == buffer_release_threshold {
                sink.release_buffers();
            }
            Ok(())
        });

        let error = match result {
            Ok(_) => {
                log::info!(
                    "Layer {:?} of {:?} done, {} features",
                    name,
                    subregion,
                    written
                );
                None
            }
            Err(err) => {
                log::warn!(
                    "Layer {:?} of {:?} failed after {} features: {:#}",
                    name,
                    subregion,
                    written,
                    err
                );
                Some(format!("{:#}", err))
            }
        };
        layers.push(LayerImport {
            name,
            features: written,
            error,
        });
    }
    layers
}
