use anyhow::anyhow;
use std::path::PathBuf;

use crate::{
    catalog::{
        index::{Catalog, FileFormat},
        matching::{best_match, resolve_region_name},
    },
    osm::download::ExtractDownloader,
};

/// Make sure an extract is available locally for `region_name`, or for every leaf subregion
/// below it if it has subregions. Returns the paths of the extract files.
///
/// Intermediate regions are never downloaded themselves: their leaves cover them.
pub fn make_subregion_osm_data_available<C: Catalog, D: ExtractDownloader>(
    catalog: &C,
    downloader: &D,
    region_name: &str,
    file_format: FileFormat,
    update: bool,
    match_threshold: f64,
) -> anyhow::Result<Vec<PathBuf>> {
    let names = catalog.subregion_names();
    let resolved = match resolve_region_name(region_name, &names, match_threshold) {
        Some(resolved) => resolved,
        None => {
            return Err(match best_match(region_name, &names) {
                Some(best) => anyhow!(
                    "No region matches {:?} (closest is {:?} with similarity {:.2}, below {})",
                    region_name,
                    best.name,
                    best.score,
                    match_threshold
                ),
                None => anyhow!("No region matches {:?}, the catalog is empty", region_name),
            })
        }
    };
    if resolved.name != region_name {
        log::info!(
            "Resolved {:?} to {:?} (similarity {:.2})",
            region_name,
            resolved.name,
            resolved.score
        );
    }

    let node = catalog
        .region_subregion_index()
        .find(&resolved.name)
        .ok_or_else(|| anyhow!("{:?} is not in the region index", resolved.name))?;
    let leaves = node.leaf_names();
    if !node.is_leaf() {
        log::info!(
            "{:?} has {} subregions without further subregions",
            resolved.name,
            leaves.len()
        );
    }

    leaves
        .iter()
        .map(|leaf| downloader.download(leaf, file_format, update))
        .collect()
}
