pub mod pg;

use crate::osm::data::{FeatureRecord, OsmData};

/// What to do when a table being written to already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfExists {
    Replace,
    Append,
}

/// Destination of imported OSM data.
pub trait OsmSink {
    /// Write a whole parsed extract to one table, replacing it if it exists.
    fn dump_data(&mut self, data: &OsmData, table_name: &str) -> anyhow::Result<()>;

    /// Write a single feature to the table of its (subregion, layer) pair.
    fn dump_layer_record(
        &mut self,
        record: &FeatureRecord,
        subregion: &str,
        layer: &str,
        if_exists: IfExists,
    ) -> anyhow::Result<()>;

    /// Drop any memory held between writes. Never changes what is written.
    fn release_buffers(&mut self) {}
}

pub fn layer_table_name(subregion: &str, layer: &str) -> String {
    format!("{}_{}", subregion, layer)
}
