use serde::{Deserialize, Serialize};

/// A single feature of a layer, as exported to GeoJSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: Option<i64>,
    pub geometry: Option<geojson::Geometry>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl FeatureRecord {
    /// The geometry as a JSON value, for storing in a JSONB column.
    pub fn geometry_json(&self) -> Option<serde_json::Value> {
        self.geometry
            .as_ref()
            .map(|geometry| serde_json::Value::Object(geojson::JsonObject::from(geometry)))
    }

    pub fn properties_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.properties.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerData {
    pub name: String,
    pub features: Vec<FeatureRecord>,
}

/// All layers of one subregion's extract, read into memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmData {
    pub subregion: String,
    pub layers: Vec<LayerData>,
}

impl OsmData {
    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.features.len()).sum()
    }
}
