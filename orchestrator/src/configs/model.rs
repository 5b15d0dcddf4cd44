use std::{fmt, fs, path::Path};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use serde_json::{Map, Value, json};

use super::ConfigError;
use crate::error::OrchestratorError;

/// The wire form of one layer: its `kind` tag and the rest of its fields, still untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LayerConfig {
    fn new(kind: &str, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };

        Self {
            kind: kind.to_string(),
            fields,
        }
    }

    pub fn conv(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        activation: Option<&str>,
    ) -> Self {
        Self::new(
            "conv",
            json!({
                "in_channels": in_channels,
                "out_channels": out_channels,
                "kernel_size": kernel_size,
                "padding": padding,
                "activation": activation,
            }),
        )
    }

    pub fn pool(kernel_size: usize, stride: usize) -> Self {
        Self::new(
            "pool",
            json!({ "kernel_size": kernel_size, "stride": stride }),
        )
    }

    pub fn fcl(in_features: usize, out_features: usize, activation: Option<&str>) -> Self {
        Self::new(
            "fcl",
            json!({
                "in_features": in_features,
                "out_features": out_features,
                "activation": activation,
            }),
        )
    }
}

/// An ordered `name -> layer` description of a model, as produced by an editor.
///
/// The JSON form is an object whose entries are kept in document order, since that order is the
/// execution order of the layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchitectureConfig {
    layers: Vec<(String, LayerConfig)>,
}

impl ArchitectureConfig {
    pub fn new(layers: Vec<(String, LayerConfig)>) -> Self {
        Self { layers }
    }

    /// Appends a layer, returning the extended config.
    pub fn with(mut self, name: impl Into<String>, layer: LayerConfig) -> Self {
        self.layers.push((name.into(), layer));
        self
    }

    pub fn layers(&self) -> &[(String, LayerConfig)] {
        &self.layers
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads an architecture from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// The three convolution blocks and three dense layers classifier for 3x128x128 images.
    pub fn reference(num_classes: usize) -> Self {
        Self::default()
            .with("conv1", LayerConfig::conv(3, 16, 3, 1, Some("relu")))
            .with("pool1", LayerConfig::pool(2, 2))
            .with("conv2", LayerConfig::conv(16, 32, 3, 1, Some("relu")))
            .with("pool2", LayerConfig::pool(2, 2))
            .with("conv3", LayerConfig::conv(32, 64, 3, 1, Some("relu")))
            .with("pool3", LayerConfig::pool(2, 2))
            .with("fcl_input1", LayerConfig::fcl(64 * 16 * 16, 256, Some("relu")))
            .with("fcl_hidden1", LayerConfig::fcl(256, 128, Some("sigmoid")))
            .with("fcl_output1", LayerConfig::fcl(128, num_classes, Some("sigmoid")))
    }
}

impl Serialize for ArchitectureConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.layers.len()))?;
        for (name, layer) in &self.layers {
            map.serialize_entry(name, layer)?;
        }
        map.end()
    }
}

struct ArchitectureVisitor;

impl<'de> Visitor<'de> for ArchitectureVisitor {
    type Value = ArchitectureConfig;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object mapping layer names to layers")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut layers = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(entry) = access.next_entry::<String, LayerConfig>()? {
            layers.push(entry);
        }

        Ok(ArchitectureConfig { layers })
    }
}

impl<'de> Deserialize<'de> for ArchitectureConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ArchitectureVisitor)
    }
}
