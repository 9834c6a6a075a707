use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Encoder switches. Missing JSON fields take their default.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EncodeOptions {
    /// Emit the resolution info resource (0x03ED).
    pub resolution_info: bool,
    /// Emit the version info resource (0x0421).
    pub version_info: bool,
    /// Emit a `luni` block with the UTF-16 layer name.
    pub unicode_layer_names: bool,
    pub dpi: u16,
    pub writer_name: String,
    pub reader_name: String,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            resolution_info: true,
            version_info: true,
            unicode_layer_names: true,
            dpi: 96,
            writer_name: "Paint.NET PSD Plugin".to_string(),
            reader_name: "Paint.NET PSD Plugin 2.5.0".to_string(),
        }
    }
}

impl EncodeOptions {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Only the layer records and pixel data, no resources.
    pub fn minimal() -> Self {
        EncodeOptions { resolution_info: false, version_info: false, unicode_layer_names: false, ..Self::default() }
    }
}
