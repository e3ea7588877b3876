//! Device inventory model.

use serde::{Deserialize, Serialize};

/// One controlled device (door, gate, relay) behind a cloud node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub delay: Option<u32>,
    /// Default hold-open time in tenths of a second.
    #[serde(default)]
    pub dwell: Option<u32>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub dps: Option<bool>,
    #[serde(default)]
    pub rex: Option<bool>,
    #[serde(default)]
    pub forced_alarm: Option<bool>,
    #[serde(default)]
    pub prop_alarm: Option<bool>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub hardware_version: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub osdp_address: Option<u32>,
    #[serde(default)]
    pub reader_type: Option<String>,
    /// Provider-shaped blobs; displayed raw, never interpreted.
    #[serde(default)]
    pub reader: Option<serde_json::Value>,
    #[serde(default)]
    pub partition: Option<serde_json::Value>,
    #[serde(default)]
    pub input_types: Option<serde_json::Value>,
}

impl Device {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
