//! Cloud-node inventory model.

use serde::{Deserialize, Serialize};

/// One on-premise controller registered to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub connection_status: Option<ConnectionStatus>,
    /// Provider-shaped blob; displayed raw, never interpreted.
    #[serde(default)]
    pub sync_status: Option<serde_json::Value>,
    #[serde(default)]
    pub software_version: Option<serde_json::Value>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub ipv6_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    #[serde(default)]
    pub connected: bool,
}

impl CloudNode {
    pub fn is_connected(&self) -> bool {
        self.connection_status
            .as_ref()
            .map(|s| s.connected)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_shape() {
        let json = r#"{
            "id": "5f1a",
            "name": "Front Gate Controller",
            "serialNumber": "CN-10231",
            "connectionStatus": {"connected": true, "lastSeen": "2026-08-01T12:00:00Z"},
            "syncStatus": {"state": "synced"},
            "softwareVersion": {"current": "2.8.1"},
            "macAddress": "00:1B:44:11:3A:B7",
            "ipv4Address": "10.0.0.12"
        }"#;

        let node: CloudNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.name, "Front Gate Controller");
        assert_eq!(node.serial_number.as_deref(), Some("CN-10231"));
        assert!(node.is_connected());
        assert_eq!(node.ipv6_address, None);
    }

    #[test]
    fn test_parse_minimal_shape() {
        let node: CloudNode = serde_json::from_str(r#"{"id": "n1", "name": "Bare"}"#).unwrap();
        assert!(!node.is_connected());
    }
}
