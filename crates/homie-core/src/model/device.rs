// ── Device and node domain types ──

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::property::Property;

/// Lifecycle state published on `<ns>/5/<device>/$state`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Init,
    Ready,
    Disconnected,
    Sleeping,
    Lost,
}

impl DeviceState {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `true` for states where the device will not answer `set` commands.
    pub fn is_offline(self) -> bool {
        matches!(self, Self::Disconnected | Self::Lost)
    }
}

/// A node within a device. Owns its properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<String>,
    pub properties: IndexMap<String, Arc<Property>>,
}

impl Node {
    pub fn property(&self, property_id: &str) -> Option<&Arc<Property>> {
        self.properties.get(property_id)
    }
}

/// The canonical device record held in the tree.
///
/// Created bare (state `init`, no nodes) the first time any topic mentions
/// the device, then filled in by `$state`, `$description` and property
/// traffic. Never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub homie: String,
    pub version: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub state: DeviceState,
    pub children: Vec<String>,
    pub root: Option<String>,
    pub parent: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub has_loaded_initial_description: bool,
    pub nodes: IndexMap<String, Arc<Node>>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            homie: "5.0".into(),
            version: 0,
            name: String::new(),
            device_type: None,
            state: DeviceState::Init,
            children: Vec::new(),
            root: None,
            parent: None,
            extensions: None,
            has_loaded_initial_description: false,
            nodes: IndexMap::new(),
        }
    }
}

impl Device {
    pub fn node(&self, node_id: &str) -> Option<&Arc<Node>> {
        self.nodes.get(node_id)
    }

    pub fn property(&self, node_id: &str, property_id: &str) -> Option<&Arc<Property>> {
        self.node(node_id)?.property(property_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of properties across all nodes.
    pub fn property_count(&self) -> usize {
        self.nodes.values().map(|n| n.properties.len()).sum()
    }

    /// The name to show for this device, falling back to its ID.
    pub fn display_name<'a>(&'a self, device_id: &'a str) -> &'a str {
        if self.name.is_empty() {
            device_id
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn state_parses_wire_names() {
        assert_eq!(DeviceState::from_str("ready").unwrap(), DeviceState::Ready);
        assert_eq!(DeviceState::from_str("lost").unwrap(), DeviceState::Lost);
        assert!(DeviceState::from_str("Ready").is_err());
        assert!(DeviceState::from_str("bogus").is_err());
        assert_eq!(DeviceState::Sleeping.to_string(), "sleeping");
    }

    #[test]
    fn bare_device_defaults() {
        let d = Device::default();
        assert_eq!(d.state, DeviceState::Init);
        assert_eq!(d.homie, "5.0");
        assert!(!d.has_loaded_initial_description);
        assert_eq!(d.property_count(), 0);
        assert_eq!(d.display_name("dev1"), "dev1");
    }
}
