// ── Property addressing ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `<device>/<node>/<property>`, the part of a property topic after the
/// namespace and protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPath {
    pub device_id: String,
    pub node_id: String,
    pub property_id: String,
}

impl PropertyPath {
    pub fn new(
        device_id: impl Into<String>,
        node_id: impl Into<String>,
        property_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            node_id: node_id.into(),
            property_id: property_id.into(),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device_id, self.node_id, self.property_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected <device>/<node>/<property>, got '{0}'")]
pub struct InvalidPropertyPath(pub String);

impl FromStr for PropertyPath {
    type Err = InvalidPropertyPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [device, node, property]
                if !device.is_empty() && !node.is_empty() && !property.is_empty() =>
            {
                Ok(Self::new(*device, *node, *property))
            }
            _ => Err(InvalidPropertyPath(s.to_owned())),
        }
    }
}
