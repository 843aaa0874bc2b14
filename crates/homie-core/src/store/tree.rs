// ── Immutable device tree ──
//
// A snapshot is a cheap `Arc` handle. Updates never mutate a snapshot in
// place: they clone the maps along the path to the change and reuse every
// sibling `Arc`, so untouched devices, nodes and properties keep their
// identity across snapshots.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::model::{Device, Property, PropertyPath};

type DeviceMap = IndexMap<String, Arc<Device>>;

/// Root of the device tree: device ID → device, in first-seen order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct DeviceTree {
    devices: Arc<DeviceMap>,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(devices: DeviceMap) -> Self {
        Self {
            devices: Arc::new(devices),
        }
    }

    pub(crate) fn map(&self) -> &DeviceMap {
        &self.devices
    }

    /// `true` if both handles point at the same root map.
    ///
    /// An update that changed nothing hands back the original root, so this
    /// is the cheap "did anything happen" check.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.devices, &other.devices)
    }

    pub fn get(&self, device_id: &str) -> Option<&Arc<Device>> {
        self.devices.get(device_id)
    }

    pub fn property(&self, path: &PropertyPath) -> Option<&Arc<Property>> {
        self.get(&path.device_id)?
            .property(&path.node_id, &path.property_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Device>)> {
        self.devices.iter()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Whether the device has received its first `$description`.
    pub fn is_device_ready(&self, device_id: &str) -> bool {
        self.get(device_id)
            .is_some_and(|d| d.has_loaded_initial_description)
    }
}

/// Copy-on-write update of one map entry.
///
/// Starts from a clone of the current value (or `V::default()` when the key
/// is absent), lets `f` edit it, and returns the new `Arc` only if the
/// result differs from what was there. `None` means "leave the map alone".
pub(crate) fn update_entry<V, F>(map: &IndexMap<String, Arc<V>>, key: &str, f: F) -> Option<Arc<V>>
where
    V: Clone + Default + PartialEq,
    F: FnOnce(&mut V),
{
    let current = map.get(key);
    let mut next = current.map_or_else(V::default, |v| V::clone(v));
    f(&mut next);

    match current {
        Some(existing) if **existing == next => None,
        _ => Some(Arc::new(next)),
    }
}
