// ── Event folding ──
//
// `DeviceTree::apply` is the only way a tree changes. Every fold goes
// through `update_entry`, so a fold that produces an equal value at some
// level stops there and the caller gets the original root back.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use super::tree::{DeviceTree, update_entry};
use crate::event::HomieEvent;
use crate::model::{
    Device, DeviceDescription, DeviceState, Node, NodeDescription, Property, PropertyDescription,
    PropertyPath,
};

impl DeviceTree {
    /// Fold one event into the tree.
    ///
    /// Returns a new snapshot sharing every untouched subtree with `self`,
    /// or a clone of `self` (same root, see [`DeviceTree::ptr_eq`]) when
    /// the event changes nothing. `PropertySet` and `Error` are never
    /// applied.
    pub fn apply(&self, event: &HomieEvent) -> DeviceTree {
        match event {
            HomieEvent::DeviceState {
                device_id,
                state: DeviceState::Lost,
            } => self.mark_lost(device_id),
            HomieEvent::DeviceState { device_id, state } => {
                let state = *state;
                self.with_device(device_id, |device| device.state = state)
            }
            HomieEvent::DeviceDescription {
                device_id,
                description,
            } => self.with_device(device_id, |device| merge_description(device, description)),
            HomieEvent::PropertyValue { path, value } => {
                self.with_property(path, |property| property.value = Some(value.clone()))
            }
            HomieEvent::PropertyTarget { path, value } => {
                self.with_property(path, |property| property.target = Some(value.clone()))
            }
            HomieEvent::PropertySet { .. } | HomieEvent::Error { .. } => self.clone(),
        }
    }

    /// Fold a sequence of events, left to right.
    pub fn apply_all<'a>(&self, events: impl IntoIterator<Item = &'a HomieEvent>) -> DeviceTree {
        events
            .into_iter()
            .fold(self.clone(), |tree, event| tree.apply(event))
    }

    fn with_device(&self, device_id: &str, f: impl FnOnce(&mut Device)) -> DeviceTree {
        match update_entry(self.map(), device_id, f) {
            Some(device) => {
                let mut devices = IndexMap::clone(self.map());
                devices.insert(device_id.to_owned(), device);
                DeviceTree::from_map(devices)
            }
            None => self.clone(),
        }
    }

    fn with_property(&self, path: &PropertyPath, f: impl FnOnce(&mut Property)) -> DeviceTree {
        self.with_device(&path.device_id, |device| {
            let node = update_entry(&device.nodes, &path.node_id, |node| {
                if let Some(property) = update_entry(&node.properties, &path.property_id, f) {
                    node.properties.insert(path.property_id.clone(), property);
                }
            });
            if let Some(node) = node {
                device.nodes.insert(path.node_id.clone(), node);
            }
        })
    }

    /// Mark `device_id` and every descendant reachable through `children`
    /// as lost, depth first.
    ///
    /// The named device is created bare if unknown. Children are only
    /// followed when they already exist in the tree; a child announced
    /// later starts from its own state.
    fn mark_lost(&self, device_id: &str) -> DeviceTree {
        let mut devices = IndexMap::clone(self.map());
        let mut changed = false;
        let mut visited = HashSet::new();
        let mut pending = vec![device_id.to_owned()];

        while let Some(id) = pending.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if id != device_id && !devices.contains_key(&id) {
                continue;
            }

            let device = match update_entry(&devices, &id, |d| d.state = DeviceState::Lost) {
                Some(device) => {
                    changed = true;
                    devices.insert(id.clone(), Arc::clone(&device));
                    device
                }
                None => match devices.get(&id) {
                    Some(device) => Arc::clone(device),
                    None => continue,
                },
            };

            trace!(device_id = %id, "marked lost");
            pending.extend(device.children.iter().rev().cloned());
        }

        if changed {
            DeviceTree::from_map(devices)
        } else {
            self.clone()
        }
    }
}

fn merge_description(device: &mut Device, description: &DeviceDescription) {
    device.homie.clone_from(&description.homie);
    device.version = description.version;
    device.name.clone_from(&description.name);
    device.device_type.clone_from(&description.device_type);
    device.children.clone_from(&description.children);
    device.root.clone_from(&description.root);
    device.parent.clone_from(&description.parent);
    device.extensions.clone_from(&description.extensions);
    device.has_loaded_initial_description = true;

    for (node_id, node_description) in &description.nodes {
        if let Some(node) = update_entry(&device.nodes, node_id, |node| {
            merge_node(node, node_description);
        }) {
            device.nodes.insert(node_id.clone(), node);
        }
    }
}

fn merge_node(node: &mut Node, description: &NodeDescription) {
    node.name.clone_from(&description.name);
    node.node_type.clone_from(&description.node_type);

    for (property_id, property_description) in &description.properties {
        if let Some(property) = update_entry(&node.properties, property_id, |property| {
            merge_property(property, property_description);
        }) {
            node.properties.insert(property_id.clone(), property);
        }
    }
}

// `value` and `target` are left as observed.
fn merge_property(property: &mut Property, description: &PropertyDescription) {
    property.name.clone_from(&description.name);
    property.datatype = description.datatype;
    property.format.clone_from(&description.format);
    property.settable = description.settable;
    property.retained = description.retained;
    property.unit.clone_from(&description.unit);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::decode;
    use crate::model::Datatype;
    use pretty_assertions::assert_eq;

    fn value(device: &str, node: &str, property: &str, value: &str) -> HomieEvent {
        HomieEvent::PropertyValue {
            path: PropertyPath::new(device, node, property),
            value: value.into(),
        }
    }

    fn state(device: &str, state: DeviceState) -> HomieEvent {
        HomieEvent::DeviceState {
            device_id: device.into(),
            state,
        }
    }

    fn description(device: &str, json: &str) -> HomieEvent {
        decode(&format!("homie/5/{device}/$description"), json.as_bytes()).unwrap()
    }

    #[test]
    fn value_creates_bare_placeholders() {
        let tree = DeviceTree::new().apply(&value("dev1", "node1", "prop1", "42"));

        let device = tree.get("dev1").unwrap();
        assert_eq!(device.state, DeviceState::Init);
        assert!(!device.has_loaded_initial_description);

        let property = device.property("node1", "prop1").unwrap();
        assert_eq!(property.value.as_deref(), Some("42"));
        assert_eq!(property.target, None);
        assert_eq!(property.datatype, Datatype::String);
    }

    #[test]
    fn value_and_target_are_independent() {
        let tree = DeviceTree::new()
            .apply(&value("d", "n", "p", "1"))
            .apply(&HomieEvent::PropertyTarget {
                path: PropertyPath::new("d", "n", "p"),
                value: "2".into(),
            });
        let property = tree.property(&PropertyPath::new("d", "n", "p")).unwrap();
        assert_eq!(property.value.as_deref(), Some("1"));
        assert_eq!(property.target.as_deref(), Some("2"));
    }

    #[test]
    fn sibling_devices_keep_identity() {
        let tree = DeviceTree::new()
            .apply(&value("a", "n", "p", "1"))
            .apply(&value("b", "n", "p", "1"));

        let next = tree.apply(&value("a", "n", "p", "2"));

        assert!(!next.ptr_eq(&tree));
        assert!(Arc::ptr_eq(tree.get("b").unwrap(), next.get("b").unwrap()));
        assert!(!Arc::ptr_eq(tree.get("a").unwrap(), next.get("a").unwrap()));
    }

    #[test]
    fn sibling_nodes_and_properties_keep_identity() {
        let tree = DeviceTree::new()
            .apply(&value("d", "n1", "p", "1"))
            .apply(&value("d", "n2", "p", "1"))
            .apply(&value("d", "n2", "q", "1"));

        let next = tree.apply(&value("d", "n2", "p", "2"));
        let before = tree.get("d").unwrap();
        let after = next.get("d").unwrap();

        assert!(Arc::ptr_eq(before.node("n1").unwrap(), after.node("n1").unwrap()));
        assert!(Arc::ptr_eq(
            before.property("n2", "q").unwrap(),
            after.property("n2", "q").unwrap()
        ));
        assert!(!Arc::ptr_eq(
            before.property("n2", "p").unwrap(),
            after.property("n2", "p").unwrap()
        ));
    }

    #[test]
    fn repeated_value_returns_same_root() {
        let tree = DeviceTree::new().apply(&value("d", "n", "p", "1"));
        assert!(tree.apply(&value("d", "n", "p", "1")).ptr_eq(&tree));
    }

    #[test]
    fn identical_description_is_a_no_op() {
        let json = r#"{"homie":"5.0","version":1,"name":"Lamp","nodes":{"light":{"name":"Light","properties":{"on":{"datatype":"boolean","settable":true}}}}}"#;
        let tree = DeviceTree::new().apply(&description("lamp", json));
        let again = tree.apply(&description("lamp", json));
        assert!(again.ptr_eq(&tree));
    }

    #[test]
    fn description_change_only_renews_changed_node() {
        let v1 = r#"{"version":1,"name":"D","nodes":{"a":{"name":"A","properties":{}},"b":{"name":"B","properties":{}}}}"#;
        let v2 = r#"{"version":1,"name":"D","nodes":{"a":{"name":"A","properties":{}},"b":{"name":"B2","properties":{}}}}"#;
        let tree = DeviceTree::new().apply(&description("d", v1));
        let next = tree.apply(&description("d", v2));

        let before = tree.get("d").unwrap();
        let after = next.get("d").unwrap();
        assert!(Arc::ptr_eq(before.node("a").unwrap(), after.node("a").unwrap()));
        assert_eq!(after.node("b").unwrap().name.as_deref(), Some("B2"));
    }

    #[test]
    fn description_merge_preserves_observed_value() {
        let tree = DeviceTree::new()
            .apply(&value("d", "n", "p", "5"))
            .apply(&description(
                "d",
                r#"{"version":2,"name":"Sensor","nodes":{"n":{"properties":{"p":{"name":"Temp","datatype":"integer","unit":"°C"}}}}}"#,
            ));

        let device = tree.get("d").unwrap();
        assert!(device.has_loaded_initial_description);
        assert_eq!(device.name, "Sensor");
        assert_eq!(device.version, 2);

        let property = device.property("n", "p").unwrap();
        assert_eq!(property.value.as_deref(), Some("5"));
        assert_eq!(property.datatype, Datatype::Integer);
        assert_eq!(property.name.as_deref(), Some("Temp"));
    }

    #[test]
    fn description_does_not_remove_unlisted_nodes() {
        let tree = DeviceTree::new()
            .apply(&value("d", "old", "p", "1"))
            .apply(&description("d", r#"{"nodes":{"new":{"properties":{}}}}"#));
        let device = tree.get("d").unwrap();
        assert!(device.node("old").is_some());
        assert!(device.node("new").is_some());
    }

    #[test]
    fn description_overwrites_device_attributes() {
        let tree = DeviceTree::new()
            .apply(&description("d", r#"{"name":"One","children":["c1"],"parent":"p"}"#))
            .apply(&description("d", r#"{"name":"Two"}"#));
        let device = tree.get("d").unwrap();
        assert_eq!(device.name, "Two");
        assert!(device.children.is_empty());
        assert_eq!(device.parent, None);
    }

    #[test]
    fn lost_propagates_through_children() {
        let tree = DeviceTree::new()
            .apply(&description("root", r#"{"children":["childA"]}"#))
            .apply(&description("childA", r#"{"children":["childB"]}"#))
            .apply(&description("childB", "{}"))
            .apply(&description("other", "{}"))
            .apply(&state("root", DeviceState::Ready))
            .apply(&state("childA", DeviceState::Ready))
            .apply(&state("childB", DeviceState::Ready))
            .apply(&state("other", DeviceState::Ready));

        let next = tree.apply(&state("root", DeviceState::Lost));

        for id in ["root", "childA", "childB"] {
            assert_eq!(next.get(id).unwrap().state, DeviceState::Lost, "{id}");
        }
        assert_eq!(next.get("other").unwrap().state, DeviceState::Ready);
        assert!(Arc::ptr_eq(tree.get("other").unwrap(), next.get("other").unwrap()));
    }

    #[test]
    fn lost_skips_unknown_children() {
        let tree = DeviceTree::new()
            .apply(&description("root", r#"{"children":["ghost"]}"#))
            .apply(&state("root", DeviceState::Lost));
        assert_eq!(tree.get("root").unwrap().state, DeviceState::Lost);
        assert!(!tree.contains("ghost"));
    }

    #[test]
    fn lost_creates_unknown_device() {
        let tree = DeviceTree::new().apply(&state("new", DeviceState::Lost));
        assert_eq!(tree.get("new").unwrap().state, DeviceState::Lost);
    }

    #[test]
    fn lost_survives_child_cycles() {
        let tree = DeviceTree::new()
            .apply(&description("a", r#"{"children":["b"]}"#))
            .apply(&description("b", r#"{"children":["a"]}"#))
            .apply(&state("a", DeviceState::Lost));
        assert_eq!(tree.get("a").unwrap().state, DeviceState::Lost);
        assert_eq!(tree.get("b").unwrap().state, DeviceState::Lost);

        let again = tree.apply(&state("a", DeviceState::Lost));
        assert!(again.ptr_eq(&tree));
    }

    #[test]
    fn set_and_error_are_never_applied() {
        let tree = DeviceTree::new().apply(&value("d", "n", "p", "1"));
        let set = HomieEvent::PropertySet {
            path: PropertyPath::new("d", "n", "p"),
            value: "9".into(),
        };
        let error = HomieEvent::Error {
            message: "bad".into(),
        };
        assert!(tree.apply(&set).ptr_eq(&tree));
        assert!(tree.apply(&error).ptr_eq(&tree));
    }

    #[test]
    fn devices_keep_first_seen_order() {
        let tree = DeviceTree::new().apply_all(&[
            state("z", DeviceState::Ready),
            state("a", DeviceState::Ready),
            state("m", DeviceState::Init),
            state("z", DeviceState::Sleeping),
        ]);
        assert_eq!(tree.device_ids().collect::<Vec<_>>(), vec!["z", "a", "m"]);
    }

    #[test]
    fn node_description_defaults_merge_cleanly() {
        let mut node = Node::default();
        merge_node(&mut node, &NodeDescription::default());
        assert!(node.properties.is_empty());
    }
}
