// ── Homie v5 topic grammar ──
//
// Turns a raw `(topic, payload)` pair into a typed event. Topics look like
// `<root>/<version>/<device>/<node-or-attr>/<property?>/<set-or-target?>`.
// Decoding never fails loudly: malformed payloads become
// `HomieEvent::Error` values, unrelated topics become `None`.

use std::str::{self, FromStr};

use crate::model::{DeviceDescription, DeviceState, PropertyPath};

const STATE_ATTR: &str = "$state";
const DESCRIPTION_ATTR: &str = "$description";
const SET_SUFFIX: &str = "set";
const TARGET_SUFFIX: &str = "$target";

/// A decoded broker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomieEvent {
    DeviceState {
        device_id: String,
        state: DeviceState,
    },
    DeviceDescription {
        device_id: String,
        description: Box<DeviceDescription>,
    },
    /// A `set` command seen on the wire. Never applied to the tree.
    PropertySet { path: PropertyPath, value: String },
    PropertyTarget { path: PropertyPath, value: String },
    PropertyValue { path: PropertyPath, value: String },
    /// Diagnostic for a payload that could not be decoded.
    Error { message: String },
}

impl HomieEvent {
    /// The device this event refers to, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::DeviceState { device_id, .. } | Self::DeviceDescription { device_id, .. } => {
                Some(device_id)
            }
            Self::PropertySet { path, .. }
            | Self::PropertyTarget { path, .. }
            | Self::PropertyValue { path, .. } => Some(&path.device_id),
            Self::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Decode one broker message.
///
/// Returns `None` for topics outside the modelled subset (e.g. standalone
/// `$name` attributes) and for topics too short to name a device.
pub fn decode(topic: &str, payload: &[u8]) -> Option<HomieEvent> {
    let mut segments = topic.split('/');
    let _root = segments.next();
    let _version = segments.next();
    let device_id = segments.next().filter(|s| !s.is_empty())?;
    let node_or_attr = segments.next()?;
    let property_id = segments.next();
    let suffix = segments.next();

    match node_or_attr {
        STATE_ATTR => return Some(decode_state(device_id, payload)),
        DESCRIPTION_ATTR => return Some(decode_description(device_id, payload)),
        _ => {}
    }

    let property_id = property_id.filter(|s| !s.is_empty())?;
    if node_or_attr.is_empty() {
        return None;
    }

    let path = PropertyPath::new(device_id, node_or_attr, property_id);
    let value = match text(payload) {
        Ok(value) => value,
        Err(event) => return Some(event),
    };

    match suffix {
        Some(SET_SUFFIX) => Some(HomieEvent::PropertySet { path, value }),
        Some(TARGET_SUFFIX) => Some(HomieEvent::PropertyTarget { path, value }),
        None => Some(HomieEvent::PropertyValue { path, value }),
        Some(_) => None,
    }
}

fn text(payload: &[u8]) -> Result<String, HomieEvent> {
    str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|e| HomieEvent::error(format!("Payload is not valid UTF-8: {e}")))
}

fn decode_state(device_id: &str, payload: &[u8]) -> HomieEvent {
    let raw = match text(payload) {
        Ok(raw) => raw,
        Err(event) => return event,
    };

    match DeviceState::from_str(&raw) {
        Ok(state) => HomieEvent::DeviceState {
            device_id: device_id.to_owned(),
            state,
        },
        Err(_) => HomieEvent::error(format!("Invalid device state: {raw}")),
    }
}

fn decode_description(device_id: &str, payload: &[u8]) -> HomieEvent {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(document) => HomieEvent::DeviceDescription {
            device_id: device_id.to_owned(),
            description: Box::new(DeviceDescription::from_value(document)),
        },
        Err(e) => HomieEvent::error(format!("Invalid JSON description for {device_id}: {e}")),
    }
}
