// ── Homie v5 `$description` document ──
//
// Deserialized leniently: a missing or mistyped field falls back to its
// default and a malformed node or property entry is skipped, so one bad
// field never hides the rest of the device. Unknown fields are ignored.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::value::Datatype;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(default = "default_homie", deserialize_with = "lenient_homie")]
    pub homie: String,
    #[serde(default, deserialize_with = "lenient")]
    pub version: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub children: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub root: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub extensions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub nodes: IndexMap<String, NodeDescription>,
}

impl DeviceDescription {
    /// Read any JSON document as a description. Anything other than an
    /// object yields the empty description.
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            serde_json::from_value(value).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            homie: default_homie(),
            version: 0,
            name: String::new(),
            device_type: None,
            children: Vec::new(),
            root: None,
            parent: None,
            extensions: None,
            nodes: IndexMap::new(),
        }
    }
}

fn default_homie() -> String {
    "5.0".into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub node_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub properties: IndexMap<String, PropertyDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescription {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub datatype: Datatype,
    #[serde(default, deserialize_with = "lenient")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub settable: bool,
    #[serde(default = "default_retained", deserialize_with = "lenient_retained")]
    pub retained: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub unit: Option<String>,
}

impl Default for PropertyDescription {
    fn default() -> Self {
        Self {
            name: None,
            datatype: Datatype::default(),
            format: None,
            settable: false,
            retained: true,
            unit: None,
        }
    }
}

fn default_retained() -> bool {
    true
}

// ── Lenient field readers ──

fn recover<'de, D, T>(deserializer: D, fallback: impl FnOnce() -> T) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| fallback()))
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    recover(deserializer, T::default)
}

fn lenient_homie<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    recover(deserializer, default_homie)
}

fn lenient_retained<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    recover(deserializer, default_retained)
}

/// Map of child descriptions; entries that are not objects are dropped.
fn lenient_entries<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        return Ok(IndexMap::new());
    };
    Ok(entries
        .into_iter()
        .filter(|(_, value)| value.is_object())
        .filter_map(|(id, value)| serde_json::from_value(value).ok().map(|entry| (id, entry)))
        .collect())
}
