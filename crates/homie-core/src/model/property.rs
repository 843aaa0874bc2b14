// ── Property domain type ──

use serde::{Deserialize, Serialize};

use super::value::{self, Datatype, PropertyFormat, TypedValue, ValueError};

/// A single property of a node.
///
/// `value` and `target` hold the raw text last received on
/// `<ns>/5/<device>/<node>/<property>` and `.../$target`. They are set
/// independently of each other and of the description fields, so a
/// re-announced description never clears an observed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: Option<String>,
    pub datatype: Datatype,
    pub format: Option<String>,
    pub settable: bool,
    pub retained: bool,
    pub unit: Option<String>,
    pub value: Option<String>,
    pub target: Option<String>,
}

impl Default for Property {
    fn default() -> Self {
        Self {
            name: None,
            datatype: Datatype::default(),
            format: None,
            settable: false,
            retained: true,
            unit: None,
            value: None,
            target: None,
        }
    }
}

impl Property {
    pub fn parsed_format(&self) -> PropertyFormat {
        PropertyFormat::parse(self.datatype, self.format.as_deref())
    }

    /// The current value interpreted per `datatype`. `None` until a value
    /// has been received.
    pub fn typed_value(&self) -> Option<Result<TypedValue, ValueError>> {
        self.value
            .as_deref()
            .map(|raw| value::parse_value(self.datatype, raw))
    }

    pub fn typed_target(&self) -> Option<Result<TypedValue, ValueError>> {
        self.target
            .as_deref()
            .map(|raw| value::parse_value(self.datatype, raw))
    }

    /// Check a value before publishing it as a `set` command.
    pub fn validate(&self, input: &str) -> Result<TypedValue, ValueError> {
        value::validate_value(self.datatype, &self.parsed_format(), input)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn typed_value_follows_datatype() {
        let prop = Property {
            datatype: Datatype::Integer,
            value: Some("5".into()),
            ..Property::default()
        };
        assert_eq!(prop.typed_value().unwrap().unwrap(), TypedValue::Integer(5));
        assert!(prop.typed_target().is_none());
    }

    #[test]
    fn validate_uses_format() {
        let prop = Property {
            datatype: Datatype::Enum,
            format: Some("red,green".into()),
            settable: true,
            ..Property::default()
        };
        assert!(prop.validate("green").is_ok());
        assert!(prop.validate("blue").is_err());
    }
}
