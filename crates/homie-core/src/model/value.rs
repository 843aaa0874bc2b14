// ── Datatypes, formats and typed values ──
//
// Property payloads are stored as the text received from the broker. This
// module interprets that text according to the declared datatype and
// format, both for display and for validating values before a `set`.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Homie v5 property datatype.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Datatype {
    #[default]
    String,
    Float,
    Integer,
    Enum,
    Color,
    Boolean,
    Datetime,
    Duration,
    Json,
}

impl Datatype {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Integer)
    }
}

/// Interpretation of a property's `format` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFormat {
    /// No format declared.
    Unspecified,
    /// `min:max[:step]` for `integer` / `float`. Every bound is optional.
    Range {
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
    /// Comma separated options for `enum`.
    Options(Vec<String>),
    /// Supported color spaces for `color` (`rgb`, `hsv`, `xyz`).
    ColorSpaces(Vec<String>),
    /// `false,true` labels for `boolean`.
    BooleanLabels { off: String, on: String },
    /// A format this client does not interpret.
    Raw(String),
}

impl PropertyFormat {
    pub fn parse(datatype: Datatype, format: Option<&str>) -> Self {
        let Some(raw) = format.map(str::trim).filter(|f| !f.is_empty()) else {
            return Self::Unspecified;
        };

        match datatype {
            Datatype::Integer | Datatype::Float => {
                parse_range(raw).unwrap_or_else(|| Self::Raw(raw.to_owned()))
            }
            Datatype::Enum => Self::Options(split_list(raw)),
            Datatype::Color => Self::ColorSpaces(split_list(raw)),
            Datatype::Boolean => match split_list(raw).as_slice() {
                [off, on] => Self::BooleanLabels {
                    off: off.clone(),
                    on: on.clone(),
                },
                _ => Self::Raw(raw.to_owned()),
            },
            _ => Self::Raw(raw.to_owned()),
        }
    }

    pub fn options(&self) -> Option<&[String]> {
        match self {
            Self::Options(opts) => Some(opts),
            _ => None,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_range(raw: &str) -> Option<PropertyFormat> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let bound = |s: &str| -> Option<Option<f64>> {
        let s = s.trim();
        if s.is_empty() {
            Some(None)
        } else {
            s.parse::<f64>().ok().map(Some)
        }
    };

    let min = bound(parts.first()?)?;
    let max = bound(parts.get(1)?)?;
    let step = match parts.get(2) {
        Some(s) => bound(s)?,
        None => None,
    };

    Some(PropertyFormat::Range { min, max, step })
}

/// A property payload interpreted according to its datatype.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    String(String),
    Float(f64),
    Integer(i64),
    Enum(String),
    Color(String),
    Boolean(bool),
    DateTime(DateTime<FixedOffset>),
    Duration(String),
    Json(serde_json::Value),
}

impl TypedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Enum(s) | Self::Color(s) | Self::Duration(s) => {
                write!(f, "{s}")
            }
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Why a payload does not fit a property's datatype or format.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("'{input}' is not a valid {datatype} value")]
    Malformed { datatype: Datatype, input: String },

    #[error("'{input}' is not one of: {}", options.join(", "))]
    NotAnOption { input: String, options: Vec<String> },

    #[error("{value} is outside the range {}", describe_range(*min, *max))]
    OutOfRange {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
}

fn describe_range(min: Option<f64>, max: Option<f64>) -> String {
    let fmt_bound = |b: Option<f64>| b.map_or_else(String::new, |v| v.to_string());
    format!("{}:{}", fmt_bound(min), fmt_bound(max))
}

/// Interpret `raw` according to `datatype`.
pub fn parse_value(datatype: Datatype, raw: &str) -> Result<TypedValue, ValueError> {
    let malformed = || ValueError::Malformed {
        datatype,
        input: raw.to_owned(),
    };

    match datatype {
        Datatype::String => Ok(TypedValue::String(raw.to_owned())),
        Datatype::Enum => Ok(TypedValue::Enum(raw.to_owned())),
        Datatype::Color => Ok(TypedValue::Color(raw.to_owned())),
        Datatype::Duration => Ok(TypedValue::Duration(raw.to_owned())),
        Datatype::Float => raw
            .trim()
            .parse::<f64>()
            .map(TypedValue::Float)
            .map_err(|_| malformed()),
        Datatype::Integer => raw
            .trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| malformed()),
        Datatype::Boolean => match raw {
            "true" => Ok(TypedValue::Boolean(true)),
            "false" => Ok(TypedValue::Boolean(false)),
            _ => Err(malformed()),
        },
        Datatype::Datetime => DateTime::parse_from_rfc3339(raw)
            .map(TypedValue::DateTime)
            .map_err(|_| malformed()),
        Datatype::Json => serde_json::from_str(raw)
            .map(TypedValue::Json)
            .map_err(|_| malformed()),
    }
}

/// Parse `raw` and check it against the declared format.
pub fn validate_value(
    datatype: Datatype,
    format: &PropertyFormat,
    raw: &str,
) -> Result<TypedValue, ValueError> {
    let value = parse_value(datatype, raw)?;

    match (format, &value) {
        (PropertyFormat::Options(options), TypedValue::Enum(s)) if !options.contains(s) => {
            Err(ValueError::NotAnOption {
                input: s.clone(),
                options: options.clone(),
            })
        }
        (PropertyFormat::Range { min, max, .. }, v) => {
            let Some(n) = v.as_f64() else {
                return Ok(value);
            };
            let below = min.is_some_and(|m| n < m);
            let above = max.is_some_and(|m| n > m);
            if below || above {
                Err(ValueError::OutOfRange {
                    value: n,
                    min: *min,
                    max: *max,
                })
            } else {
                Ok(value)
            }
        }
        _ => Ok(value),
    }
}
