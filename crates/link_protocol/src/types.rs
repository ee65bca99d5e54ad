use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::error;

/// Request methods understood by a link responder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Method {
    List,
    Subscribe,
    Unsubscribe,
    Invoke,
    Set,
    Remove,
    Close,
}

/// Lifecycle marker carried by every response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum StreamState {
    Initialize,
    Open,
    Closed,
}

/// Permission levels, lowest first. `Never` outranks everything so that
/// nothing can ever satisfy it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    EnumString,
    AsRefStr,
    Display,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    None,
    List,
    Read,
    Write,
    Config,
    Never,
}

/// Shape of what an action hands back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// A single row.
    #[default]
    Values,
    Table,
    /// Rows keep arriving until the stream is closed.
    Stream,
}

/// Editor hints shown next to an action parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EditorType {
    Textarea,
    Password,
    Daterange,
    Date,
    Color,
}

/// Declared type of a parameter or result column.
///
/// Serialized as the protocol string form: `bool`, `number`, `string`,
/// `map`, `array`, `time`, `dynamic` or `enum[a,b,c]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Number,
    String,
    Map,
    Array,
    Time,
    Dynamic,
    Enum(Vec<String>),
}

impl ValueType {
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::Enum(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("bool"),
            ValueType::Number => f.write_str("number"),
            ValueType::String => f.write_str("string"),
            ValueType::Map => f.write_str("map"),
            ValueType::Array => f.write_str("array"),
            ValueType::Time => f.write_str("time"),
            ValueType::Dynamic => f.write_str("dynamic"),
            ValueType::Enum(values) => write!(f, "enum[{}]", values.join(",")),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(ValueType::Bool),
            "number" => Ok(ValueType::Number),
            "string" => Ok(ValueType::String),
            "map" => Ok(ValueType::Map),
            "array" => Ok(ValueType::Array),
            "time" => Ok(ValueType::Time),
            "dynamic" => Ok(ValueType::Dynamic),
            other => {
                let inner = other
                    .strip_prefix("enum[")
                    .and_then(|rest| rest.strip_suffix(']'));
                match inner {
                    Some(list) => Ok(ValueType::Enum(
                        list.split(',')
                            .map(str::trim)
                            .filter(|v| !v.is_empty())
                            .map(str::to_owned)
                            .collect(),
                    )),
                    None => {
                        error!("unknown value type `{}`", other);
                        Err(format!("unknown value type `{other}`"))
                    }
                }
            }
        }
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
