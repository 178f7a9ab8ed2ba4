//! The closed value type that tool arguments are converted into.
//!
//! Backends hand us arbitrary JSON. Before a handler sees it, the dispatcher
//! converts it into [`ToolArgs`], rejecting anything outside the five kinds a
//! [`ToolArgument`](crate::tool::ToolArgument) can declare.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tool::ArgumentType;

/// A single argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    pub fn kind(&self) -> ArgumentType {
        match self {
            Self::Bool(_) => ArgumentType::Boolean,
            Self::Number(_) => ArgumentType::Number,
            Self::String(_) => ArgumentType::String,
            Self::Array(_) => ArgumentType::Array,
            Self::Object(_) => ArgumentType::Object,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a JSON value, naming the offending location on failure.
    fn from_json(value: serde_json::Value, path: &str) -> Result<Self, ArgError> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => return Err(ArgError::Null { path: path.into() }),
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => {
                    return Err(ArgError::Unrepresentable {
                        path: path.into(),
                        value: n.to_string(),
                    });
                }
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Self::from_json(v, &format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let child = format!("{path}.{k}");
                        Self::from_json(v, &child).map(|v| (k, v))
                    })
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl From<ArgValue> for serde_json::Value {
    fn from(value: ArgValue) -> Self {
        match value {
            ArgValue::Bool(b) => Self::Bool(b),
            ArgValue::Number(n) => serde_json::Number::from_f64(n)
                .map(Self::Number)
                .unwrap_or(Self::Null),
            ArgValue::String(s) => Self::String(s),
            ArgValue::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            ArgValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Why a set of arguments could not be used. The `Display` text is written
/// for the model: it says which argument is wrong and what was expected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("argument '{path}' is null; omit it or pass a value")]
    Null { path: String },

    #[error("argument '{path}' has a number that cannot be represented: {value}")]
    Unrepresentable { path: String, value: String },

    #[error("missing required argument '{name}'")]
    Missing { name: String },

    #[error("argument '{name}' must be {expected}, got {found}")]
    WrongType {
        name: String,
        expected: ArgumentType,
        found: ArgumentType,
    },

    #[error("argument '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// Named arguments for one tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(BTreeMap<String, ArgValue>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a raw JSON object coming from a backend.
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self, ArgError> {
        map.iter()
            .map(|(k, v)| ArgValue::from_json(v.clone(), k).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    /// Convert any JSON value; only objects are accepted.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ArgError> {
        match value {
            serde_json::Value::Object(map) => Self::from_json_map(&map),
            other => Err(ArgError::NotAnObject {
                found: json_kind(&other).into(),
            }),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.0.iter()
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ArgError> {
        match self.0.get(name) {
            None => Err(ArgError::Missing { name: name.into() }),
            Some(v) => v.as_str().ok_or_else(|| wrong(name, ArgumentType::String, v)),
        }
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ArgError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| wrong(name, ArgumentType::String, v)),
        }
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, ArgError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| wrong(name, ArgumentType::Boolean, v)),
        }
    }

    /// A non-negative whole number.
    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, ArgError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => {
                let n = v
                    .as_f64()
                    .ok_or_else(|| wrong(name, ArgumentType::Number, v))?;
                // `u64::MAX as f64` rounds up to 2^64, which does not fit.
                if n < 0.0 || n.fract() != 0.0 || n >= u64::MAX as f64 {
                    return Err(ArgError::Invalid {
                        name: name.into(),
                        reason: format!("expected a non-negative whole number, got {n}"),
                    });
                }
                Ok(Some(n as u64))
            }
        }
    }
}

impl FromIterator<(String, ArgValue)> for ToolArgs {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn wrong(name: &str, expected: ArgumentType, found: &ArgValue) -> ArgError {
    ArgError::WrongType {
        name: name.into(),
        expected,
        found: found.kind(),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_json() {
        let args = ToolArgs::from_json(json!({
            "path": "src/main.rs",
            "limit": 20,
            "flags": [true, "x"],
            "opts": {"depth": 2}
        }))
        .unwrap();
        assert_eq!(args.require_str("path").unwrap(), "src/main.rs");
        assert_eq!(args.optional_u64("limit").unwrap(), Some(20));
        assert_eq!(args.get("flags").unwrap().kind(), ArgumentType::Array);
        assert_eq!(args.get("opts").unwrap().kind(), ArgumentType::Object);
    }

    #[test]
    fn null_is_rejected_with_its_location() {
        let err = ToolArgs::from_json(json!({"opts": {"depth": null}})).unwrap_err();
        assert_eq!(err, ArgError::Null { path: "opts.depth".into() });
        assert!(err.to_string().contains("opts.depth"));
    }

    #[test]
    fn non_object_is_rejected() {
        let err = ToolArgs::from_json(json!(["a"])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn typed_accessors_report_actionable_errors() {
        let args = ToolArgs::from_json(json!({"path": 3, "limit": -1, "all": "yes"})).unwrap();
        assert!(args.require_str("path").unwrap_err().to_string().contains("must be string"));
        assert!(args.require_str("nope").unwrap_err().to_string().contains("missing"));
        assert!(matches!(
            args.optional_u64("limit").unwrap_err(),
            ArgError::Invalid { .. }
        ));
        assert!(args.optional_bool("all").is_err());
        assert_eq!(args.optional_bool("absent").unwrap(), None);
    }

    #[test]
    fn u64_range_is_enforced() {
        let args = ToolArgs::new()
            .with("edge", ArgValue::Number(18446744073709551616.0))
            .with("huge", ArgValue::Number(1e30))
            .with("big", ArgValue::Number(9007199254740992.0));
        assert!(matches!(args.optional_u64("edge").unwrap_err(), ArgError::Invalid { .. }));
        assert!(matches!(args.optional_u64("huge").unwrap_err(), ArgError::Invalid { .. }));
        assert_eq!(args.optional_u64("big").unwrap(), Some(9_007_199_254_740_992));
    }

    #[test]
    fn back_to_json() {
        let args = ToolArgs::new()
            .with("a", ArgValue::Number(1.5))
            .with("b", ArgValue::Array(vec![ArgValue::Bool(false)]));
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value, json!({"a": 1.5, "b": [false]}));
        let json: serde_json::Value = ArgValue::String("x".into()).into();
        assert_eq!(json, json!("x"));
    }
}
