use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::error::{CoreError, CoreResult};

/// Tool arguments as assembled from streamed fragments.
///
/// Models drift: objects arrive JSON-encoded inside strings, numbers arrive
/// as `"42"` or `12.0`. Accessors normalise that drift and report anything
/// else as a validation error.
#[derive(Debug, Clone, Default)]
pub struct ParsedToolArgs {
    map: Map<String, Value>,
    literal: Option<String>,
}

impl ParsedToolArgs {
    /// Parse the concatenated argument fragments of one tool call.
    pub fn from_raw(raw: &str) -> CoreResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("arguments are not valid JSON: {e}")))?;
        Self::new(&value)
    }

    pub fn new(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                map: map.clone(),
                literal: None,
            }),
            Value::Null => Ok(Self::default()),
            Value::String(raw) => {
                if raw.trim().is_empty() {
                    return Ok(Self::default());
                }
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => Ok(Self { map, literal: None }),
                    Ok(Value::String(inner)) => Ok(Self {
                        map: Map::new(),
                        literal: Some(inner),
                    }),
                    _ => Ok(Self {
                        map: Map::new(),
                        literal: Some(raw.clone()),
                    }),
                }
            }
            Value::Number(number) => Ok(Self {
                map: Map::new(),
                literal: Some(number.to_string()),
            }),
            Value::Bool(flag) => Ok(Self {
                map: Map::new(),
                literal: Some(flag.to_string()),
            }),
            Value::Array(_) => Err(CoreError::Validation(
                "arguments must be a JSON object or string".into(),
            )),
        }
    }

    /// Arguments echoed into the invocation record.
    pub fn to_value(&self) -> Value {
        match &self.literal {
            Some(literal) if self.map.is_empty() => Value::String(literal.clone()),
            _ => Value::Object(self.map.clone()),
        }
    }

    /// Deserialize the object form into a typed argument struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(Value::Object(self.map.clone()))
            .map_err(|e| CoreError::Validation(format!("invalid arguments: {e}")))
    }

    pub fn get_string(&self, key: &str) -> CoreResult<Option<String>> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };

        match value {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text.clone())),
            Value::Number(number) => Ok(Some(number.to_string())),
            Value::Bool(value) => Ok(Some(value.to_string())),
            _ => Err(CoreError::Validation(format!("{key} must be a string"))),
        }
    }

    /// A non-blank string argument; the literal form counts for `key` when
    /// the model sent a bare string.
    pub fn require_string(&self, key: &str) -> CoreResult<String> {
        let value = match self.get_string(key)? {
            Some(value) => Some(value),
            None if self.map.is_empty() => self.literal.clone(),
            None => None,
        };
        value
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CoreError::Validation(format!("{key} required")))
    }

    pub fn get_usize(&self, key: &str) -> CoreResult<Option<usize>> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }

        let Some(parsed_u64) = parse_u64(value) else {
            return Err(CoreError::Validation(format!(
                "{key} must be a non-negative integer"
            )));
        };
        let parsed = usize::try_from(parsed_u64)
            .map_err(|_| CoreError::Validation(format!("{key} is too large for this platform")))?;
        Ok(Some(parsed))
    }

    pub fn get_string_list(&self, key: &str) -> CoreResult<Option<Vec<String>>> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    _ => Err(CoreError::Validation(format!(
                        "{key} must be a list of strings"
                    ))),
                })
                .collect::<CoreResult<Vec<_>>>()
                .map(Some),
            Value::String(text) => match serde_json::from_str::<Vec<String>>(text) {
                Ok(items) => Ok(Some(items)),
                Err(_) => Ok(Some(vec![text.clone()])),
            },
            _ => Err(CoreError::Validation(format!(
                "{key} must be a list of strings"
            ))),
        }
    }
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number_as_u64(number),
        Value::String(text) => parse_u64_string(text),
        _ => None,
    }
}

fn number_as_u64(number: &Number) -> Option<u64> {
    number
        .as_u64()
        .or_else(|| number.as_i64().and_then(|value| u64::try_from(value).ok()))
        .or_else(|| number.as_f64().and_then(float_as_u64))
}

fn parse_u64_string(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Some(value);
    }
    trimmed.parse::<f64>().ok().and_then(float_as_u64)
}

fn float_as_u64(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return None;
    }
    u64::try_from(value as u128).ok()
}
