//! Named value transforms applied to extracted response fields.
//!
//! Configuration only ever refers to a transform by name. Names are checked
//! against the registry when the catalog is compiled, so an unknown name fails
//! at load time rather than in the middle of an aggregation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::mapping::path::kind_of;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("unknown transform `{name}`")]
    UnknownTransform { name: String },
    #[error("transform `{name}` failed: {detail}")]
    TransformFailed { name: String, detail: String },
}

pub trait ValueTransform: Send + Sync {
    fn apply(&self, value: &Value) -> Result<Value, String>;
}

impl<F> ValueTransform for F
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    fn apply(&self, value: &Value) -> Result<Value, String> {
        self(value)
    }
}

pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn ValueTransform>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry").field("names", &self.names()).finish()
    }
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self { transforms: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("identity", identity);
        registry.register("toFloat", to_float);
        registry.register("parseFloat", to_float);
        registry.register("toInt", to_int);
        registry.register("parseInt", to_int);
        registry.register("toUpper", to_upper);
        registry.register("toLower", to_lower);
        registry.register("trim", trim);
        registry.register("toString", to_string);
        registry
    }

    /// Registers (or replaces) a transform under `name`.
    pub fn register<T>(&mut self, name: impl Into<String>, transform: T)
    where
        T: ValueTransform + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn apply(&self, name: &str, value: &Value) -> Result<Value, TransformError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| TransformError::UnknownTransform { name: name.to_string() })?;

        transform
            .apply(value)
            .map_err(|detail| TransformError::TransformFailed { name: name.to_string(), detail })
    }
}

fn identity(value: &Value) -> Result<Value, String> {
    Ok(value.clone())
}

/// Locale-agnostic decimal parse. Grouping separators and trailing garbage are rejected.
fn to_float(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        other => return Err(format!("expected a number or numeric string, found {}", kind_of(other))),
    };

    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("`{}` is not a finite decimal number", display(value)))
}

/// Integer parse. Decimal input is truncated toward zero (`"36.9"` becomes `36`),
/// so this transform narrows values on purpose.
fn to_int(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().and_then(truncate)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| text.parse::<f64>().ok().and_then(truncate))
        }
        other => return Err(format!("expected a number or numeric string, found {}", kind_of(other))),
    };

    parsed
        .map(|integer| Value::Number(integer.into()))
        .ok_or_else(|| format!("`{}` is not an integer-convertible number", display(value)))
}

fn truncate(value: f64) -> Option<i64> {
    let truncated = value.trunc();
    let in_range = value.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64;
    in_range.then_some(truncated as i64)
}

fn to_upper(value: &Value) -> Result<Value, String> {
    with_text(value, |text| text.to_uppercase())
}

fn to_lower(value: &Value) -> Result<Value, String> {
    with_text(value, |text| text.to_lowercase())
}

fn trim(value: &Value) -> Result<Value, String> {
    with_text(value, |text| text.trim().to_string())
}

fn to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(text) => Ok(Value::String(text.clone())),
        Value::Number(number) => Ok(Value::String(number.to_string())),
        Value::Bool(flag) => Ok(Value::String(flag.to_string())),
        other => Err(format!("cannot convert {} to text", kind_of(other))),
    }
}

fn with_text(value: &Value, apply: impl Fn(&str) -> String) -> Result<Value, String> {
    match value {
        Value::String(text) => Ok(Value::String(apply(text))),
        other => Err(format!("expected a string, found {}", kind_of(other))),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
