//! Hyperparameter maps
//!
//! Hyperparameters arrive as a JSON object. Each trainer declares the keys
//! it understands; anything else, or a value of the wrong type, is a
//! `Config` error raised before fitting starts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object of hyperparameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(Map<String, Value>);

impl Hyperparameters {
    /// Empty map (all defaults).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// From a JSON value; `null` means defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` unless the value is an object or `null`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(Error::Config(format!(
                "hyperparameters must be a JSON object, got {other}"
            ))),
        }
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Json` on malformed text and `Config` for non-objects.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Set a key (builder style).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// True when no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject keys outside `allowed`.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first unsupported key.
    pub fn check_keys(&self, model: &str, allowed: &[&str]) -> Result<()> {
        match self.0.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(Error::Config(format!(
                "unsupported hyperparameter '{key}' for {model} (expected one of: {})",
                allowed.join(", ")
            ))),
            None => Ok(()),
        }
    }

    /// First present key among `keys` (aliases).
    fn lookup<'a, 'k>(&'a self, keys: &[&'k str]) -> Option<(&'k str, &'a Value)> {
        keys.iter().find_map(|k| self.0.get(*k).map(|v| (*k, v)))
    }

    /// Non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the value is not a non-negative integer.
    pub fn usize(&self, keys: &[&str]) -> Result<Option<usize>> {
        self.lookup(keys)
            .map(|(key, value)| {
                value
                    .as_u64()
                    .and_then(|v| usize::try_from(v).ok())
                    .ok_or_else(|| ill_typed(key, "a non-negative integer", value))
            })
            .transpose()
    }

    /// Finite number.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the value is not a number.
    pub fn f64(&self, keys: &[&str]) -> Result<Option<f64>> {
        self.lookup(keys)
            .map(|(key, value)| {
                value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ill_typed(key, "a number", value))
            })
            .transpose()
    }

    /// String.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the value is not a string.
    pub fn str(&self, keys: &[&str]) -> Result<Option<&str>> {
        self.lookup(keys)
            .map(|(key, value)| value.as_str().ok_or_else(|| ill_typed(key, "a string", value)))
            .transpose()
    }

    /// Fixed-length array of non-negative integers, e.g. `order: [1, 1, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `Config` on wrong length or element type.
    pub fn usize_array<const N: usize>(&self, keys: &[&str]) -> Result<Option<[usize; N]>> {
        let Some((key, value)) = self.lookup(keys) else {
            return Ok(None);
        };
        let expected = format!("an array of {N} non-negative integers");
        let items = value
            .as_array()
            .filter(|items| items.len() == N)
            .ok_or_else(|| ill_typed(key, &expected, value))?;
        let mut out = [0_usize; N];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = item
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| ill_typed(key, &expected, value))?;
        }
        Ok(Some(out))
    }

    /// Presence check for keys that are accepted but have no effect.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

fn ill_typed(key: &str, expected: &str, got: &Value) -> Error {
    Error::Config(format!("hyperparameter '{key}' must be {expected}, got {got}"))
}
