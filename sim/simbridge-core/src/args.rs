//! Per-session configuration blobs.
//!
//! Every module receives its arguments as a JSON object of string-keyed
//! parameters. Values are read back as strings, so `{"port": 9001}` and
//! `{"port": "9001"}` configure the same session.

use crate::error::ArgError;
use serde_json::{Map, Value};
use std::{fmt::Display, str::FromStr};

#[derive(Debug, Clone)]
pub struct ModuleArgs {
    raw: String,
    object: Map<String, Value>,
}

impl ModuleArgs {
    /// Parses a JSON object.
    pub fn parse(raw: &str) -> Result<Self, ArgError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|_| ArgError::Parse(raw.to_string()))?;
        Self::from_value(value).map_err(|e| match e {
            ArgError::NotObject(_) => ArgError::NotObject(raw.to_string()),
            other => other,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Object(object) => Ok(Self {
                raw: Value::Object(object.clone()).to_string(),
                object,
            }),
            other => Err(ArgError::NotObject(other.to_string())),
        }
    }

    /// The blob these arguments were parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Reads a key, failing with [`ArgError::MissingKey`] if it is absent.
    pub fn get(&self, key: &str) -> Result<String, ArgError> {
        match self.object.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(ArgError::MissingKey(key.to_string())),
        }
    }

    /// Reads a key whose absence is an error. An absent key is reported as
    /// [`ArgError::MissingRequired`], which fails the same way a malformed
    /// blob does.
    pub fn required(&self, key: &str) -> Result<String, ArgError> {
        self.get(key).map_err(|e| match e {
            ArgError::MissingKey(key) => ArgError::MissingRequired(key),
            other => other,
        })
    }

    /// Reads a key whose absence is an expected outcome.
    pub fn optional(&self, key: &str) -> Result<Option<String>, ArgError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ArgError::MissingKey(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn optional_or(&self, key: &str, default: &str) -> Result<String, ArgError> {
        Ok(self.optional(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn parse_required<T>(&self, key: &str) -> Result<T, ArgError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.required(key)?;
        convert(key, value)
    }

    pub fn parse_optional<T>(&self, key: &str) -> Result<Option<T>, ArgError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional(key)?.map(|value| convert(key, value)).transpose()
    }
}

fn convert<T>(key: &str, value: String) -> Result<T, ArgError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| ArgError::Invalid {
        key: key.to_string(),
        value,
        reason: e.to_string(),
    })
}

/// Reads the mandatory `port` key. Port zero is rejected.
pub(crate) fn port(args: &ModuleArgs) -> Result<u16, ArgError> {
    let port: u16 = args.parse_required("port")?;
    if port == 0 {
        Err(ArgError::Invalid {
            key: "port".into(),
            value: "0".into(),
            reason: "Invalid port selected".into(),
        })?
    }
    Ok(port)
}
