//! The simulation configuration file: which modules to open, with which
//! arguments, attached to which pad lists.

use crate::{args::ModuleArgs, error::ArgError, multiplexer::MuxConfig};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{fs, io, path::Path};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Simulation time advanced per host step.
    #[serde(default = "default_timebase_ps")]
    pub timebase_ps: u64,
    #[serde(default)]
    pub multiplexer: MuxConfig,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

fn default_timebase_ps() -> u64 {
    1_000
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        if config.timebase_ps == 0 {
            Err(ConfigError::Invalid("timebase_ps must be positive".into()))?
        }
        Ok(config)
    }
}

/// One session to open.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
    pub module: String,
    #[serde(default)]
    pub interface: Vec<InterfaceRef>,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub tickfirst: bool,
}

impl ModuleEntry {
    pub fn args(&self) -> Result<ModuleArgs, ArgError> {
        ModuleArgs::from_value(Value::Object(self.args.clone()))
    }
}

/// Names one registered pad list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "InterfaceSpec")]
pub struct InterfaceRef {
    pub name: String,
    pub index: u32,
}

impl InterfaceRef {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// A bare name selects index 0.
#[derive(Deserialize)]
#[serde(untagged)]
enum InterfaceSpec {
    Name(String),
    Indexed {
        name: String,
        #[serde(default)]
        index: u32,
    },
}

impl From<InterfaceSpec> for InterfaceRef {
    fn from(spec: InterfaceSpec) -> Self {
        match spec {
            InterfaceSpec::Name(name) => InterfaceRef::new(name, 0),
            InterfaceSpec::Indexed { name, index } => InterfaceRef::new(name, index),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Could not read the configuration: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
