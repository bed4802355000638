//! Error types shared by every I/O module.

use std::io;
use thiserror::Error as ThisError;

/// Numeric status returned across the module boundary.
///
/// The values are stable so that a host written against the numeric
/// interface can interpret them without linking against this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Error = -1,
    InvalidArgument = -2,
    OutOfMemory = -3,
    ConfigParse = -4,
    ConfigMissingKey = -5,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl<T> From<&Result<T, ModuleError>> for StatusCode {
    fn from(result: &Result<T, ModuleError>) -> Self {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(e) => e.status(),
        }
    }
}

/// Problems with a module's JSON argument blob.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("Error parsing json arg: {0}")]
    Parse(String),
    #[error("Arg must be type object: {0}")]
    NotObject(String),
    /// An absent optional key. Callers match on this variant and substitute
    /// their default.
    #[error("Could not find object: \"{0}\"")]
    MissingKey(String),
    #[error("Missing required key: \"{0}\"")]
    MissingRequired(String),
    #[error("Invalid value {value:?} for \"{key}\": {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Failures of an established network link. All of them are terminal for
/// the session that raised them.
#[derive(Debug, ThisError)]
pub enum LinkError {
    #[error("Short read of the {0}")]
    ShortRead(&'static str),
    #[error("Short write: sent {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("The peer closed the connection")]
    Disconnected,
    #[error("No peer is connected")]
    NoPeer,
    #[error("A frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
    #[error("Received a zero-length frame")]
    EmptyFrame,
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, ThisError)]
pub enum ModuleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ArgError),
    #[error("Could not acquire {what}: {source}")]
    Resource {
        what: String,
        #[source]
        source: io::Error,
    },
    #[error("Pad \"{pad}\" is missing from interface \"{interface}\"")]
    Binding { interface: String, pad: String },
    #[error("No pads registered for interface \"{interface}\" index {index}")]
    MissingInterface { interface: String, index: u32 },
    #[error("Session used before {0} was bound")]
    Unbound(&'static str),
    #[error("Module \"{0}\" was used before it was started")]
    NotStarted(&'static str),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No module named \"{0}\"")]
    UnknownModule(String),
    #[error("Module \"{0}\" is already registered")]
    DuplicateModule(String),
}

impl ModuleError {
    pub(crate) fn resource(what: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let what = what.into();
        move |source| ModuleError::Resource { what, source }
    }

    /// The numeric status this error is reported as.
    pub fn status(&self) -> StatusCode {
        match self {
            ModuleError::Config(ArgError::MissingKey(_)) => StatusCode::ConfigMissingKey,
            ModuleError::Config(_) => StatusCode::ConfigParse,
            ModuleError::InvalidArgument(_)
            | ModuleError::UnknownModule(_)
            | ModuleError::DuplicateModule(_) => StatusCode::InvalidArgument,
            ModuleError::Resource { source, .. }
                if source.kind() == io::ErrorKind::OutOfMemory =>
            {
                StatusCode::OutOfMemory
            }
            _ => StatusCode::Error,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, ModuleError::Link(_))
    }
}
