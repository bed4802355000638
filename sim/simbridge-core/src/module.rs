//! The [`IoModule`] and [`IoSession`] traits and the registry that selects
//! module implementations by name.

use crate::{
    args::ModuleArgs,
    error::ModuleError,
    modules::{Clocker, Ethernet, FramedTcp, UdpBridge},
    multiplexer::MuxHandle,
    pads::PadList,
};
use std::{fmt, str::FromStr};

/// One kind of external I/O, such as the TAP bridge.
///
/// A module is started once per simulation, then asked for one session per
/// configured endpoint.
pub trait IoModule {
    /// The name configurations select this module by.
    fn name(&self) -> &'static str;

    /// Stores the multiplexer sessions will register their readers with.
    fn start(&mut self, mux: &MuxHandle) -> Result<(), ModuleError>;

    /// Parses `args`, acquires the OS resource behind the session and
    /// registers it with the multiplexer.
    fn new_session(&mut self, args: &ModuleArgs) -> Result<Box<dyn IoSession>, ModuleError>;
}

/// One live endpoint of an [`IoModule`].
pub trait IoSession {
    /// Resolves the pads this session drives from `pads`. Called once per
    /// pad list the session is attached to; lists the session has no use
    /// for are ignored.
    fn add_pads(&mut self, pads: &PadList) -> Result<(), ModuleError>;

    /// Fails with [`ModuleError::Binding`] if a pad the session cannot run
    /// without was never added. Called once every pad list was added.
    fn check_bound(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Runs one step of the session at simulation time `time_ps`. Sessions
    /// detect clock edges themselves; a step without a rising edge leaves
    /// every hardware-facing signal untouched.
    fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError>;

    /// Flushes and releases the session's resources. Calling it again is a
    /// no-op.
    fn close(&mut self) -> Result<(), ModuleError>;
}

/// The built-in modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Ethernet,
    FramedTcp,
    Udp,
    Clocker,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Ethernet,
        ModuleKind::FramedTcp,
        ModuleKind::Udp,
        ModuleKind::Clocker,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Ethernet => "ethernet",
            ModuleKind::FramedTcp => "serial2framed_tcp",
            ModuleKind::Udp => "serial2udp",
            ModuleKind::Clocker => "clocker",
        }
    }

    pub fn instantiate(self) -> Box<dyn IoModule> {
        match self {
            ModuleKind::Ethernet => Box::new(Ethernet::new()),
            ModuleKind::FramedTcp => Box::new(FramedTcp::new()),
            ModuleKind::Udp => Box::new(UdpBridge::new()),
            ModuleKind::Clocker => Box::new(Clocker::new()),
        }
    }
}

impl FromStr for ModuleKind {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ModuleError::UnknownModule(s.to_string()))
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The modules available to a simulation, looked up by name.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn IoModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry holding every built-in module.
    pub fn with_builtin() -> Self {
        Self {
            modules: ModuleKind::ALL
                .into_iter()
                .map(ModuleKind::instantiate)
                .collect(),
        }
    }

    pub fn register(&mut self, module: Box<dyn IoModule>) -> Result<(), ModuleError> {
        if self.modules.iter().any(|m| m.name() == module.name()) {
            Err(ModuleError::DuplicateModule(module.name().to_string()))?
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut (dyn IoModule + 'static), ModuleError> {
        match self.modules.iter_mut().find(|m| m.name() == name) {
            Some(module) => Ok(module.as_mut()),
            None => Err(ModuleError::UnknownModule(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|m| m.name())
    }

    /// Starts every registered module.
    pub fn start_all(&mut self, mux: &MuxHandle) -> Result<(), ModuleError> {
        for module in self.modules.iter_mut() {
            module.start(mux)?;
            tracing::debug!(module = module.name(), "started");
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
