//! Named hardware signals ("pads") exposed by the simulated design.
//!
//! The hardware model registers one [`PadList`] per interface instance when
//! the simulation starts. I/O modules look their wires up by name once, at
//! bind time, and keep [`Signal`] handles for the per-tick hot path.

use crate::error::ModuleError;
use std::{cell::Cell, fmt, rc::Rc};

/// A handle onto one signal of the hardware model.
///
/// The storage belongs to the model. Every clone of a handle observes the
/// same value, and writes are truncated to the signal's bit width.
#[derive(Clone)]
pub struct Signal {
    value: Rc<Cell<u64>>,
    width: u32,
}

impl Signal {
    /// Creates a signal of `width` bits, initially zero.
    pub fn new(width: u32) -> Self {
        assert!(
            (1..=64).contains(&width),
            "Signal width must be within 1..=64, got {}",
            width
        );
        Self {
            value: Rc::new(Cell::new(0)),
            width,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn get(&self) -> u64 {
        self.value.get()
    }

    pub fn set(&self, value: u64) {
        self.value.set(value & self.mask());
    }

    pub fn is_high(&self) -> bool {
        self.get() != 0
    }

    pub fn set_bool(&self, value: bool) {
        self.set(value as u64);
    }

    /// Whether both handles refer to the same wire.
    pub fn same_wire(&self, other: &Signal) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }

    fn mask(&self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1 << self.width) - 1
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("width", &self.width)
            .field("value", &self.get())
            .finish()
    }
}

/// A named signal.
#[derive(Debug, Clone)]
pub struct Pad {
    name: String,
    signal: Signal,
}

impl Pad {
    pub fn new(name: impl Into<String>, signal: Signal) -> Self {
        Self {
            name: name.into(),
            signal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.signal.width()
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }
}

/// All pads of one interface instance, such as `eth` index 0.
#[derive(Debug, Clone)]
pub struct PadList {
    name: String,
    index: u32,
    pads: Vec<Pad>,
}

impl PadList {
    pub fn new(name: impl Into<String>, index: u32, pads: Vec<Pad>) -> Self {
        Self {
            name: name.into(),
            index,
            pads,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn pads(&self) -> &[Pad] {
        &self.pads
    }

    /// Looks a pad up by exact name.
    pub fn pad(&self, name: &str) -> Option<&Signal> {
        self.pads
            .iter()
            .find(|pad| pad.name == name)
            .map(|pad| &pad.signal)
    }

    /// Looks a mandatory pad up by exact name.
    pub fn require(&self, name: &str) -> Result<Signal, ModuleError> {
        self.pad(name).cloned().ok_or_else(|| ModuleError::Binding {
            interface: self.name.clone(),
            pad: name.to_string(),
        })
    }
}

/// The table of every interface the hardware model exposes.
///
/// Lists are only ever appended. Lookups are linear, which is fine for the
/// handful of interfaces a design has, since they only happen at bind time.
#[derive(Debug, Default)]
pub struct PadRegistry {
    lists: Vec<PadList>,
}

impl PadRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers the pads of interface `name` instance `index`.
    pub fn register(
        &mut self,
        pads: Vec<Pad>,
        name: impl Into<String>,
        index: u32,
    ) -> Result<(), ModuleError> {
        let name = name.into();
        if self.find(&name, index).is_some() {
            Err(ModuleError::InvalidArgument(format!(
                "interface \"{}\" index {} is already registered",
                name, index
            )))?
        }
        tracing::debug!(interface = %name, index, pads = pads.len(), "registered pads");
        self.lists.push(PadList::new(name, index, pads));
        Ok(())
    }

    pub fn find(&self, name: &str, index: u32) -> Option<&PadList> {
        self.lists
            .iter()
            .find(|list| list.name == name && list.index == index)
    }

    pub fn lists(&self) -> &[PadList] {
        &self.lists
    }
}
