//! External I/O for cycle-accurate hardware simulations.
//!
//! Simulated hardware (an Ethernet MAC, a serial link) exposes its wires as
//! named [`pads`]. I/O modules bind those wires to real network endpoints on
//! the host: a TAP device, a TCP connection, a UDP socket. Network traffic
//! is read asynchronously by the [`Multiplexer`] into per-session queues, and
//! handed to the hardware one byte per rising clock edge by the sessions'
//! ticks.
//!
//! # Organization
//! - [`PadRegistry`] holds the wires the hardware model exposes
//! - [`IoModule`] and [`IoSession`] implement individual transports, found in
//!   [`modules`]
//! - [`Multiplexer`] is the single-threaded event loop reading the network
//! - [`TickDispatcher`] steps every session in a fixed order
//! - [`SimRuntime`] ties all of the above together for one run
//!
//! # Host loop
//!
//! The host calls [`SimRuntime::step`] once per simulated time step, which
//! first lets the multiplexer dispatch pending network events and then ticks
//! every session. Both happen on the calling thread and never overlap, so
//! nothing in this crate locks.
//!
//! ```no_run
//! use simbridge_core::{SimConfig, SimRuntime};
//!
//! let config = SimConfig::load("sim.json").unwrap();
//! let mut runtime = SimRuntime::from_config(&config, vec![]).unwrap();
//! let mut time_ps = 0;
//! while runtime.exit_status().is_none() {
//!     runtime.step(time_ps).unwrap();
//!     time_ps += config.timebase_ps;
//! }
//! runtime.close().unwrap();
//! ```

mod logging;

pub mod args;
pub use args::ModuleArgs;

pub mod capture;
pub mod clock;
pub mod device;
pub mod framing;
pub mod queues;

pub mod config;
pub use config::{InterfaceRef, ModuleEntry, SimConfig};

pub mod dispatcher;
pub use dispatcher::TickDispatcher;

pub mod error;
pub use error::{ArgError, LinkError, ModuleError, StatusCode};

pub mod module;
pub use module::{IoModule, IoSession, ModuleKind, ModuleRegistry};

pub mod modules;

pub mod multiplexer;
pub use multiplexer::{Multiplexer, MuxConfig, MuxHandle, Readiness, ReaderContext};

pub mod pads;
pub use pads::{Pad, PadList, PadRegistry, Signal};

pub mod runtime;
pub use runtime::SimRuntime;

pub mod shutdown;
pub use shutdown::{ExitStatus, Shutdown};
