//! A stand-in hardware model that echoes every stream interface back to the
//! network, for bringing links up without a real design.

use simbridge_core::{
    clock::ClockEdge,
    modules::{
        ethernet,
        serial2framed_tcp,
        serial2udp,
        stream::{self, StreamPads},
    },
    ModuleError, ModuleKind, Pad, PadList, SimConfig, Signal,
};

/// Whether `name` is a stream interface, and if so whether it carries the
/// first/last qualifiers.
fn stream_kind(name: &str) -> Option<bool> {
    match name {
        ethernet::INTERFACE => Some(false),
        serial2framed_tcp::INTERFACE => Some(true),
        name if serial2udp::INTERFACES.contains(&name) => Some(true),
        _ => None,
    }
}

/// Wires for one stream interface.
fn stream_pads(qualifiers: bool) -> Vec<Pad> {
    let mut pads = vec![
        Pad::new(stream::SINK_DATA, Signal::new(8)),
        Pad::new(stream::SINK_VALID, Signal::new(1)),
        Pad::new(stream::SINK_READY, Signal::new(1)),
        Pad::new(stream::SOURCE_DATA, Signal::new(8)),
        Pad::new(stream::SOURCE_VALID, Signal::new(1)),
        Pad::new(stream::SOURCE_READY, Signal::new(1)),
    ];
    if qualifiers {
        for name in [
            stream::SINK_FIRST,
            stream::SINK_LAST,
            stream::SOURCE_FIRST,
            stream::SOURCE_LAST,
        ] {
            pads.push(Pad::new(name, Signal::new(1)));
        }
    }
    pads
}

#[derive(Debug)]
pub struct Loopback {
    lists: Vec<PadList>,
    ports: Vec<StreamPads>,
    clk: Signal,
    edge: ClockEdge,
    /// Set when nothing in the configuration drives the clock.
    self_clocked: bool,
    cycles: u64,
}

impl Loopback {
    /// Creates pads for every interface `config` attaches a session to.
    /// Every `sys_clk` reference shares one clock wire.
    pub fn for_config(config: &SimConfig) -> Result<Self, ModuleError> {
        let clk = Signal::new(1);
        let mut lists: Vec<PadList> = Vec::new();
        let mut ports = Vec::new();
        for interface in config.modules.iter().flat_map(|entry| &entry.interface) {
            let known = lists
                .iter()
                .any(|list| list.name() == interface.name && list.index() == interface.index);
            if known {
                continue;
            }
            let pads = if interface.name == stream::SYS_CLK {
                vec![Pad::new(stream::SYS_CLK, clk.clone())]
            } else if let Some(qualifiers) = stream_kind(&interface.name) {
                stream_pads(qualifiers)
            } else {
                Err(ModuleError::InvalidArgument(format!(
                    "the loopback model has no interface \"{}\"",
                    interface.name
                )))?
            };
            let list = PadList::new(interface.name.clone(), interface.index, pads);
            if interface.name != stream::SYS_CLK {
                let port = StreamPads::bind(&list)?;
                port.sink_ready.set_bool(true);
                ports.push(port);
            }
            lists.push(list);
        }

        let self_clocked = !config
            .modules
            .iter()
            .any(|entry| entry.module == ModuleKind::Clocker.name());
        if self_clocked {
            tracing::info!("No clocker configured, the loopback model drives sys_clk");
        }
        Ok(Self {
            lists,
            ports,
            clk,
            edge: ClockEdge::new(),
            self_clocked,
            cycles: 0,
        })
    }

    /// The pad lists to register with the runtime.
    pub fn pad_lists(&self) -> Vec<PadList> {
        self.lists.clone()
    }

    pub fn ports(&self) -> usize {
        self.ports.len()
    }

    /// Rising clock edges seen so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Toggles the clock when the model drives it itself. Runs before the
    /// sessions tick.
    pub fn drive_clock(&self) {
        if self.self_clocked {
            self.clk.set_bool(!self.clk.is_high());
        }
    }

    /// Evaluates the model after the sessions ticked. On a rising edge,
    /// everything the sessions presented on the sink side is driven back on
    /// the source side.
    pub fn eval(&mut self) {
        if !self.edge.rising(&self.clk) {
            return;
        }
        self.cycles += 1;
        for port in &self.ports {
            port.source_data.set(port.sink_data.get());
            port.source_valid.set(port.sink_valid.get());
            if let (Some(sink), Some(source)) = (&port.sink_first, &port.source_first) {
                source.set(sink.get());
            }
            if let (Some(sink), Some(source)) = (&port.sink_last, &port.source_last) {
                source.set(sink.get());
            }
            port.sink_ready.set_bool(true);
        }
    }
}
