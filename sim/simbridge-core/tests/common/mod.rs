//! A stand-in for the hardware model: owns the pads of one stream interface
//! and a clock, and drives sessions edge by edge.

#![allow(dead_code)]

use simbridge_core::{
    modules::stream::*, IoSession, ModuleError, Multiplexer, Pad, PadList, Signal,
};
use std::{
    net::{TcpListener, UdpSocket},
    time::Duration,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Half a 1 MHz clock period.
pub const HALF_PERIOD_PS: u64 = 500_000;

pub struct Hardware {
    pub clk: Signal,
    pub sink_data: Signal,
    pub sink_valid: Signal,
    pub sink_ready: Signal,
    pub sink_first: Signal,
    pub sink_last: Signal,
    pub source_data: Signal,
    pub source_valid: Signal,
    pub source_ready: Signal,
    pub source_first: Signal,
    pub source_last: Signal,
    pub time_ps: u64,
}

impl Hardware {
    pub fn new() -> Self {
        let hw = Self {
            clk: Signal::new(1),
            sink_data: Signal::new(8),
            sink_valid: Signal::new(1),
            sink_ready: Signal::new(1),
            sink_first: Signal::new(1),
            sink_last: Signal::new(1),
            source_data: Signal::new(8),
            source_valid: Signal::new(1),
            source_ready: Signal::new(1),
            source_first: Signal::new(1),
            source_last: Signal::new(1),
            time_ps: 0,
        };
        hw.sink_ready.set_bool(true);
        hw
    }

    /// The stream pads as interface `name`. Without `qualifiers` the
    /// first/last pads are left out.
    pub fn stream_list(&self, name: &str, qualifiers: bool) -> PadList {
        let mut pads = vec![
            Pad::new(SINK_DATA, self.sink_data.clone()),
            Pad::new(SINK_VALID, self.sink_valid.clone()),
            Pad::new(SINK_READY, self.sink_ready.clone()),
            Pad::new(SOURCE_DATA, self.source_data.clone()),
            Pad::new(SOURCE_VALID, self.source_valid.clone()),
            Pad::new(SOURCE_READY, self.source_ready.clone()),
        ];
        if qualifiers {
            pads.push(Pad::new(SINK_FIRST, self.sink_first.clone()));
            pads.push(Pad::new(SINK_LAST, self.sink_last.clone()));
            pads.push(Pad::new(SOURCE_FIRST, self.source_first.clone()));
            pads.push(Pad::new(SOURCE_LAST, self.source_last.clone()));
        }
        PadList::new(name, 0, pads)
    }

    pub fn clock_list(&self) -> PadList {
        PadList::new(SYS_CLK, 0, vec![Pad::new(SYS_CLK, self.clk.clone())])
    }

    /// Binds `session` to the stream pads and the clock.
    pub fn attach(
        &self,
        session: &mut dyn IoSession,
        name: &str,
        qualifiers: bool,
    ) -> Result<(), ModuleError> {
        session.add_pads(&self.stream_list(name, qualifiers))?;
        session.add_pads(&self.clock_list())
    }

    /// One clock cycle: a falling tick, then a rising tick whose result is
    /// returned.
    pub fn cycle(&mut self, session: &mut dyn IoSession) -> Result<(), ModuleError> {
        self.clk.set(0);
        session.tick(self.time_ps)?;
        self.time_ps += HALF_PERIOD_PS;
        self.clk.set(1);
        let result = session.tick(self.time_ps);
        self.time_ps += HALF_PERIOD_PS;
        result
    }

    /// Drives `frame` out of the hardware one byte per cycle, marking it
    /// with first/last, then idles for two cycles.
    pub fn send(&mut self, session: &mut dyn IoSession, frame: &[u8]) -> Result<(), ModuleError> {
        for (i, &byte) in frame.iter().enumerate() {
            self.source_valid.set_bool(true);
            self.source_data.set(byte as u64);
            self.source_first.set_bool(i == 0);
            self.source_last.set_bool(i + 1 == frame.len());
            self.cycle(session)?;
        }
        self.source_valid.set_bool(false);
        self.source_first.set_bool(false);
        self.source_last.set_bool(false);
        self.cycle(session)?;
        self.cycle(session)
    }

    /// Runs `cycles` cycles and returns the sink valid level after each.
    pub fn watch_valid(
        &mut self,
        session: &mut dyn IoSession,
        cycles: usize,
    ) -> Result<Vec<bool>, ModuleError> {
        (0..cycles)
            .map(|_| {
                self.cycle(session)?;
                Ok(self.sink_valid.is_high())
            })
            .collect()
    }

    /// Runs `cycles` cycles and collects what the hardware received, one
    /// vector per burst of sink valid.
    pub fn receive(
        &mut self,
        session: &mut dyn IoSession,
        cycles: usize,
    ) -> Result<Vec<Vec<u8>>, ModuleError> {
        let mut frames = Vec::new();
        let mut current = Vec::new();
        for _ in 0..cycles {
            self.cycle(session)?;
            if self.sink_valid.is_high() {
                current.push(self.sink_data.get() as u8);
            } else if !current.is_empty() {
                frames.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            frames.push(current);
        }
        Ok(frames)
    }

    /// Every hardware-facing signal, for comparing before and after a tick.
    pub fn snapshot(&self) -> Vec<u64> {
        [
            &self.sink_data,
            &self.sink_valid,
            &self.sink_first,
            &self.sink_last,
            &self.source_ready,
        ]
        .iter()
        .map(|signal| signal.get())
        .collect()
    }
}

/// Runs the multiplexer until `done` holds, failing the test on timeout.
pub fn wait_for(mux: &Multiplexer, what: &str, done: impl FnMut() -> bool) {
    assert!(mux.run_until(TIMEOUT, done), "timed out waiting for {}", what);
}

/// A TCP port nothing is listening on.
pub fn free_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A UDP port nothing is bound to.
pub fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}
