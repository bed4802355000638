//! Logging holds wrapper functions for logging events.
//! Each function corresponds to a type of event (frames, session lifecycle),
//! so every transport reports them with the same fields.

use std::fmt;
use tracing::{event, Level};

/// Which way a frame crossed the simulation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read from the network, queued for the hardware.
    Inbound,
    /// Assembled from the hardware, sent to the network.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Frame event handler.
/// Captures the following data: module, direction, simulation time, len,
/// and a hex dump of the first bytes at trace level.
pub(crate) fn frame_event(module: &'static str, direction: Direction, time_ps: u64, frame: &[u8]) {
    event!(
        target: "FRAME",
        Level::DEBUG,
        module,
        direction = %direction,
        time_ps,
        len = frame.len()
    );
    if tracing::enabled!(target: "FRAME", Level::TRACE) {
        event!(target: "FRAME", Level::TRACE, module, bytes = %hexdump(frame));
    }
}

/// Session lifecycle event handler: creation, connection, close.
pub(crate) fn session_event(module: &'static str, what: &str, detail: &dyn fmt::Display) {
    event!(target: "SESSION", Level::INFO, module, what, detail = %detail);
}

fn hexdump(frame: &[u8]) -> String {
    frame
        .iter()
        .take(64)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
