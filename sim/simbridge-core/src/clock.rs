use crate::pads::Signal;

/// Detects rising edges of a clock signal.
///
/// Each session keeps its own detector; the sample taken on one tick is
/// compared against the previous tick of the same session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockEdge {
    last: bool,
}

impl ClockEdge {
    pub fn new() -> Self {
        Default::default()
    }

    /// Samples `clk` and reports whether it went low to high since the
    /// previous sample.
    pub fn rising(&mut self, clk: &Signal) -> bool {
        let now = clk.is_high();
        let edge = !self.last && now;
        self.last = now;
        edge
    }
}
