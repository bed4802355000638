//! The `clocker` module drives a clock pad from simulation time.
//!
//! It is the module the tick-first ordering exists for: every other session
//! samples the clock it drives within the same step.

use super::stream::{ensure_bound, SYS_CLK};
use crate::{
    args::ModuleArgs,
    error::{ArgError, ModuleError},
    module::{IoModule, IoSession},
    multiplexer::MuxHandle,
    pads::{PadList, Signal},
};

const MODULE: &str = "clocker";

const PS_PER_SECOND: u64 = 1_000_000_000_000;

#[derive(Debug, Default)]
pub struct Clocker {
    started: bool,
}

impl Clocker {
    pub fn new() -> Self {
        Default::default()
    }
}

impl IoModule for Clocker {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn start(&mut self, _mux: &MuxHandle) -> Result<(), ModuleError> {
        self.started = true;
        Ok(())
    }

    fn new_session(&mut self, args: &ModuleArgs) -> Result<Box<dyn IoSession>, ModuleError> {
        if !self.started {
            Err(ModuleError::NotStarted(MODULE))?
        }
        let freq_hz: u64 = args.parse_required("freq_hz")?;
        let phase_deg: u64 = args.parse_optional("phase_deg")?.unwrap_or(0);
        Ok(Box::new(ClockerSession::new(freq_hz, phase_deg)?))
    }
}

/// Drives a square wave: high for the first half of every period.
#[derive(Debug)]
pub struct ClockerSession {
    period_ps: u64,
    phase_ps: u64,
    clk: Option<Signal>,
}

impl ClockerSession {
    pub fn new(freq_hz: u64, phase_deg: u64) -> Result<Self, ArgError> {
        if freq_hz == 0 || freq_hz > PS_PER_SECOND / 2 {
            Err(ArgError::Invalid {
                key: "freq_hz".into(),
                value: freq_hz.to_string(),
                reason: "the period must be at least two picoseconds".into(),
            })?
        }
        let period_ps = PS_PER_SECOND / freq_hz;
        Ok(Self {
            period_ps,
            phase_ps: period_ps * (phase_deg % 360) / 360,
            clk: None,
        })
    }

    pub fn period_ps(&self) -> u64 {
        self.period_ps
    }

    /// The clock level at `time_ps`.
    pub fn level(&self, time_ps: u64) -> bool {
        let offset = (time_ps + self.period_ps - self.phase_ps) % self.period_ps;
        offset < self.period_ps / 2
    }
}

impl IoSession for ClockerSession {
    fn add_pads(&mut self, pads: &PadList) -> Result<(), ModuleError> {
        if let Some(clk) = pads.pad(SYS_CLK) {
            self.clk = Some(clk.clone());
        }
        Ok(())
    }

    fn check_bound(&self) -> Result<(), ModuleError> {
        ensure_bound(&self.clk, SYS_CLK, SYS_CLK)
    }

    fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        let clk = self.clk.as_ref().ok_or(ModuleError::Unbound(SYS_CLK))?;
        clk.set_bool(self.level(time_ps));
        Ok(())
    }

    fn close(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}
