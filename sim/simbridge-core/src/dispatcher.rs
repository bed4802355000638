//! The tick dispatcher walks every open session once per simulation step.

use crate::{
    error::ModuleError,
    module::IoSession,
    shutdown::{ExitStatus, Shutdown},
};
use std::fmt;

struct Entry {
    module: &'static str,
    session: Box<dyn IoSession>,
    tick_first: bool,
}

/// Holds sessions in tick order.
///
/// Sessions flagged tick-first (clock drivers) run before every other session
/// on every step, so their outputs are visible to the rest within the same
/// step. Within each group sessions run in the order they were added.
pub struct TickDispatcher {
    entries: Vec<Entry>,
    shutdown: Shutdown,
}

impl TickDispatcher {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            entries: Vec::new(),
            shutdown,
        }
    }

    pub fn add(&mut self, module: &'static str, session: Box<dyn IoSession>, tick_first: bool) {
        let entry = Entry {
            module,
            session,
            tick_first,
        };
        if tick_first {
            let at = self.entries.iter().take_while(|e| e.tick_first).count();
            self.entries.insert(at, entry);
        } else {
            self.entries.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Module names of the sessions, in tick order.
    pub fn modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.module)
    }

    /// Ticks every session at `time_ps`, stopping at the first failure.
    ///
    /// A link failure also requests shutdown of the host loop, since the
    /// hardware can no longer be kept in step with the network.
    pub fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        for entry in self.entries.iter_mut() {
            if let Err(e) = entry.session.tick(time_ps) {
                tracing::error!(module = entry.module, time_ps, "Tick failed: {}", e);
                if e.is_link() {
                    self.shutdown.shut_down_with_status(ExitStatus::LinkLost);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes every session, even when some fail. Returns the first failure.
    pub fn close_all(&mut self) -> Result<(), ModuleError> {
        let mut result = Ok(());
        for entry in self.entries.iter_mut() {
            if let Err(e) = entry.session.close() {
                tracing::error!(module = entry.module, "Close failed: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl fmt::Debug for TickDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.modules()).finish()
    }
}
