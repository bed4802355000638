//! [`SimRuntime`] owns everything one simulation run needs: the pad
//! registry, the modules, the multiplexer and the open sessions.

use crate::{
    args::ModuleArgs,
    config::{InterfaceRef, SimConfig},
    dispatcher::TickDispatcher,
    error::ModuleError,
    module::{IoModule, ModuleRegistry},
    multiplexer::{Multiplexer, MuxConfig},
    pads::{Pad, PadList, PadRegistry},
    shutdown::ExitStatus,
};

/// The host drives a run by calling [`SimRuntime::step`] once per time step
/// and [`SimRuntime::close`] at the end.
#[derive(Debug)]
pub struct SimRuntime {
    // Sessions go first so their readers are cancelled before the
    // multiplexer shuts down.
    dispatcher: TickDispatcher,
    modules: ModuleRegistry,
    pads: PadRegistry,
    mux: Multiplexer,
    started: bool,
}

impl SimRuntime {
    /// A runtime with every built-in module registered.
    pub fn new(config: MuxConfig) -> Result<Self, ModuleError> {
        let mux = Multiplexer::new(config).map_err(ModuleError::resource("event loop"))?;
        Ok(Self {
            dispatcher: TickDispatcher::new(mux.shutdown().clone()),
            modules: ModuleRegistry::with_builtin(),
            pads: PadRegistry::new(),
            mux,
            started: false,
        })
    }

    /// Registers `pads`, then opens every session `config` lists.
    pub fn from_config(config: &SimConfig, pads: Vec<PadList>) -> Result<Self, ModuleError> {
        let mut runtime = Self::new(config.multiplexer.clone())?;
        for list in pads {
            runtime.register_pads(list.pads().to_vec(), list.name(), list.index())?;
        }
        for entry in &config.modules {
            let args = entry.args()?;
            runtime.open_session(&entry.module, &args, &entry.interface, entry.tickfirst)?;
        }
        Ok(runtime)
    }

    pub fn register_pads(
        &mut self,
        pads: Vec<Pad>,
        name: impl Into<String>,
        index: u32,
    ) -> Result<(), ModuleError> {
        self.pads.register(pads, name, index)
    }

    pub fn pads(&self) -> &PadRegistry {
        &self.pads
    }

    /// Adds a module to the built-in ones. Modules registered after the
    /// others were started are started right away.
    pub fn register_module(&mut self, mut module: Box<dyn IoModule>) -> Result<(), ModuleError> {
        if self.started {
            module.start(&self.mux.handle())?;
        }
        self.modules.register(module)
    }

    /// Starts every module. Opening the first session does this implicitly.
    pub fn start_modules(&mut self) -> Result<(), ModuleError> {
        if !self.started {
            self.modules.start_all(&self.mux.handle())?;
            self.started = true;
        }
        Ok(())
    }

    /// Creates a session of `module` and binds it to the pad lists named by
    /// `interfaces`, in order.
    #[tracing::instrument(name = "SimRuntime::open_session", skip(self, args, interfaces), fields(args = %args.raw()))]
    pub fn open_session(
        &mut self,
        module: &str,
        args: &ModuleArgs,
        interfaces: &[InterfaceRef],
        tick_first: bool,
    ) -> Result<(), ModuleError> {
        self.start_modules()?;
        let lists = interfaces
            .iter()
            .map(|interface| {
                self.pads
                    .find(&interface.name, interface.index)
                    .ok_or_else(|| ModuleError::MissingInterface {
                        interface: interface.name.clone(),
                        index: interface.index,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let module = self.modules.get_mut(module)?;
        let name = module.name();
        let mut session = module.new_session(args)?;
        let bound = lists
            .into_iter()
            .try_for_each(|list| session.add_pads(list))
            .and_then(|()| session.check_bound());
        if let Err(e) = bound {
            if let Err(close) = session.close() {
                tracing::warn!(module = name, "Error closing unbound session: {}", close);
            }
            return Err(e);
        }
        self.dispatcher.add(name, session, tick_first);
        tracing::info!(module = name, tick_first, "session opened");
        Ok(())
    }

    /// Dispatches pending network events without blocking.
    pub fn poll(&self) {
        self.mux.poll();
    }

    /// Ticks every session at `time_ps`.
    pub fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        self.dispatcher.tick(time_ps)
    }

    /// One host step: poll, then tick.
    pub fn step(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        self.poll();
        self.tick(time_ps)
    }

    /// Set once the run should end, for example after a link was lost.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.mux.exit_status()
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn dispatcher(&self) -> &TickDispatcher {
        &self.dispatcher
    }

    /// Closes every session.
    pub fn close(&mut self) -> Result<(), ModuleError> {
        self.dispatcher.close_all()
    }
}
