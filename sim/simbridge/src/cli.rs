//! Parses the command line arguments and runs the host loop.
//!
//! Basic usage, echoing every configured link back to the network:
//!
//! ```cargo run --bin simbridge -- --config sim.json --log```

use crate::loopback::Loopback;
use chrono;
use clap::Parser;
use simbridge_core::{config::ConfigError, ExitStatus, ModuleError, SimConfig, SimRuntime};
use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error as ThisError;
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "Bridges simulated hardware links to the host network")]
pub struct Args {
    /// Logging flag. Writes JSON logs to ./logs when set.
    #[arg(short, long)]
    pub log: bool,
    /// Simulation configuration file
    #[arg(short, long)]
    pub config: PathBuf,
    /// Stop after this many clock cycles instead of running until a link is lost
    #[arg(long)]
    pub cycles: Option<u64>,
}

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Module(#[from] ModuleError),
    #[error("Could not open the log file: {0}")]
    LogFile(#[from] io::Error),
    #[error("Could not install the logger: {0}")]
    Logger(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Parses the command line and runs the simulation it names.
pub fn run() -> Result<Option<ExitStatus>, CliError> {
    let cli = Args::parse();
    if cli.log {
        initialize_logging()?;
    }
    let config = SimConfig::load(&cli.config)?;
    run_sim(&config, cli.cycles)
}

/// Runs `config` against the loopback model until a session reports an exit
/// status or `cycles` clock cycles have passed.
pub fn run_sim(config: &SimConfig, cycles: Option<u64>) -> Result<Option<ExitStatus>, CliError> {
    let mut host = Host::new(config)?;
    let result = host.run(cycles);
    let closed = host.close();
    let status = result?;
    closed?;
    Ok(status)
}

/// The loopback model and the runtime, advanced together one time step at
/// a time.
pub struct Host {
    model: Loopback,
    runtime: SimRuntime,
    time_ps: u64,
    timebase_ps: u64,
}

impl Host {
    pub fn new(config: &SimConfig) -> Result<Self, CliError> {
        let model = Loopback::for_config(config)?;
        let runtime = SimRuntime::from_config(config, model.pad_lists())?;
        tracing::info!(
            sessions = runtime.dispatcher().len(),
            ports = model.ports(),
            "simulation started"
        );
        Ok(Self {
            model,
            runtime,
            time_ps: 0,
            timebase_ps: config.timebase_ps,
        })
    }

    /// One time step: clock, network and sessions, then the model.
    pub fn step(&mut self) -> Result<(), CliError> {
        self.model.drive_clock();
        self.runtime.step(self.time_ps)?;
        self.model.eval();
        self.time_ps += self.timebase_ps;
        Ok(())
    }

    /// Steps until a session reports an exit status or the model has seen
    /// `cycles` clock cycles in total.
    pub fn run(&mut self, cycles: Option<u64>) -> Result<Option<ExitStatus>, CliError> {
        loop {
            self.step()?;
            if let Some(status) = self.runtime.exit_status() {
                tracing::info!(?status, time_ps = self.time_ps, "simulation exited");
                return Ok(Some(status));
            }
            if cycles.map_or(false, |limit| self.model.cycles() >= limit) {
                return Ok(None);
            }
        }
    }

    pub fn cycles(&self) -> u64 {
        self.model.cycles()
    }

    pub fn close(&mut self) -> Result<(), CliError> {
        tracing::info!(time_ps = self.time_ps, cycles = self.cycles(), "simulation finished");
        Ok(self.runtime.close()?)
    }
}

/// Initializes the event protocol. Only should be called once when the sim
/// starts. Writes to a timestamped file in ./logs.
fn initialize_logging() -> Result<(), CliError> {
    let main_path = "./logs";
    create_dir_all(main_path)?;
    let file_path = format!(
        "{}/debug-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(file_path)?;
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .json()
        .finish();
    // set the global default so all events/logs go to the same subscriber and
    // subsequently the same file
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
