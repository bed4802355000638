use simbridge_core::ExitStatus;
use std::process::ExitCode;

mod cli;
mod loopback;

fn main() -> ExitCode {
    println!("simbridge v{}", env!("CARGO_PKG_VERSION"));
    match cli::run() {
        Ok(None) | Ok(Some(ExitStatus::Exited)) => {
            println!("Done");
            ExitCode::SUCCESS
        }
        Ok(Some(ExitStatus::LinkLost)) => {
            eprintln!("A network link was lost");
            ExitCode::from(2)
        }
        Ok(Some(status)) => {
            eprintln!("Simulation ended with {:?}", status);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
