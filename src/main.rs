use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use hpc_diag::cli::Args;
use hpc_diag::config::load_settings;
use hpc_diag::host::Host;
use hpc_diag::logging::{initialize_logging, GeneralLog};
use hpc_diag::orchestrator::{install_interrupt_handler, Orchestrator, RunOutcome};

fn main() -> ExitCode {
    // Parse arguments; help and version exit 0, usage errors exit 1
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    let general_log = GeneralLog::new();
    if let Err(e) = initialize_logging(args.verbose, general_log.clone()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args, general_log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args, general_log: GeneralLog) -> Result<()> {
    let config = args.to_run_config()?;
    let settings = load_settings(args.config.as_deref())?;

    let host = Host::system(&settings)?;
    let orchestrator = Orchestrator::new(config, settings, host).with_general_log(general_log);
    install_interrupt_handler(orchestrator.cleanup_registry())?;

    match orchestrator.run(io::stdin().lock(), io::stdout())? {
        RunOutcome::Declined => info!("Nothing collected"),
        RunOutcome::Completed { archive, .. } => println!("{}", archive.display()),
    }
    Ok(())
}
