use clap::Parser;
use hci_sensor_agent::{AgentConfig, Options, RunError, agent, shutdown_channel};
use std::io;
use std::panic::{self, PanicHookInfo};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;
const EXIT_INIT_FAILURE: i32 = 3;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Run the agent until Ctrl-C.
///
/// If the interrupt listener itself fails the agent is stopped as well and
/// the listener's error is returned.
async fn run(config: AgentConfig) -> Result<(), RunError> {
    let (trigger, shutdown) = shutdown_channel();
    let interrupt = tokio::spawn(async move {
        let result = tokio::signal::ctrl_c().await;
        if result.is_ok() {
            info!("interrupt received, shutting down");
        }
        trigger.trigger();
        result
    });

    agent::run(config, shutdown).await?;

    match interrupt.await {
        Ok(result) => Ok(result?),
        Err(join) => Err(io::Error::other(join).into()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);

    let config = match AgentConfig::try_from(&options) {
        Ok(config) => config,
        Err(why) => {
            error!("invalid configuration: {why}");
            std::process::exit(EXIT_INIT_FAILURE);
        }
    };

    match run(config).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(RunError::Scan(why)) => {
            error!("failed to open HCI controller: {why}");
            std::process::exit(EXIT_INIT_FAILURE);
        }
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
