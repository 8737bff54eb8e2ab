mod config;
mod logging;
mod run;

use std::process::ExitCode;

use clap::Parser;
use relay_logging::{relay_error, relay_info};

use crate::config::{Cli, RunConfig};
use crate::logging::LogDestination;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::initialize(
        LogDestination::from_option(cli.log_file.as_deref()),
        cli.log_level,
    );

    let config = match RunConfig::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            relay_error!("Configuration error: {}", err);
            return ExitCode::from(run::EXIT_CONFIG);
        }
    };

    match run::execute(&config).await {
        Ok(report) => {
            relay_info!("{}", run::summarize(&report));
            ExitCode::SUCCESS
        }
        Err(err) => {
            let kind = if err.is_retryable() {
                "retryable"
            } else {
                "permanent"
            };
            relay_error!("Run failed ({}): {}", kind, err);
            ExitCode::from(err.exit_code())
        }
    }
}
