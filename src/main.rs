//! Binary entry point: load configuration, start logging, run the bot.

use std::process::ExitCode;

use deidiotize::config::{Config, DISCORD_TOKEN_VAR};
use deidiotize::{logging, BotError};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let config = Config::from_env();

    if let Err(e) = logging::init(&config.activity_log) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match deidiotize::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(BotError::Config(e)) => {
            error!(variable = DISCORD_TOKEN_VAR, "CRITICAL: {e}");
            ExitCode::FAILURE
        }
        Err(e @ BotError::Gateway(_)) => {
            error!(error = %e, "gateway stopped, exiting");
            ExitCode::FAILURE
        }
    }
}
