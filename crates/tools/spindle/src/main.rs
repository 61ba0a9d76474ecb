//! Spindle command-line runner.
//!
//! Runs one command through the spindle engine and either prints what it wrote
//! once it is done or streams its output line by line:
//!
//! ```bash
//! # Capture both streams, give up on a process quiet for 30 seconds
//! spindle --timeout 30 --kill-on-timeout run -- make -j8
//!
//! # Stream lines of stdout and stderr as they are written
//! spindle lines --stderr --shell 'for i in 1 2 3; do echo $i; sleep 1; done'
//!
//! # Show the configuration in effect
//! spindle --config spindle.toml config
//! ```
//!
//! The exit code is the child's. A child killed by a signal exits with
//! 128 plus the signal number.

mod cli;
mod commands;
mod deadline;
mod error;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};
use spindle_io::Error as RunnerError;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    commands::{Settings, handle_config, handle_lines, handle_run},
    error::{Error, Result},
};

fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spindle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;

    let result = match &cli.command {
        Commands::Run { capture, target } => handle_run(&settings, *capture, target),
        Commands::Lines { stderr, target } => handle_lines(&settings, *stderr, target),
        Commands::Config => handle_config(&settings),
    };

    match result {
        Ok(code) => Ok(exit_code(code)),
        Err(Error::Runner(RunnerError::Command(err))) => {
            error!("{}", err);
            Ok(exit_code(err.code))
        }
        Err(err) => {
            error!("Error: {}", err);
            Err(err)
        }
    }
}

fn exit_code(code: Option<i32>) -> ExitCode {
    match code {
        Some(code @ 0..=255) => ExitCode::from(code as u8),
        Some(code) if code < 0 => ExitCode::from(128u8.saturating_add(code.unsigned_abs() as u8)),
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_map_above_128() {
        assert_eq!(exit_code(Some(0)), ExitCode::SUCCESS);
        assert_eq!(exit_code(Some(-9)), ExitCode::from(137));
        assert_eq!(exit_code(None), ExitCode::FAILURE);
        assert_eq!(exit_code(Some(300)), ExitCode::FAILURE);
    }
}
