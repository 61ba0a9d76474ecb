//! Command handlers for spindle.
//!
//! Every handler returns the exit code of the command it ran.

use std::io::{Write, stderr, stdout};

use spindle_config::SpindleConfig;
use spindle_io::{
    CaptureProtocol, KillOutput, LineGenerator, NoCapture, Protocol, RunOutput, Runner,
};
use tracing::info;

use crate::{
    cli::{CaptureMode, Cli, Target},
    deadline::Deadline,
    error::Result,
};

/// Configuration file merged with the command-line overrides.
pub struct Settings {
    pub config: SpindleConfig,
    pub kill_on_timeout: bool,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => SpindleConfig::from_file(path)?,
            None => SpindleConfig::default(),
        };
        if cli.timeout.is_some() {
            config.runner.timeout_secs = cli.timeout;
        }
        if cli.no_raise {
            config.runner.exception_on_error = false;
        }
        config.validate()?;
        Ok(Self {
            config,
            kill_on_timeout: cli.kill_on_timeout,
        })
    }

    fn start<P: Protocol>(&self, target: &Target, protocol: P) -> Result<RunOutput<Deadline<P>>> {
        let kill = self.kill_on_timeout;
        let runner = Runner::new(target.command(), move || Deadline::new(protocol, kill))
            .stdin(target.stdin())
            .options(self.config.to_spawn_options())
            .config(self.config.to_runner_config());
        info!("Running '{}'", runner.get_full_command());
        Ok(runner.run()?)
    }
}

fn return_code<P: Protocol>(output: RunOutput<P>) -> Result<Option<i32>> {
    match output {
        RunOutput::Finished(finished) => Ok(finished.return_code),
        RunOutput::Generator(generator) => Ok(generator.finish()?),
    }
}

/// Handles the run command: run to completion, then print the captured streams.
pub fn handle_run(settings: &Settings, capture: CaptureMode, target: &Target) -> Result<Option<i32>> {
    let protocol = match capture {
        CaptureMode::Inherit => return return_code(settings.start(target, NoCapture)?),
        CaptureMode::Discard => {
            return return_code(settings.start(target, KillOutput::default())?);
        }
        CaptureMode::Stdout => CaptureProtocol::stdout(),
        CaptureMode::Stderr => CaptureProtocol::stderr(),
        CaptureMode::Both => CaptureProtocol::both(),
    };
    let finished = match settings.start(target, protocol)? {
        RunOutput::Finished(finished) => finished,
        output @ RunOutput::Generator(_) => return return_code(output),
    };
    stdout().write_all(&finished.result.stdout)?;
    stderr().write_all(&finished.result.stderr)?;
    Ok(finished.return_code)
}

/// Handles the lines command: print each line as soon as it is complete.
pub fn handle_lines(settings: &Settings, with_stderr: bool, target: &Target) -> Result<Option<i32>> {
    let protocol = if with_stderr {
        LineGenerator::both()
    } else {
        LineGenerator::stdout()
    };
    let mut lines = match settings.start(target, protocol)? {
        RunOutput::Generator(lines) => lines,
        output @ RunOutput::Finished(_) => return return_code(output),
    };
    let mut out = stdout().lock();
    for item in lines.by_ref() {
        let (channel, line) = item?;
        writeln!(out, "[{channel}] {line}")?;
        out.flush()?;
    }
    Ok(lines.return_code())
}

/// Handles the config command: print the effective configuration as TOML.
pub fn handle_config(settings: &Settings) -> Result<Option<i32>> {
    print!("{}", settings.config.to_toml()?);
    Ok(Some(0))
}
