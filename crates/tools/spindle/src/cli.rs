//! Command-line interface for spindle.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use spindle_io::{Command, StdinSource};

/// Command-line interface for spindle.
#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Spindle - Run a command and capture or stream its output")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Inactivity timeout in seconds, overrides the configuration file
    #[arg(short, long, global = true)]
    pub timeout: Option<f64>,

    /// Terminate the process once it has been quiet for the whole timeout
    #[arg(long, global = true)]
    pub kill_on_timeout: bool,

    /// Report a failing exit code instead of treating it as an error
    #[arg(long, global = true)]
    pub no_raise: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a command to completion and print what it wrote
    Run {
        /// Which streams to capture
        #[arg(long, value_enum, default_value_t = CaptureMode::Both)]
        capture: CaptureMode,

        #[command(flatten)]
        target: Target,
    },
    /// Print every line a command writes as soon as it is complete
    Lines {
        /// Stream stderr lines too
        #[arg(long)]
        stderr: bool,

        #[command(flatten)]
        target: Target,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CaptureMode {
    /// Leave both streams connected to the terminal
    Inherit,
    Stdout,
    Stderr,
    Both,
    /// Pipe both streams and throw the data away
    Discard,
}

/// The command to run and what it reads.
#[derive(Args, Debug)]
pub struct Target {
    /// Text written to the command's stdin, which is closed afterwards
    #[arg(long)]
    pub stdin_text: Option<String>,

    /// Run the arguments as one /bin/sh command line
    #[arg(long)]
    pub shell: bool,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Target {
    pub fn command(&self) -> Command {
        if self.shell {
            Command::shell(self.command.join(" "))
        } else {
            Command::argv(self.command.iter().cloned())
        }
    }

    pub fn stdin(&self) -> StdinSource {
        match &self.stdin_text {
            Some(text) => StdinSource::from(text.as_str()),
            None => StdinSource::Inherit,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_trailing_arguments() {
        let cli = Cli::try_parse_from([
            "spindle", "--timeout", "2", "run", "--capture", "stdout", "ls", "-la",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(2.0));
        let Commands::Run { capture, target } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(capture, CaptureMode::Stdout);
        assert_eq!(target.command(), Command::argv(["ls", "-la"]));
        assert!(matches!(target.stdin(), StdinSource::Inherit));
    }

    #[test]
    fn shell_joins_arguments() {
        let cli = Cli::try_parse_from([
            "spindle",
            "lines",
            "--shell",
            "--stdin-text",
            "x",
            "echo",
            "a | cat",
        ])
        .unwrap();
        let Commands::Lines { stderr, target } = cli.command else {
            panic!("expected lines");
        };
        assert!(!stderr);
        assert_eq!(target.command(), Command::shell("echo a | cat"));
        assert!(matches!(target.stdin(), StdinSource::Bytes(bytes) if bytes == b"x"));
    }

    #[test]
    fn run_needs_a_command() {
        assert!(Cli::try_parse_from(["spindle", "run"]).is_err());
    }
}
