//! Error types for process execution.

use std::io;

/// Raised when a command exits with a non-zero code and the runner was
/// configured to treat that as an error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "CommandError: '{command}' failed with exitcode {}{}{}",
    format_code(.code),
    format_output("stdout", .stdout),
    format_output("stderr", .stderr)
)]
pub struct CommandError {
    /// The command as it was given to the runner.
    pub command: String,
    /// Exit code of the process. Negative values are terminating signals,
    /// `None` if the code could not be determined.
    pub code: Option<i32>,
    /// Decoded stdout captured up to the failure, if the protocol captured it.
    pub stdout: Option<String>,
    /// Decoded stderr captured up to the failure, if the protocol captured it.
    pub stderr: Option<String>,
}

fn format_code(code: &Option<i32>) -> String {
    code.map_or_else(|| String::from("<unknown>"), |code| code.to_string())
}

fn format_output(name: &str, output: &Option<String>) -> String {
    match output.as_deref().map(str::trim_end).filter(|o| !o.is_empty()) {
        Some(output) => format!(" [out: {name}] {output}"),
        None => String::new(),
    }
}

/// Process execution errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The OS refused to start the process.
    #[error("Failed to spawn '{command}': {source}{}", format_hint(.hint))]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
        hint: Option<&'static str>,
    },

    /// I/O operation failed.
    #[error(transparent)]
    IO(#[from] io::Error),

    /// The process exited with a non-zero code.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Runner settings that cannot drive a process.
    #[error("Invalid runner configuration: {0}")]
    Config(String),

    /// A protocol callback failed. Never swallowed by the runner.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Data was sent to an input queue whose writer is gone.
    #[error("Input queue is closed")]
    InputClosed,

    /// A worker thread panicked.
    #[error("Failed to join thread {0}")]
    ThreadJoin(String),
}

fn format_hint(hint: &Option<&'static str>) -> String {
    hint.map(|h| format!(" ({h})")).unwrap_or_default()
}

impl Error {
    /// Exit code carried by a [`CommandError`], if this is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Command(err) => err.code,
            _ => None,
        }
    }
}
