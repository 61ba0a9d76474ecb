//! Command descriptions and stdin sources.

use std::{
    ffi::OsString,
    fmt,
    path::PathBuf,
    process::Stdio,
    sync::mpsc::{self, Receiver, Sender},
};

use crate::prelude::*;

/// Shell used for [`Command::Shell`].
pub const SHELL: &str = "/bin/sh";

/// A command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Program and arguments, executed directly.
    Argv(Vec<String>),
    /// A command line interpreted by [`SHELL`].
    Shell(String),
}

impl Command {
    /// Create an argument-vector command.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use spindle_io::Command;
    ///
    /// let command = Command::argv(["ls", "-la"]);
    /// assert_eq!(command.to_string(), "ls -la");
    /// ```
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::Argv(args.into_iter().map(|a| a.into()).collect())
    }

    /// Create a command line run through the shell.
    pub fn shell(line: impl Into<String>) -> Self {
        Command::Shell(line.into())
    }

    /// Program and arguments as they are handed to the OS.
    pub(crate) fn program_and_args(&self) -> Option<(String, Vec<String>)> {
        match self {
            Command::Argv(argv) => {
                let (program, args) = argv.split_first()?;
                Some((program.clone(), args.to_vec()))
            }
            Command::Shell(line) => Some((
                String::from(SHELL),
                vec![String::from("-c"), line.clone()],
            )),
        }
    }

    /// First 20 characters of the command, used to name worker threads.
    pub(crate) fn short_name(&self) -> String {
        self.to_string().chars().take(20).collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Argv(argv) => f.write_str(&argv.join(" ")),
            Command::Shell(line) => f.write_str(line),
        }
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Command::shell(value)
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        Command::Shell(value)
    }
}

impl From<Vec<String>> for Command {
    fn from(value: Vec<String>) -> Self {
        Command::Argv(value)
    }
}

impl From<Vec<&str>> for Command {
    fn from(value: Vec<&str>) -> Self {
        Command::argv(value)
    }
}

/// Options forwarded to process creation.
///
/// stdin, stdout and stderr are always decided by the runner and are not part
/// of this bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory of the child.
    pub cwd: Option<PathBuf>,
    /// Variables added to (or overriding) the inherited environment.
    pub env: Vec<(OsString, OsString)>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<OsString>,
    /// Start from an empty environment.
    pub clear_env: bool,
}

impl SpawnOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<OsString>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub(crate) fn apply(&self, command: &mut std::process::Command) {
        if self.clear_env {
            command.env_clear();
        }
        for key in self.env_remove.iter() {
            command.env_remove(key);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
    }
}

/// An entry of an input queue. `None` is the end-marker that closes stdin.
pub(crate) type Input = Option<Vec<u8>>;

/// Queue feeding a process's stdin from other threads.
///
/// Everything sent through an [`InputSender`] is written to stdin in order,
/// until the end-marker is sent with [`InputSender::close`].
#[derive(Debug)]
pub struct InputQueue {
    sender: InputSender,
    receiver: Receiver<Input>,
}

impl InputQueue {
    pub fn new() -> Self {
        let (tx, receiver) = mpsc::channel();
        Self {
            sender: InputSender { tx },
            receiver,
        }
    }

    /// A handle for feeding the queue. Handles can be cloned and moved to
    /// other threads.
    pub fn sender(&self) -> InputSender {
        self.sender.clone()
    }

    pub(crate) fn into_parts(self) -> (InputSender, Receiver<Input>) {
        (self.sender, self.receiver)
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of an [`InputQueue`].
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: Sender<Input>,
}

impl InputSender {
    /// Queue bytes for the process's stdin.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.tx
            .send(Some(data.into()))
            .map_err(|_| Error::InputClosed)
    }

    /// Queue the end-marker. stdin is closed once everything before it has
    /// been written. Closing twice is harmless.
    pub fn close(&self) {
        let _ = self.tx.send(None);
    }
}

/// Where the process's stdin comes from.
#[derive(Debug, Default)]
pub enum StdinSource {
    /// Inherit the parent's stdin. Nothing is written by the runner.
    #[default]
    Inherit,
    /// Connect stdin to the null device.
    Null,
    /// A caller-managed stream. The caller writes to it and closes it.
    Caller(Stdio),
    /// Bytes written once, after which stdin is closed.
    Bytes(Vec<u8>),
    /// A queue consumed until its end-marker.
    Queue(InputQueue),
}

impl From<&str> for StdinSource {
    fn from(value: &str) -> Self {
        StdinSource::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for StdinSource {
    fn from(value: String) -> Self {
        StdinSource::Bytes(value.into_bytes())
    }
}

impl From<Vec<u8>> for StdinSource {
    fn from(value: Vec<u8>) -> Self {
        StdinSource::Bytes(value)
    }
}

impl From<&[u8]> for StdinSource {
    fn from(value: &[u8]) -> Self {
        StdinSource::Bytes(value.to_vec())
    }
}

impl From<InputQueue> for StdinSource {
    fn from(value: InputQueue) -> Self {
        StdinSource::Queue(value)
    }
}

impl StdinSource {
    /// Split into the `Stdio` for the child and, when the runner writes stdin
    /// itself, the queue the writer thread drains.
    pub(crate) fn normalize(self) -> (Stdio, Option<(InputSender, Receiver<Input>)>) {
        match self {
            StdinSource::Inherit => (Stdio::inherit(), None),
            StdinSource::Null => (Stdio::null(), None),
            StdinSource::Caller(stdio) => (stdio, None),
            StdinSource::Bytes(data) => {
                let queue = InputQueue::new();
                let sender = queue.sender();
                // The receiver lives in the same queue, so neither send fails.
                let _ = sender.send(data);
                sender.close();
                (Stdio::piped(), Some(queue.into_parts()))
            }
            StdinSource::Queue(queue) => (Stdio::piped(), Some(queue.into_parts())),
        }
    }
}
