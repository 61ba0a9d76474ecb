//! Channel identities tracked by the runner.

use std::fmt;

/// A logical channel of a running process.
///
/// `Process` stands for the process itself. It lives in the same active set
/// and timeout registry as the three streams, and it is what a protocol's
/// `timeout` callback receives when the whole process went quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
    Process,
}

impl Channel {
    /// The three stream channels, in file descriptor order.
    pub const STREAMS: [Channel; 3] = [Channel::Stdin, Channel::Stdout, Channel::Stderr];

    /// Conventional file descriptor number of a stream channel.
    pub fn fileno(self) -> Option<i32> {
        match self {
            Channel::Stdin => Some(0),
            Channel::Stdout => Some(1),
            Channel::Stderr => Some(2),
            Channel::Process => None,
        }
    }

    /// Whether this is one of the output streams a reader thread serves.
    pub fn is_output(self) -> bool {
        matches!(self, Channel::Stdout | Channel::Stderr)
    }
}

impl From<Channel> for &'static str {
    fn from(value: Channel) -> Self {
        match value {
            Channel::Stdin => "stdin",
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
            Channel::Process => "process",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = (*self).into();
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_filenos() {
        let filenos: Vec<_> = Channel::STREAMS.iter().map(|c| c.fileno()).collect();
        assert_eq!(filenos, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(Channel::Process.fileno(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Channel::Stderr.to_string(), "stderr");
        assert_eq!(Channel::Process.to_string(), "process");
        assert!(Channel::Stdout.is_output());
        assert!(!Channel::Stdin.is_output());
    }
}
