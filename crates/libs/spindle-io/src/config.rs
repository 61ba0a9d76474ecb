//! Runner settings.

use std::time::Duration;

use crate::prelude::*;

/// Default resolution of the event loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Default size of a single read from stdout or stderr.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// How a [`Runner`](crate::Runner) drives a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerConfig {
    /// How long the event loop waits for an event before sweeping timeouts
    /// and re-checking whether there is work left.
    pub poll_interval: Duration,
    /// Inactivity threshold reported to the protocol. `None` disables
    /// timeout monitoring.
    pub timeout: Option<Duration>,
    /// Fail the run with a [`CommandError`](crate::CommandError) when the
    /// process exits with a non-zero code.
    pub exception_on_error: bool,
    /// Maximum number of bytes passed to one `pipe_data_received` call.
    pub read_chunk_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            exception_on_error: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl RunnerConfig {
    /// Reject settings the event loop cannot work with.
    ///
    /// A zero chunk size would read nothing and end every stream at once, a
    /// zero poll interval would spin.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config(String::from("poll interval must be positive")));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Config(String::from("read chunk size must be positive")));
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::Config(String::from("timeout must be positive")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RunnerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_values() {
        let configs = [
            RunnerConfig {
                read_chunk_size: 0,
                ..Default::default()
            },
            RunnerConfig {
                poll_interval: Duration::ZERO,
                ..Default::default()
            },
            RunnerConfig {
                timeout: Some(Duration::ZERO),
                ..Default::default()
            },
        ];
        for config in configs {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{config:?}");
        }
    }
}
