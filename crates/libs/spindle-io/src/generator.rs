//! Pull-based consumption of generator protocols.

use std::iter::FusedIterator;

use crate::{prelude::*, protocol::Protocol, runner::Execution};

/// Where a [`ResultGenerator`] is in the life of its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// The event loop is running. Items are handed out as the protocol
    /// produces them.
    ProcessRunning,
    /// The loop ended and the protocol was told the process exited. Items
    /// queued by that callback are still handed out.
    ProcessExited,
    /// Channels are closed and workers joined. Only buffered items remain.
    ConnectionLost,
}

/// Items produced by a generator protocol, pulled one at a time.
///
/// The process only makes progress while items are pulled: every call to
/// [`next_item`](Self::next_item) runs event loop steps until the protocol
/// has queued an item or the process is done. Once exhausted, the exit code
/// is available from [`return_code`](Self::return_code).
///
/// Items the protocol produces faster than they are pulled are buffered
/// without bound.
///
/// Dropping the generator early kills the process if it still runs, closes
/// every channel and joins every worker.
pub struct ResultGenerator<P: Protocol> {
    execution: Execution<P>,
    state: GeneratorState,
}

impl<P: Protocol> ResultGenerator<P> {
    pub(crate) fn new(execution: Execution<P>) -> Self {
        Self {
            execution,
            state: GeneratorState::ProcessRunning,
        }
    }

    /// Where the generator is in the life of its process.
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Exit code of the process, known once the process exited. Negative
    /// values are terminating signals.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use spindle_io::{LineGenerator, Runner};
    ///
    /// let mut lines = Runner::new("echo a; exit 3", LineGenerator::stdout)
    ///     .exception_on_error(false)
    ///     .run()
    ///     .unwrap()
    ///     .into_generator()
    ///     .unwrap();
    /// assert_eq!(lines.return_code(), None);
    /// while lines.next_item().unwrap().is_some() {}
    /// assert_eq!(lines.return_code(), Some(3));
    /// ```
    pub fn return_code(&self) -> Option<i32> {
        self.execution.return_code()
    }

    /// The protocol receiving the process's events.
    pub fn protocol(&self) -> &P {
        &self.execution.protocol
    }

    /// Close a runner-managed stdin once everything queued so far is written.
    pub fn close_stdin(&self) {
        self.execution.close_stdin();
    }

    /// Pull the next item. `Ok(None)` marks the end of the sequence.
    pub fn next_item(&mut self) -> Result<Option<P::Item>> {
        if self.state == GeneratorState::ProcessRunning {
            loop {
                if let Some(item) = self.execution.protocol.next_result() {
                    return Ok(Some(item));
                }
                if !self.execution.should_continue() {
                    break;
                }
                self.execution.process_queue()?;
            }
            self.state = GeneratorState::ProcessExited;
            self.execution.protocol.process_exited()?;
            self.execution.capture_return_code()?;
            self.execution.check_result()?;
        }

        if self.state == GeneratorState::ProcessExited {
            if let Some(item) = self.execution.protocol.next_result() {
                return Ok(Some(item));
            }
            self.state = GeneratorState::ConnectionLost;
            self.execution.close_connection()?;
        }

        Ok(self.execution.protocol.next_result())
    }

    /// Pull and discard every remaining item, returning the exit code.
    pub fn finish(mut self) -> Result<Option<i32>> {
        while self.next_item()?.is_some() {}
        Ok(self.return_code())
    }
}

impl<P: Protocol> Iterator for ResultGenerator<P> {
    type Item = Result<P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

impl<P: Protocol> FusedIterator for ResultGenerator<P> {}
