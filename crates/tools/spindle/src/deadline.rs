//! Protocol wrapper terminating a process that stays quiet for too long.

use std::io;

use spindle_io::{Capture, Channel, Encoding, Protocol, prelude::Result};
use tracing::warn;

/// Forwards every callback to `inner`. When `kill` is set, a timeout of the
/// whole process asks the runner to terminate it.
pub struct Deadline<P> {
    inner: P,
    kill: bool,
}

impl<P: Protocol> Deadline<P> {
    pub fn new(inner: P, kill: bool) -> Self {
        Self { inner, kill }
    }
}

impl<P: Protocol> Protocol for Deadline<P> {
    type Item = P::Item;
    type Output = P::Output;

    fn capture(&self) -> Capture {
        self.inner.capture()
    }

    fn is_generator(&self) -> bool {
        self.inner.is_generator()
    }

    fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    fn connection_made(&mut self, pid: u32) -> Result<()> {
        self.inner.connection_made(pid)
    }

    fn pipe_data_received(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        self.inner.pipe_data_received(channel, data)
    }

    fn pipe_connection_lost(&mut self, channel: Channel, reason: Option<&io::Error>) -> Result<()> {
        self.inner.pipe_connection_lost(channel, reason)
    }

    fn timeout(&mut self, channel: Channel) -> Result<bool> {
        let close = self.inner.timeout(channel)?;
        if channel == Channel::Process && self.kill {
            warn!("Process timed out, terminating it");
            return Ok(true);
        }
        Ok(close)
    }

    fn process_exited(&mut self) -> Result<()> {
        self.inner.process_exited()
    }

    fn connection_lost(&mut self, reason: Option<&io::Error>) -> Result<()> {
        self.inner.connection_lost(reason)
    }

    fn prepare_result(&mut self) -> Result<P::Output> {
        self.inner.prepare_result()
    }

    fn next_result(&mut self) -> Option<P::Item> {
        self.inner.next_result()
    }

    fn captured(&self, channel: Channel) -> Option<&[u8]> {
        self.inner.captured(channel)
    }
}

#[cfg(test)]
mod tests {
    use spindle_io::{CaptureProtocol, NoCapture};

    use super::*;

    #[test]
    fn kills_only_when_asked() {
        let mut keep = Deadline::new(NoCapture, false);
        assert!(!keep.timeout(Channel::Process).unwrap());

        let mut kill = Deadline::new(NoCapture, true);
        assert!(kill.timeout(Channel::Process).unwrap());
        assert!(!kill.timeout(Channel::Stdout).unwrap());
    }

    #[test]
    fn forwards_captured_output() {
        let mut protocol = Deadline::new(CaptureProtocol::stdout(), true);
        assert_eq!(protocol.capture(), Capture::STDOUT);
        protocol.pipe_data_received(Channel::Stdout, b"abc").unwrap();
        assert_eq!(protocol.captured(Channel::Stdout), Some(&b"abc"[..]));
        assert_eq!(protocol.prepare_result().unwrap().stdout, b"abc");
    }
}
