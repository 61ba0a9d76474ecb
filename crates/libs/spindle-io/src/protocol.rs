//! The callback contract between the runner and the code consuming a process.
//!
//! A runner creates exactly one protocol instance per run and drives it from
//! the thread that consumes the event queue:
//!
//! 1. `connection_made` once the process is spawned.
//! 2. `pipe_data_received` for every chunk read from a captured stream, and
//!    `timeout` whenever a monitored channel stayed silent for too long.
//! 3. `pipe_connection_lost` when a stream reaches end-of-file, fails, or is
//!    closed on the protocol's request.
//! 4. `prepare_result` (blocking runs only), `process_exited` and finally
//!    `connection_lost`.
//!
//! Every callback may fail. The runner never swallows those errors; they abort
//! the run and reach the caller.

use std::io;

use crate::{channel::Channel, prelude::*, process::Capture};

/// Text encoding used to decode captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8, invalid sequences replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1, every byte is one character.
    Latin1,
}

impl Encoding {
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Encoding::Latin1 => data.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Receives data and lifecycle events of one process run.
pub trait Protocol {
    /// Items handed out one by one when the protocol is a generator.
    type Item;
    /// The value a blocking run returns.
    type Output;

    /// Output streams this protocol wants piped.
    fn capture(&self) -> Capture {
        Capture::NONE
    }

    /// Whether results are pulled incrementally through a
    /// [`ResultGenerator`](crate::ResultGenerator) instead of returned at the
    /// end of the run.
    fn is_generator(&self) -> bool {
        false
    }

    fn encoding(&self) -> Encoding {
        Encoding::Utf8
    }

    fn connection_made(&mut self, _pid: u32) -> Result<()> {
        Ok(())
    }

    /// A chunk of bytes arrived on `Stdout` or `Stderr`. Never empty.
    fn pipe_data_received(&mut self, _channel: Channel, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// A stream was closed. `reason` is set when a read or write failed.
    fn pipe_connection_lost(&mut self, _channel: Channel, _reason: Option<&io::Error>) -> Result<()> {
        Ok(())
    }

    /// `channel` saw no activity for the configured timeout.
    ///
    /// Returning `true` closes the stream, or terminates the process when
    /// `channel` is [`Channel::Process`].
    fn timeout(&mut self, _channel: Channel) -> Result<bool> {
        Ok(false)
    }

    fn process_exited(&mut self) -> Result<()> {
        Ok(())
    }

    fn connection_lost(&mut self, _reason: Option<&io::Error>) -> Result<()> {
        Ok(())
    }

    /// Build the final value of a blocking run.
    fn prepare_result(&mut self) -> Result<Self::Output>;

    /// Take the oldest queued item. Generator protocols queue items from
    /// their callbacks; others never have any.
    fn next_result(&mut self) -> Option<Self::Item> {
        None
    }

    /// Raw bytes captured so far on `channel`, used to describe failures.
    fn captured(&self, _channel: Channel) -> Option<&[u8]> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_utf8_lossy() {
        assert_eq!(Encoding::Utf8.decode("grüß".as_bytes()), "grüß");
        assert_eq!(Encoding::Utf8.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn decode_latin1() {
        assert_eq!(Encoding::Latin1.decode(&[b'a', 0xfc]), "aü");
    }
}
