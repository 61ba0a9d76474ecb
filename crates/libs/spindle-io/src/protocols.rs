//! Ready-made protocols for the common cases.

use std::{collections::VecDeque, io};

use tracing::trace;

use crate::{
    channel::Channel,
    prelude::*,
    process::Capture,
    protocol::{Encoding, Protocol},
};

/// Captures nothing. The process writes straight to the parent's stdout and
/// stderr.
#[derive(Debug, Default)]
pub struct NoCapture;

impl Protocol for NoCapture {
    type Item = ();
    type Output = ();

    fn prepare_result(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pipes stdout and stderr but throws the data away.
#[derive(Debug, Default)]
pub struct KillOutput {
    discarded: usize,
}

impl Protocol for KillOutput {
    type Item = ();
    type Output = ();

    fn capture(&self) -> Capture {
        Capture::BOTH
    }

    fn pipe_data_received(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        self.discarded += data.len();
        trace!("Discarded {} bytes from {}", data.len(), channel);
        Ok(())
    }

    fn prepare_result(&mut self) -> Result<()> {
        trace!("Discarded {} bytes in total", self.discarded);
        Ok(())
    }
}

/// Output collected by a [`CaptureProtocol`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub encoding: Encoding,
}

impl CapturedOutput {
    pub fn stdout_text(&self) -> String {
        self.encoding.decode(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        self.encoding.decode(&self.stderr)
    }
}

/// Collects everything written to the captured streams.
#[derive(Debug, Default)]
pub struct CaptureProtocol {
    capture: Capture,
    output: CapturedOutput,
}

impl CaptureProtocol {
    pub fn new(capture: Capture) -> Self {
        Self {
            capture,
            output: CapturedOutput::default(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Capture::STDOUT)
    }

    pub fn stderr() -> Self {
        Self::new(Capture::STDERR)
    }

    pub fn both() -> Self {
        Self::new(Capture::BOTH)
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.output.encoding = encoding;
        self
    }
}

impl Protocol for CaptureProtocol {
    type Item = ();
    type Output = CapturedOutput;

    fn capture(&self) -> Capture {
        self.capture
    }

    fn encoding(&self) -> Encoding {
        self.output.encoding
    }

    fn pipe_data_received(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        match channel {
            Channel::Stdout => self.output.stdout.extend_from_slice(data),
            Channel::Stderr => self.output.stderr.extend_from_slice(data),
            Channel::Stdin | Channel::Process => {}
        }
        Ok(())
    }

    fn prepare_result(&mut self) -> Result<CapturedOutput> {
        // Kept: a failing exit still reports the output afterwards.
        Ok(self.output.clone())
    }

    fn captured(&self, channel: Channel) -> Option<&[u8]> {
        match channel {
            Channel::Stdout if self.capture.stdout => Some(self.output.stdout.as_slice()),
            Channel::Stderr if self.capture.stderr => Some(self.output.stderr.as_slice()),
            _ => None,
        }
    }
}

/// Splits a byte stream into lines.
///
/// A trailing partial line is kept until more data completes it or
/// [`finish_processing`](Self::finish_processing) is called.
#[derive(Debug, Default)]
pub struct LineSplitter {
    encoding: Encoding,
    remaining: Vec<u8>,
}

impl LineSplitter {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            remaining: Vec::new(),
        }
    }

    /// Feed `data`, returning the lines it completes without their `\n`.
    pub fn process(&mut self, data: &[u8]) -> Vec<String> {
        self.remaining.extend_from_slice(data);
        let Some(last_newline) = self.remaining.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.remaining.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remaining, rest);
        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|line| self.encoding.decode(line))
            .collect()
    }

    /// The unterminated rest, if any.
    pub fn finish_processing(&mut self) -> Option<String> {
        if self.remaining.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.remaining);
        Some(self.encoding.decode(&rest))
    }
}

/// A generator protocol yielding `(channel, line)` for every line written to
/// the captured streams.
#[derive(Debug, Default)]
pub struct LineGenerator {
    capture: Capture,
    encoding: Encoding,
    stdout: LineSplitter,
    stderr: LineSplitter,
    results: VecDeque<(Channel, String)>,
}

impl LineGenerator {
    pub fn new(capture: Capture, encoding: Encoding) -> Self {
        Self {
            capture,
            encoding,
            stdout: LineSplitter::new(encoding),
            stderr: LineSplitter::new(encoding),
            results: VecDeque::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Capture::STDOUT, Encoding::Utf8)
    }

    pub fn both() -> Self {
        Self::new(Capture::BOTH, Encoding::Utf8)
    }

    fn splitter(&mut self, channel: Channel) -> Option<&mut LineSplitter> {
        match channel {
            Channel::Stdout => Some(&mut self.stdout),
            Channel::Stderr => Some(&mut self.stderr),
            Channel::Stdin | Channel::Process => None,
        }
    }
}

impl Protocol for LineGenerator {
    type Item = (Channel, String);
    type Output = ();

    fn capture(&self) -> Capture {
        self.capture
    }

    fn is_generator(&self) -> bool {
        true
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn pipe_data_received(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        if let Some(splitter) = self.splitter(channel) {
            let lines = splitter.process(data);
            self.results
                .extend(lines.into_iter().map(|line| (channel, line)));
        }
        Ok(())
    }

    fn pipe_connection_lost(&mut self, channel: Channel, _reason: Option<&io::Error>) -> Result<()> {
        if let Some(rest) = self.splitter(channel).and_then(|s| s.finish_processing()) {
            self.results.push_back((channel, rest));
        }
        Ok(())
    }

    fn prepare_result(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_result(&mut self) -> Option<(Channel, String)> {
        self.results.pop_front()
    }
}
