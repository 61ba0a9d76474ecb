//! Thread-based subprocess execution with stdout and stderr passed to protocol
//! objects.
//!
//! A [`Runner`] spawns a process and starts one worker thread per captured
//! output stream, one for a runner-managed stdin and one waiting for the
//! process. Workers push events into a single queue; the runner consumes it,
//! forwards data to a [`Protocol`], reports inactivity timeouts and tears
//! everything down once the process and all of its streams are done.
//!
//! Protocols either produce one value at the end of the run, or are
//! generators whose items are pulled through a [`ResultGenerator`] while the
//! process runs.
//!
//! # Usage
//!
//! ```rust,no_run
//! use spindle_io::{CaptureProtocol, Channel, LineGenerator, Runner};
//! use std::time::Duration;
//!
//! // Capture all of stdout
//! let finished = Runner::new(vec!["uname", "-a"], CaptureProtocol::stdout)
//!     .timeout(Some(Duration::from_secs(10)))
//!     .run()
//!     .unwrap()
//!     .into_finished()
//!     .unwrap();
//! println!("{}", finished.result.stdout_text());
//!
//! // Pull lines as they are written
//! let mut lines = Runner::new("for i in 1 2 3; do echo $i; sleep 1; done", LineGenerator::stdout)
//!     .run()
//!     .unwrap()
//!     .into_generator()
//!     .unwrap();
//! for item in lines.by_ref() {
//!     let (channel, line) = item.unwrap();
//!     assert_eq!(channel, Channel::Stdout);
//!     println!("{line}");
//! }
//! assert_eq!(lines.return_code(), Some(0));
//! ```

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod generator;
pub mod prelude;
pub mod process;
pub mod protocol;
pub mod protocols;
pub mod runner;
mod threads;

pub use channel::Channel;
pub use command::{Command, InputQueue, InputSender, SpawnOptions, StdinSource};
pub use config::RunnerConfig;
pub use error::{CommandError, Error};
pub use generator::{GeneratorState, ResultGenerator};
pub use process::Capture;
pub use protocol::{Encoding, Protocol};
pub use protocols::{
    CaptureProtocol, CapturedOutput, KillOutput, LineGenerator, LineSplitter, NoCapture,
};
pub use runner::{Finished, RunOutput, Runner, run_command};
