//! Worker threads feeding the runner's event queue.
//!
//! Each worker owns one end of the process: a reader per captured output
//! stream, a writer for a runner-managed stdin and a waiter for the process
//! itself. Workers only ever send [`IoEvent`]s; every decision is taken by the
//! runner. Each worker sends at most one terminal event and stops early when
//! its exit flag is raised.

use std::{
    io::{self, Read, Write},
    os::fd::{AsRawFd, RawFd},
    process::ChildStdin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle, sleep},
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    channel::Channel,
    command::Input,
    prelude::*,
    process::{ProcessStatus, SharedChild, get_process_status, lock},
};

/// How long a reader or writer blocks before looking at its exit flag.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How often the waiter checks whether the process is gone.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What happened on a channel.
#[derive(Debug)]
pub(crate) enum IoState {
    /// Bytes read from an output stream. Never empty.
    Data(Vec<u8>),
    /// The stream ended or failed. On stdin this means it was closed.
    Eof(Option<io::Error>),
    /// The process terminated.
    ProcessExit,
}

#[derive(Debug)]
pub(crate) struct IoEvent {
    pub channel: Channel,
    pub state: IoState,
}

impl IoEvent {
    fn new(channel: Channel, state: IoState) -> Self {
        Self { channel, state }
    }
}

/// A stream the runner can close while a worker is using it.
pub(crate) type SharedStream<T> = Arc<Mutex<Option<T>>>;

/// Handle to a running worker thread.
#[derive(Debug)]
pub(crate) struct Worker {
    name: String,
    exit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(name: String, work: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let exit = Arc::new(AtomicBool::new(false));
        let thread_exit = Arc::clone(&exit);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || work(thread_exit))?;
        debug!("Started worker '{}'", name);
        Ok(Self {
            name,
            exit,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    /// Wait for the thread to finish. Joining twice is a no-op.
    pub fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|err| Error::ThreadJoin(format!("{} - {:?}", self.name, err)))?;
        debug!("Joined worker '{}'", self.name);
        Ok(())
    }
}

/// Start a thread reading `stream` in chunks of at most `chunk_size` bytes.
pub(crate) fn launch_stream_reader<T>(
    name: String,
    channel: Channel,
    stream: SharedStream<T>,
    tx: Sender<IoEvent>,
    chunk_size: usize,
) -> Result<Worker>
where
    T: Read + AsRawFd + Send + 'static,
{
    Worker::spawn(name, move |exit| {
        read_stream(channel, stream, tx, chunk_size, exit)
    })
}

fn read_stream<T: Read + AsRawFd>(
    channel: Channel,
    stream: SharedStream<T>,
    tx: Sender<IoEvent>,
    chunk_size: usize,
    exit: Arc<AtomicBool>,
) {
    let Some(fd) = lock(&stream).as_ref().map(|s| s.as_raw_fd()) else {
        return;
    };
    let mut buffer = vec![0; chunk_size];
    while !exit.load(Ordering::Relaxed) {
        match wait_readable(fd, WORKER_POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.send(IoEvent::new(channel, IoState::Eof(Some(err))));
                break;
            }
        }
        let mut guard = lock(&stream);
        let Some(source) = guard.as_mut() else {
            // Closed by the runner, which already retired the channel.
            break;
        };
        let state = match source.read(&mut buffer) {
            Ok(0) => IoState::Eof(None),
            Ok(n) => IoState::Data(buffer[..n].to_vec()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => IoState::Eof(Some(err)),
        };
        drop(guard);
        let done = matches!(state, IoState::Eof(_));
        trace!("{} read {:?}", channel, state);
        if tx.send(IoEvent::new(channel, state)).is_err() || done {
            break;
        }
    }
    debug!("Reader for {} stopped", channel);
}

/// Block until `fd` is readable, has hung up, or `timeout` passed.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `pollfd` is a valid, exclusively borrowed array of length 1.
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret > 0)
}

/// Start a thread writing everything from `input` to the process's stdin.
pub(crate) fn launch_stream_writer(
    name: String,
    stream: SharedStream<ChildStdin>,
    input: Receiver<Input>,
    tx: Sender<IoEvent>,
) -> Result<Worker> {
    Worker::spawn(name, move |exit| write_stream(stream, input, tx, exit))
}

fn write_stream(
    stream: SharedStream<ChildStdin>,
    input: Receiver<Input>,
    tx: Sender<IoEvent>,
    exit: Arc<AtomicBool>,
) {
    while !exit.load(Ordering::Relaxed) {
        let data = match input.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(Some(data)) => data,
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                // End-marker: dropping the handle closes the pipe.
                let closed = lock(&stream).take().is_some();
                if closed {
                    let _ = tx.send(IoEvent::new(Channel::Stdin, IoState::Eof(None)));
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
        };
        let mut guard = lock(&stream);
        let Some(sink) = guard.as_mut() else {
            break;
        };
        if let Err(err) = sink.write_all(&data).and_then(|_| sink.flush()) {
            warn!("Failed to write {} bytes to stdin: {}", data.len(), err);
            guard.take();
            drop(guard);
            let _ = tx.send(IoEvent::new(Channel::Stdin, IoState::Eof(Some(err))));
            break;
        }
        trace!("Wrote {} bytes to stdin", data.len());
    }
    debug!("Writer for stdin stopped");
}

/// Start a thread reporting the termination of `child`.
pub(crate) fn launch_process_waiter(
    name: String,
    child: SharedChild,
    tx: Sender<IoEvent>,
) -> Result<Worker> {
    Worker::spawn(name, move |exit| wait_child(child, tx, exit))
}

fn wait_child(child: SharedChild, tx: Sender<IoEvent>, exit: Arc<AtomicBool>) {
    while !exit.load(Ordering::Relaxed) {
        let status = get_process_status(&mut lock(&child));
        match status {
            Ok(ProcessStatus::Running) => sleep(WAIT_POLL_INTERVAL),
            Ok(ProcessStatus::Done(status)) => {
                debug!("Process exited with {}", status);
                let _ = tx.send(IoEvent::new(Channel::Process, IoState::ProcessExit));
                return;
            }
            Err(err) => {
                warn!("Failed to get process status - {}", err);
                let _ = tx.send(IoEvent::new(Channel::Process, IoState::ProcessExit));
                return;
            }
        }
    }
    debug!("Waiter stopped before the process exited");
}

#[cfg(test)]
mod tests {
    use std::{
        process::{Child, Stdio},
        sync::mpsc::channel,
    };

    use ntest::timeout;

    use super::*;
    use crate::{
        command::{Command, SpawnOptions},
        process::{Capture, spawn_process},
    };

    fn spawn(line: &str, stdin: Stdio, capture: Capture) -> Child {
        spawn_process(&Command::shell(line), &SpawnOptions::default(), stdin, capture).unwrap()
    }

    fn shared<T>(value: Option<T>) -> SharedStream<T> {
        Arc::new(Mutex::new(value))
    }

    #[test]
    #[timeout(5000)]
    fn reader_sends_data_then_eof() {
        let mut child = spawn("printf hello", Stdio::null(), Capture::STDOUT);
        let (tx, rx) = channel();
        let stream = shared(child.stdout.take());
        let mut reader =
            launch_stream_reader(String::from("reader"), Channel::Stdout, stream, tx, 1024)
                .unwrap();

        let mut data = Vec::new();
        loop {
            let event = rx.recv().unwrap();
            assert_eq!(event.channel, Channel::Stdout);
            match event.state {
                IoState::Data(bytes) => data.extend(bytes),
                IoState::Eof(reason) => {
                    assert!(reason.is_none());
                    break;
                }
                IoState::ProcessExit => panic!("reader must not report process exit"),
            }
        }
        reader.join().unwrap();
        assert_eq!(data, b"hello");
        assert!(rx.recv().is_err(), "at most one terminal event");
        child.wait().unwrap();
    }

    #[test]
    #[timeout(5000)]
    fn reader_stops_on_request() {
        let mut child = spawn("sleep 5", Stdio::null(), Capture::STDOUT);
        let (tx, rx) = channel();
        let stream = shared(child.stdout.take());
        let mut reader =
            launch_stream_reader(String::from("reader"), Channel::Stdout, stream, tx, 16).unwrap();
        assert!(reader.is_alive());
        reader.request_exit();
        reader.join().unwrap();
        assert!(!reader.is_alive());
        assert!(rx.try_recv().is_err());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    #[timeout(5000)]
    fn reader_stops_when_stream_is_taken() {
        let mut child = spawn("sleep 5", Stdio::null(), Capture::STDOUT);
        let (tx, rx) = channel();
        let stream = shared(child.stdout.take());
        let mut reader = launch_stream_reader(
            String::from("reader"),
            Channel::Stdout,
            Arc::clone(&stream),
            tx,
            16,
        )
        .unwrap();
        drop(lock(&stream).take());
        reader.join().unwrap();
        assert!(rx.try_recv().is_err());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    #[timeout(5000)]
    fn writer_closes_stdin_on_end_marker() {
        let mut child = spawn("cat", Stdio::piped(), Capture::STDOUT);
        let (tx, rx) = channel();
        let (input_tx, input_rx) = channel();
        let stdin = shared(child.stdin.take());
        let mut writer =
            launch_stream_writer(String::from("writer"), Arc::clone(&stdin), input_rx, tx)
                .unwrap();
        input_tx.send(Some(b"abc".to_vec())).unwrap();
        input_tx.send(None).unwrap();

        let event = rx.recv().unwrap();
        assert_eq!(event.channel, Channel::Stdin);
        assert!(matches!(event.state, IoState::Eof(None)));
        writer.join().unwrap();
        assert!(lock(&stdin).is_none());

        let mut output = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut output)
            .unwrap();
        assert_eq!(output, "abc");
        child.wait().unwrap();
    }

    #[test]
    #[timeout(5000)]
    fn waiter_reports_exit_once() {
        let child = spawn("exit 4", Stdio::null(), Capture::NONE);
        let child = Arc::new(Mutex::new(child));
        let (tx, rx) = channel();
        let mut waiter =
            launch_process_waiter(String::from("waiter"), Arc::clone(&child), tx).unwrap();
        let event = rx.recv().unwrap();
        assert_eq!(event.channel, Channel::Process);
        assert!(matches!(event.state, IoState::ProcessExit));
        waiter.join().unwrap();
        assert!(rx.recv().is_err());
        assert_eq!(lock(&child).wait().unwrap().code(), Some(4));
    }

    #[test]
    #[timeout(5000)]
    fn waiter_stops_on_request() {
        let child = Arc::new(Mutex::new(spawn("sleep 5", Stdio::null(), Capture::NONE)));
        let (tx, rx) = channel();
        let mut waiter =
            launch_process_waiter(String::from("waiter"), Arc::clone(&child), tx).unwrap();
        waiter.request_exit();
        waiter.join().unwrap();
        assert!(rx.try_recv().is_err());
        let mut child = lock(&child);
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
