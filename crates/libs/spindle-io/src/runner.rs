//! High-level process runner driving a [`Protocol`].

use std::{
    collections::{HashMap, HashSet},
    io,
    process::{Child, ChildStderr, ChildStdin, ChildStdout},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use crate::{
    channel::Channel,
    command::{Command, Input, InputSender, SpawnOptions, StdinSource},
    config::RunnerConfig,
    error::CommandError,
    generator::ResultGenerator,
    prelude::*,
    process::{
        ProcessStatus, SharedChild, TERMINATE_GRACE_PERIOD, capture_exit_status, exit_code,
        get_process_status, lock, spawn_process, stop_child, terminate_child,
    },
    protocol::Protocol,
    threads::{
        IoEvent, IoState, SharedStream, Worker, launch_process_waiter, launch_stream_reader,
        launch_stream_writer,
    },
};

/// Result of a blocking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished<T> {
    /// What the protocol prepared.
    pub result: T,
    /// Exit code of the process. Negative values are terminating signals.
    pub return_code: Option<i32>,
}

/// What [`Runner::run`] hands back, depending on the protocol.
pub enum RunOutput<P: Protocol> {
    /// The process ran to completion.
    Finished(Finished<P::Output>),
    /// The protocol is a generator. The process runs while results are pulled.
    Generator(ResultGenerator<P>),
}

impl<P: Protocol> RunOutput<P> {
    /// The finished run, or `None` for a generator protocol.
    pub fn into_finished(self) -> Option<Finished<P::Output>> {
        match self {
            RunOutput::Finished(finished) => Some(finished),
            RunOutput::Generator(_) => None,
        }
    }

    /// The generator, or `None` if the protocol is not a generator.
    pub fn into_generator(self) -> Option<ResultGenerator<P>> {
        match self {
            RunOutput::Finished(_) => None,
            RunOutput::Generator(generator) => Some(generator),
        }
    }
}

/// Runs one command, feeding everything the process does to a protocol.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle_io::{CaptureProtocol, Runner};
///
/// let finished = Runner::new("echo hello", CaptureProtocol::stdout)
///     .run()
///     .unwrap()
///     .into_finished()
///     .unwrap();
/// assert_eq!(finished.result.stdout_text(), "hello\n");
/// assert_eq!(finished.return_code, Some(0));
/// ```
pub struct Runner<F> {
    command: Command,
    factory: F,
    stdin: StdinSource,
    options: SpawnOptions,
    config: RunnerConfig,
}

impl<F> Runner<F> {
    /// Create a runner for `command`. `factory` creates the protocol when the
    /// run starts.
    pub fn new(command: impl Into<Command>, factory: F) -> Self {
        Self {
            command: command.into(),
            factory,
            stdin: StdinSource::default(),
            options: SpawnOptions::default(),
            config: RunnerConfig::default(),
        }
    }

    /// Where the process reads stdin from. Inherited by default.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use spindle_io::{CaptureProtocol, Runner};
    ///
    /// let finished = Runner::new("cat", CaptureProtocol::stdout)
    ///     .stdin("hello")
    ///     .run()
    ///     .unwrap()
    ///     .into_finished()
    ///     .unwrap();
    /// assert_eq!(finished.result.stdout_text(), "hello");
    /// ```
    pub fn stdin(mut self, stdin: impl Into<StdinSource>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Working directory and environment of the process.
    pub fn options(mut self, options: SpawnOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace every runner setting at once. Checked when the run starts.
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Report channels that stay quiet for `timeout` to the protocol.
    /// `None` disables timeouts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use spindle_io::{NoCapture, Runner};
    /// use std::time::Duration;
    ///
    /// let runner = Runner::new("sleep 10", NoCapture::default)
    ///     .timeout(Some(Duration::from_secs(2)));
    /// assert_eq!(runner.get_full_command(), "sleep 10");
    /// ```
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Whether a non-zero exit code fails the run with a
    /// [`CommandError`](crate::CommandError). On by default.
    pub fn exception_on_error(mut self, exception_on_error: bool) -> Self {
        self.config.exception_on_error = exception_on_error;
        self
    }

    /// Longest time the event loop waits for an event before re-checking
    /// whether there is work left.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    /// Get the full command string with arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use spindle_io::{NoCapture, Runner};
    ///
    /// let runner = Runner::new(vec!["ls", "-la"], NoCapture::default);
    /// assert_eq!(runner.get_full_command(), "ls -la");
    /// ```
    pub fn get_full_command(&self) -> String {
        self.command.to_string()
    }

    /// Spawn the process and drive it.
    ///
    /// For a generator protocol this returns right after the worker threads
    /// are started; the process is then driven by pulling from the returned
    /// [`ResultGenerator`]. Otherwise the process runs to completion first.
    ///
    /// Fails with [`Error::Config`] before spawning anything when the
    /// settings are unusable.
    pub fn run<P>(self) -> Result<RunOutput<P>>
    where
        F: FnOnce() -> P,
        P: Protocol,
    {
        let Runner {
            command,
            factory,
            stdin,
            options,
            config,
        } = self;
        config.validate()?;

        let (stdin, input) = stdin.normalize();
        let protocol = factory();
        let child = spawn_process(&command, &options, stdin, protocol.capture())?;
        let generator = protocol.is_generator();
        let execution = Execution::start(command, config, protocol, child, input)?;

        if generator {
            return Ok(RunOutput::Generator(ResultGenerator::new(execution)));
        }
        Ok(RunOutput::Finished(execution.process_loop()?))
    }
}

/// Run a command in a subprocess.
///
/// Shorthand for building a [`Runner`] and calling [`Runner::run`].
pub fn run_command<F, P>(
    command: impl Into<Command>,
    factory: F,
    stdin: impl Into<StdinSource>,
    config: RunnerConfig,
) -> Result<RunOutput<P>>
where
    F: FnOnce() -> P,
    P: Protocol,
{
    Runner::new(command, factory)
        .stdin(stdin)
        .config(config)
        .run()
}

/// Stream handles of a spawned process.
///
/// Fixed at spawn time. Closing a stream empties its slot, which makes any
/// worker still holding the slot stop.
struct ChannelRegistry {
    stdin: Option<SharedStream<ChildStdin>>,
    stdout: Option<SharedStream<ChildStdout>>,
    stderr: Option<SharedStream<ChildStderr>>,
}

fn shared<T>(stream: Option<T>) -> Option<SharedStream<T>> {
    stream.map(|s| Arc::new(Mutex::new(Some(s))))
}

fn take<T>(stream: &Option<SharedStream<T>>) -> bool {
    stream.as_ref().is_some_and(|s| lock(s).take().is_some())
}

impl ChannelRegistry {
    fn from_child(child: &mut Child) -> Self {
        Self {
            stdin: shared(child.stdin.take()),
            stdout: shared(child.stdout.take()),
            stderr: shared(child.stderr.take()),
        }
    }

    /// Close the stream behind `channel`. Closing a closed stream does nothing.
    fn close(&self, channel: Channel) -> bool {
        let closed = match channel {
            Channel::Stdin => take(&self.stdin),
            Channel::Stdout => take(&self.stdout),
            Channel::Stderr => take(&self.stderr),
            Channel::Process => false,
        };
        if closed {
            debug!("Closed {}", channel);
        }
        closed
    }
}

/// State of one run. Only the thread consuming the event queue touches it.
pub(crate) struct Execution<P: Protocol> {
    command: Command,
    config: RunnerConfig,
    pub(crate) protocol: P,
    child: SharedChild,
    registry: ChannelRegistry,
    /// Channels still monitored. `Process` is in here while the process runs.
    active: HashSet<Channel>,
    /// Last activity per channel, only kept when a timeout is configured.
    last_touched: Option<HashMap<Channel, Instant>>,
    events: Receiver<IoEvent>,
    /// An event taken off the queue while checking whether it is empty.
    pending: Option<IoEvent>,
    workers: Vec<Worker>,
    /// Present when the runner writes stdin itself.
    stdin_queue: Option<InputSender>,
    return_code: Option<i32>,
}

impl<P: Protocol> Execution<P> {
    fn start(
        command: Command,
        config: RunnerConfig,
        protocol: P,
        mut child: Child,
        input: Option<(InputSender, Receiver<Input>)>,
    ) -> Result<Self> {
        let pid = child.id();
        let registry = ChannelRegistry::from_child(&mut child);
        let (tx, events) = mpsc::channel();
        let mut execution = Self {
            command,
            config,
            protocol,
            child: Arc::new(Mutex::new(child)),
            registry,
            active: HashSet::from([Channel::Process]),
            last_touched: config.timeout.map(|_| HashMap::new()),
            events,
            pending: None,
            workers: Vec::new(),
            stdin_queue: None,
            return_code: None,
        };
        // From here on, dropping `execution` reaps the process on failure.
        execution.protocol.connection_made(pid)?;

        let name = execution.command.short_name();
        let now = Instant::now();
        execution.touch(Channel::Process, now);

        if let Some(stream) = &execution.registry.stderr {
            execution.workers.push(launch_stream_reader(
                format!("STDERR: {name}"),
                Channel::Stderr,
                Arc::clone(stream),
                tx.clone(),
                execution.config.read_chunk_size,
            )?);
            execution.active.insert(Channel::Stderr);
            execution.touch(Channel::Stderr, now);
        }
        if let Some(stream) = &execution.registry.stdout {
            execution.workers.push(launch_stream_reader(
                format!("STDOUT: {name}"),
                Channel::Stdout,
                Arc::clone(stream),
                tx.clone(),
                execution.config.read_chunk_size,
            )?);
            execution.active.insert(Channel::Stdout);
            execution.touch(Channel::Stdout, now);
        }
        if let (Some((sender, receiver)), Some(stream)) = (input, &execution.registry.stdin) {
            // stdin is never monitored for timeouts.
            execution.workers.push(launch_stream_writer(
                format!("STDIN: {name}"),
                Arc::clone(stream),
                receiver,
                tx.clone(),
            )?);
            execution.active.insert(Channel::Stdin);
            execution.stdin_queue = Some(sender);
        }
        execution.workers.push(launch_process_waiter(
            String::from("process_waiter"),
            Arc::clone(&execution.child),
            tx,
        )?);
        Ok(execution)
    }

    pub(crate) fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    fn touch(&mut self, channel: Channel, now: Instant) {
        if let Some(last_touched) = &mut self.last_touched {
            last_touched.insert(channel, now);
        }
    }

    fn untouch(&mut self, channel: Channel) {
        if let Some(last_touched) = &mut self.last_touched {
            last_touched.remove(&channel);
        }
    }

    /// Whether the event loop has work left.
    ///
    /// A worker may be about to send its last event after the active set
    /// emptied, so queued events and live workers keep the loop going too.
    pub(crate) fn should_continue(&mut self) -> bool {
        if !self.active.is_empty() {
            return true;
        }
        if self.pending.is_none() {
            self.pending = self.events.try_recv().ok();
        }
        self.pending.is_some() || self.workers.iter().any(Worker::is_alive)
    }

    /// Handle one event from the queue.
    ///
    /// Expired channels are reported before the event is handled, so a busy
    /// channel cannot hold back the timeouts of a quiet one.
    pub(crate) fn process_queue(&mut self) -> Result<()> {
        let event = loop {
            if let Some(event) = self.pending.take() {
                break event;
            }
            match self.events.recv_timeout(self.next_wait(Instant::now())) {
                Ok(event) => break event,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.should_continue() {
                        return Ok(());
                    }
                    self.process_timeouts()?;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Every worker is gone, nothing can retire what is left.
                    if !self.active.is_empty() {
                        warn!("All workers stopped while {:?} still active", self.active);
                        self.active.clear();
                        if let Some(last_touched) = &mut self.last_touched {
                            last_touched.clear();
                        }
                    }
                    return Ok(());
                }
            }
        };
        self.process_timeouts()?;
        self.handle_event(event)
    }

    /// How long to wait for the next event: the poll interval, or less when
    /// a channel expires before it.
    fn next_wait(&self, now: Instant) -> Duration {
        let (Some(timeout), Some(last_touched)) = (self.config.timeout, &self.last_touched) else {
            return self.config.poll_interval;
        };
        last_touched
            .values()
            .map(|touched| (*touched + timeout).saturating_duration_since(now))
            .min()
            .map_or(self.config.poll_interval, |due| {
                due.min(self.config.poll_interval)
            })
    }

    fn handle_event(&mut self, event: IoEvent) -> Result<()> {
        trace!("Event {:?}", event);
        let IoEvent { channel, state } = event;
        match state {
            IoState::ProcessExit => self.remove_process(),
            IoState::Data(data) => {
                if !self.active.contains(&channel) {
                    trace!("Dropping {} bytes read from retired {}", data.len(), channel);
                    return Ok(());
                }
                self.touch(channel, Instant::now());
                self.protocol.pipe_data_received(channel, &data)
            }
            IoState::Eof(reason) => self.remove_channel(channel, reason.as_ref()),
        }
    }

    fn process_timeouts(&mut self) -> Result<()> {
        let (Some(timeout), Some(last_touched)) = (self.config.timeout, &mut self.last_touched)
        else {
            return Ok(());
        };
        let now = Instant::now();
        let mut expired: Vec<Channel> = last_touched
            .iter()
            .filter(|(_, touched)| now.duration_since(**touched) >= timeout)
            .map(|(channel, _)| *channel)
            .collect();
        expired.sort();
        // Restart the clock whatever the protocol answers, so a quiet
        // channel is reported once per timeout and not on every poll.
        for channel in expired.iter() {
            last_touched.insert(*channel, now);
        }

        for channel in expired {
            if !self.active.contains(&channel) {
                continue;
            }
            debug!("{} timed out after {:?}", channel, timeout);
            if !self.protocol.timeout(channel)? {
                continue;
            }
            match channel {
                Channel::Process => self.terminate_process()?,
                _ => {
                    info!("Closing {} on protocol request", channel);
                    self.remove_channel(channel, None)?;
                }
            }
        }
        Ok(())
    }

    fn terminate_process(&mut self) -> Result<()> {
        info!("Terminating '{}' on protocol request", self.command);
        terminate_child(&mut lock(&self.child), TERMINATE_GRACE_PERIOD)?;
        // Descendants may still hold the pipes open.
        for channel in Channel::STREAMS {
            self.remove_channel(channel, None)?;
        }
        self.remove_process()
    }

    /// Retire the process. The runner stops feeding stdin from now on.
    fn remove_process(&mut self) -> Result<()> {
        if !self.active.remove(&Channel::Process) {
            // Already retired after a timeout-triggered termination.
            return Ok(());
        }
        self.untouch(Channel::Process);
        self.close_stdin();
        self.return_code = capture_exit_status(&mut lock(&self.child))?;
        debug!("'{}' exited with {:?}", self.command, self.return_code);
        Ok(())
    }

    /// Tell the protocol `channel` is gone, close it and stop monitoring it.
    fn remove_channel(&mut self, channel: Channel, reason: Option<&io::Error>) -> Result<()> {
        if !self.active.contains(&channel) {
            return Ok(());
        }
        self.protocol.pipe_connection_lost(channel, reason)?;
        self.active.remove(&channel);
        self.untouch(channel);
        self.registry.close(channel);
        Ok(())
    }

    /// Queue the end-marker for a runner-managed stdin.
    pub(crate) fn close_stdin(&self) {
        if let Some(queue) = &self.stdin_queue {
            queue.close();
        }
    }

    /// Close every stream without notifying the protocol.
    fn ensure_closed(&mut self) {
        self.close_stdin();
        for channel in Channel::STREAMS {
            self.active.remove(&channel);
            self.untouch(channel);
            self.registry.close(channel);
        }
    }

    fn wait_for_threads(&mut self) -> Result<()> {
        for worker in self.workers.iter() {
            worker.request_exit();
        }
        let mut first_error = None;
        for worker in self.workers.iter_mut() {
            if let Err(err) = worker.join() {
                warn!("Worker '{}' failed - {}", worker.name(), err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn capture_return_code(&mut self) -> Result<Option<i32>> {
        if self.return_code.is_none() {
            let status = get_process_status(&mut lock(&self.child))?;
            if let ProcessStatus::Done(status) = status {
                self.return_code = exit_code(status);
            }
        }
        Ok(self.return_code)
    }

    /// Close all channels, tell the protocol and join every worker.
    pub(crate) fn close_connection(&mut self) -> Result<()> {
        self.ensure_closed();
        self.protocol.connection_lost(None)?;
        self.wait_for_threads()
    }

    /// Fail with a [`CommandError`] if the process did not exit cleanly and
    /// the runner is configured to care.
    pub(crate) fn check_result(&self) -> Result<()> {
        if !self.config.exception_on_error || self.return_code == Some(0) {
            return Ok(());
        }
        let encoding = self.protocol.encoding();
        let decoded = |channel| {
            self.protocol
                .captured(channel)
                .map(|data| encoding.decode(data))
        };
        Err(CommandError {
            command: self.command.to_string(),
            code: self.return_code,
            stdout: decoded(Channel::Stdout),
            stderr: decoded(Channel::Stderr),
        }
        .into())
    }

    /// Drive the process to completion and build the protocol's result.
    pub(crate) fn process_loop(mut self) -> Result<Finished<P::Output>> {
        while self.should_continue() {
            self.process_queue()?;
        }
        // Only now is every byte of stdout and stderr delivered.
        let result = self.protocol.prepare_result()?;
        self.protocol.process_exited()?;
        let return_code = self.capture_return_code()?;
        self.close_connection()?;
        self.check_result()?;
        Ok(Finished {
            result,
            return_code,
        })
    }
}

impl<P: Protocol> Drop for Execution<P> {
    fn drop(&mut self) {
        // Kill first: a writer blocked on a full pipe holds the stdin slot.
        if self.active.remove(&Channel::Process) {
            let mut child = lock(&self.child);
            if let Ok(ProcessStatus::Running) = get_process_status(&mut child) {
                warn!("'{}' abandoned while running, killing it", self.command);
                if let Err(err) = stop_child(&mut child) {
                    warn!("Failed to kill '{}' - {}", self.command, err);
                }
            }
            if let Err(err) = capture_exit_status(&mut child) {
                warn!("Failed to reap '{}' - {}", self.command, err);
            }
        }
        self.ensure_closed();
        if let Err(err) = self.wait_for_threads() {
            warn!("Failed to join workers of '{}' - {}", self.command, err);
        }
    }
}
