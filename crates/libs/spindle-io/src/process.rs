//! Low-level process management utilities.

use std::{
    io,
    os::unix::process::ExitStatusExt,
    process::{Child, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    thread::sleep,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    command::{Command, SpawnOptions},
    prelude::*,
};

/// Printed when spawning fails with `E2BIG`, which on Linux usually means the
/// stack size limit is large enough to shrink the room left for arguments.
pub const ARG_LIST_TOO_LONG_HINT: &str = "use 'ulimit -s' to see the current stack size limit \
     and e.g. 'ulimit -s 8192' to reduce it";

/// How long a terminated process may take to exit before it is killed.
pub const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(2);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which output streams get a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capture {
    pub stdout: bool,
    pub stderr: bool,
}

impl Capture {
    pub const NONE: Capture = Capture {
        stdout: false,
        stderr: false,
    };
    pub const STDOUT: Capture = Capture {
        stdout: true,
        stderr: false,
    };
    pub const STDERR: Capture = Capture {
        stdout: false,
        stderr: true,
    };
    pub const BOTH: Capture = Capture {
        stdout: true,
        stderr: true,
    };
}

/// Current status of a running process.
pub enum ProcessStatus {
    /// Process has completed with exit status.
    Done(ExitStatus),
    /// Process is still running.
    Running,
}

/// A child process shared between the runner and its waiter thread.
pub(crate) type SharedChild = Arc<Mutex<Child>>;

/// Lock a mutex, recovering the data if a thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawn a process with the given stdin and a pipe for every captured stream.
///
/// Streams that are not captured are inherited from the parent.
pub fn spawn_process(
    command: &Command,
    options: &SpawnOptions,
    stdin: Stdio,
    capture: Capture,
) -> Result<Child> {
    let spawn_error = |source: io::Error, hint| Error::Spawn {
        command: command.to_string(),
        source,
        hint,
    };
    let (program, args) = command.program_and_args().ok_or_else(|| {
        spawn_error(
            io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"),
            None,
        )
    })?;

    let mut process = std::process::Command::new(program);
    process.args(args);
    options.apply(&mut process);
    process
        .stdin(stdin)
        .stdout(piped_or_inherit(capture.stdout))
        .stderr(piped_or_inherit(capture.stderr));

    let child = process.spawn().map_err(|err| {
        if err.raw_os_error() == Some(libc::E2BIG) {
            error!(
                "Caught exception suggesting too large stack size limits. Hint: {}",
                ARG_LIST_TOO_LONG_HINT
            );
            spawn_error(err, Some(ARG_LIST_TOO_LONG_HINT))
        } else {
            spawn_error(err, None)
        }
    })?;
    info!("Spawned '{}' as pid {}", command, child.id());
    Ok(child)
}

fn piped_or_inherit(piped: bool) -> Stdio {
    if piped { Stdio::piped() } else { Stdio::inherit() }
}

/// Check process status without blocking.
pub fn get_process_status(child: &mut Child) -> Result<ProcessStatus> {
    match child.try_wait()? {
        Some(exit_status) => Ok(ProcessStatus::Done(exit_status)),
        None => Ok(ProcessStatus::Running),
    }
}

/// Terminate a child process.
///
/// Killing a process that has already been reaped is not an error.
pub fn stop_child(child: &mut Child) -> Result<()> {
    if let ProcessStatus::Done(_) = get_process_status(child)? {
        return Ok(());
    }
    match child.kill() {
        Err(err) if err.kind() != io::ErrorKind::InvalidInput => Err(err.into()),
        _ => Ok(()),
    }
}

/// Ask a child process to terminate with `SIGTERM` and reap it.
///
/// A child still running after `grace` is killed. Returns the exit code.
pub fn terminate_child(child: &mut Child, grace: Duration) -> Result<Option<i32>> {
    if let ProcessStatus::Done(status) = get_process_status(child)? {
        return Ok(exit_code(status));
    }
    let pid = child.id() as libc::pid_t;
    // SAFETY: the child is not reaped yet, so `pid` still names it.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let ProcessStatus::Done(status) = get_process_status(child)? {
            return Ok(exit_code(status));
        }
        sleep(TERMINATE_POLL_INTERVAL);
    }
    warn!("pid {} still running {:?} after SIGTERM, killing it", pid, grace);
    stop_child(child)?;
    capture_exit_status(child)
}

/// Wait for the child to exit and return its exit code.
///
/// Returns immediately with the cached status once the child was reaped.
pub fn capture_exit_status(child: &mut Child) -> Result<Option<i32>> {
    Ok(exit_code(child.wait()?))
}

/// Exit code of a finished process. A process killed by a signal reports the
/// negated signal number.
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|signal| -signal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(line: &str) -> Child {
        spawn_process(
            &Command::shell(line),
            &SpawnOptions::default(),
            Stdio::null(),
            Capture::NONE,
        )
        .unwrap()
    }

    #[test]
    fn exit_code_of_finished_process() {
        let mut child = spawn("exit 3");
        assert_eq!(capture_exit_status(&mut child).unwrap(), Some(3));
        // Waiting again reports the cached status.
        assert_eq!(capture_exit_status(&mut child).unwrap(), Some(3));
    }

    #[test]
    fn stop_child_reports_signal() {
        let mut child = spawn("sleep 30");
        assert!(matches!(
            get_process_status(&mut child).unwrap(),
            ProcessStatus::Running
        ));
        stop_child(&mut child).unwrap();
        assert_eq!(
            capture_exit_status(&mut child).unwrap(),
            Some(-libc::SIGKILL)
        );
        // Stopping a reaped child is a no-op.
        stop_child(&mut child).unwrap();
    }

    #[test]
    fn terminate_child_lets_the_process_clean_up() {
        let mut child = spawn("trap 'exit 7' TERM; while true; do sleep 0.05; done");
        // Give the shell time to install its handler.
        sleep(Duration::from_millis(200));
        assert_eq!(
            terminate_child(&mut child, TERMINATE_GRACE_PERIOD).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn terminate_child_kills_after_grace_period() {
        let mut child = spawn("trap '' TERM; while true; do sleep 0.05; done");
        sleep(Duration::from_millis(200));
        let started = Instant::now();
        assert_eq!(
            terminate_child(&mut child, Duration::from_millis(300)).unwrap(),
            Some(-libc::SIGKILL)
        );
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn terminate_child_of_finished_process() {
        let mut child = spawn("exit 2");
        capture_exit_status(&mut child).unwrap();
        assert_eq!(
            terminate_child(&mut child, TERMINATE_GRACE_PERIOD).unwrap(),
            Some(2)
        );
    }

    #[test]
    fn spawn_failure() {
        let err = spawn_process(
            &Command::argv(["/nonexistent/spindle-test-binary"]),
            &SpawnOptions::default(),
            Stdio::null(),
            Capture::BOTH,
        )
        .unwrap_err();
        match err {
            Error::Spawn { source, hint, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
                assert!(hint.is_none());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = spawn_process(
            &Command::Argv(Vec::new()),
            &SpawnOptions::default(),
            Stdio::null(),
            Capture::NONE,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn spawn_options_are_forwarded() {
        let child = spawn_process(
            &Command::shell("test \"$SPINDLE_TEST_VAR\" = yes && test \"$(pwd)\" = /"),
            &SpawnOptions::default().env("SPINDLE_TEST_VAR", "yes").cwd("/"),
            Stdio::null(),
            Capture::NONE,
        );
        let mut child = child.unwrap();
        assert_eq!(capture_exit_status(&mut child).unwrap(), Some(0));
    }
}
