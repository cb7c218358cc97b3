//! Exit accounting for out-of-process warper workers.
//!
//! When the warping service runs as a subprocess pool, the supervisor needs
//! to know not just *that* a worker died but *how*: a clean exit code, a
//! signal, or a stop. Collapsing signals into a generic failure loses the
//! information needed to distinguish an OOM kill from a crash.

use std::io;
use std::process::{Child, ExitStatus};
use tracing::debug;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal termination with the given exit code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// Stopped (job control); the process still exists.
    Stopped(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    #[cfg(unix)]
    fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(code) = status.code() {
            return ExitOutcome::Exited(code);
        }
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signaled(signal);
        }
        if let Some(signal) = status.stopped_signal() {
            return ExitOutcome::Stopped(signal);
        }
        // not reachable for a reaped child; treat as failed exit
        ExitOutcome::Exited(1)
    }

    #[cfg(not(unix))]
    fn from_status(status: ExitStatus) -> Self {
        ExitOutcome::Exited(status.code().unwrap_or(1))
    }
}

/// Wait for a child process and classify its end.
pub fn join(child: &mut Child) -> io::Result<ExitOutcome> {
    let status = child.wait()?;
    let outcome = ExitOutcome::from_status(status);
    debug!(pid = child.id(), ?outcome, "joined worker process");
    Ok(outcome)
}

/// Non-blocking variant of [`join`]; `None` while the child is running.
pub fn try_join(child: &mut Child) -> io::Result<Option<ExitOutcome>> {
    Ok(child.try_wait()?.map(ExitOutcome::from_status))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_join_clean_exit() {
        let mut child = Command::new("true").spawn().unwrap();
        let outcome = join(&mut child).unwrap();
        assert_eq!(outcome, ExitOutcome::Exited(0));
        assert!(outcome.success());
    }

    #[test]
    fn test_join_exit_code() {
        let mut child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let outcome = join(&mut child).unwrap();
        assert_eq!(outcome, ExitOutcome::Exited(3));
        assert!(!outcome.success());
    }

    #[test]
    fn test_join_signaled() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        child.kill().unwrap();
        let outcome = join(&mut child).unwrap();
        // SIGKILL
        assert_eq!(outcome, ExitOutcome::Signaled(9));
    }

    #[test]
    fn test_try_join_running() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert_eq!(try_join(&mut child).unwrap(), None);
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
