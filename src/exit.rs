//! Restart-signal bridge between the watchdog and the supervisor.
//!
//! The two components never call each other: the watchdog can only end its
//! own process, and the supervisor can only observe a process exit. The
//! worker's top-level shutdown path converts the watchdog's restart-required
//! condition into an exit with [`RESTART_EXIT_CODE`], which the supervisor's
//! exit handler recognizes.

use std::process::ExitStatus;

/// Exit code the worker uses when the watchdog requested a restart.
///
/// 75 is EX_TEMPFAIL from sysexits: a temporary failure where trying again
/// is the right response.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Why the worker process is exiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Operator-initiated shutdown; no restart wanted
    Operator,
    /// Watchdog judged connectivity unrecoverable; restart wanted
    HealthRestart,
}

impl ExitReason {
    /// The process exit code the worker should use for this reason
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Operator => 0,
            ExitReason::HealthRestart => RESTART_EXIT_CODE,
        }
    }
}

/// Classification of an observed worker exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with code 0
    Clean,
    /// Exited with the distinguished restart-required code
    RestartRequested,
    /// Exited with any other non-zero code
    Crashed(i32),
    /// Terminated by a signal
    Signaled(i32),
}

impl WorkerExit {
    /// Classify a raw exit status from the OS
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => WorkerExit::Clean,
            Some(RESTART_EXIT_CODE) => WorkerExit::RestartRequested,
            Some(code) => WorkerExit::Crashed(code),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    WorkerExit::Signaled(status.signal().unwrap_or(-1))
                }
                #[cfg(not(unix))]
                WorkerExit::Signaled(-1)
            }
        }
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::Clean => write!(f, "exited cleanly"),
            WorkerExit::RestartRequested => write!(f, "requested restart"),
            WorkerExit::Crashed(code) => write!(f, "crashed with code {}", code),
            WorkerExit::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run_with_code(code: i32) -> ExitStatus {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exit {}", code))
            .status()
            .expect("Failed to run /bin/sh")
    }

    #[test]
    fn test_exit_reason_codes() {
        assert_eq!(ExitReason::Operator.exit_code(), 0);
        assert_eq!(ExitReason::HealthRestart.exit_code(), RESTART_EXIT_CODE);
    }

    #[test]
    fn test_classify_clean_exit() {
        assert_eq!(WorkerExit::from_status(run_with_code(0)), WorkerExit::Clean);
    }

    #[test]
    fn test_classify_restart_requested() {
        assert_eq!(
            WorkerExit::from_status(run_with_code(RESTART_EXIT_CODE)),
            WorkerExit::RestartRequested
        );
    }

    #[test]
    fn test_classify_crash() {
        assert_eq!(
            WorkerExit::from_status(run_with_code(1)),
            WorkerExit::Crashed(1)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_signal() {
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg("kill -KILL $$")
            .status()
            .expect("Failed to run /bin/sh");
        assert_eq!(WorkerExit::from_status(status), WorkerExit::Signaled(9));
    }
}
