//! Process orchestrator running the roles of a scenario in isolated workers.
//!
//! Roles run as forked OS processes rather than threads: a wedged transport
//! inside one role can be killed from the outside without corrupting the
//! orchestrator or its sibling. Workers coordinate only through the
//! completion channel and the barriers a scenario creates before spawning.
//! The orchestrator raises at most one error per run, and only after every
//! worker it spawned has exited.

mod barrier;
mod completion;
mod job;
mod role;

use std::fmt;
use std::time::{Duration, Instant};

use nix::sys::wait::WaitStatus;

pub use barrier::RoleBarrier;
pub use completion::{Completion, CompletionChannel, RECORD_LEN, Received};
pub use job::JobState;
pub use role::{Role, RoleBody, RoleContext, WorkerSettings};

use job::Job;

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with a status code
    Code(i32),
    /// Killed by a signal
    Signaled(String),
    /// Exit status could not be determined
    Unknown,
}

impl From<WaitStatus> for WorkerExit {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => WorkerExit::Code(code),
            WaitStatus::Signaled(_, signal, _) => WorkerExit::Signaled(signal.as_str().to_string()),
            _ => WorkerExit::Unknown,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Code(code) => write!(f, "exit code {code}"),
            WorkerExit::Signaled(signal) => write!(f, "killed by {signal}"),
            WorkerExit::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Diagnostic summary of one reaped worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    /// Role name
    pub name: String,
    /// Process id the worker ran as
    pub pid: i32,
    /// How the process ended
    pub exit: WorkerExit,
}

impl fmt::Display for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.pid, self.exit)
    }
}

/// Outcome of a run in which every role succeeded.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Every worker, in role order
    pub workers: Vec<WorkerRecord>,
    /// Time from the first spawn until the last completion
    pub elapsed: Duration,
}

/// Single error raised for a failed run.
///
/// A role failure and a timeout are always distinguishable: the former is a
/// report received in time, the latter the absence of one.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("timed out after {timeout:?} waiting for {}", outstanding.join(", "))]
    TimedOut {
        outstanding: Vec<String>,
        workers: Vec<WorkerRecord>,
        timeout: Duration,
    },

    #[error("role {role} failed")]
    RoleFailed {
        role: String,
        workers: Vec<WorkerRecord>,
    },

    #[error("role {role} exited without reporting completion")]
    RoleVanished {
        role: String,
        workers: Vec<WorkerRecord>,
    },

    #[error("failed to spawn worker for role {role}: {source}")]
    Spawn { role: String, source: nix::Error },

    #[error("completion channel error: {0}")]
    Channel(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Returns the banner-style diagnostic shown to whoever runs the suite.
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::TimedOut {
                outstanding,
                timeout,
                ..
            } => format!(
                "\n\n        T I M E O U T\n\n    \
                 It looks like the transport hangs: {} did not finish within {:.1}s.\n\n    \
                 Check the output above to see where each role got stuck.\n",
                outstanding.join(" and "),
                timeout.as_secs_f64()
            ),
            OrchestratorError::RoleFailed { role, workers }
            | OrchestratorError::RoleVanished { role, workers } => {
                let pid = workers
                    .iter()
                    .find(|w| &w.name == role)
                    .map(|w| w.pid.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let cause = match self {
                    OrchestratorError::RoleVanished { .. } => "exited without reporting",
                    _ => "crashed",
                };
                format!(
                    "\n\n        C R A S H\n\n    \
                     Role {role} ({pid}) {cause}.\n\n    \
                     Check the error message above.\n"
                )
            }
            OrchestratorError::Spawn { role, source } => {
                format!("Could not start role {role}: {source}")
            }
            OrchestratorError::Channel(e) => format!("Lost contact with the workers: {e}"),
        }
    }

    /// Returns the reaped workers, if the run got as far as spawning them.
    pub fn workers(&self) -> &[WorkerRecord] {
        match self {
            OrchestratorError::TimedOut { workers, .. }
            | OrchestratorError::RoleFailed { workers, .. }
            | OrchestratorError::RoleVanished { workers, .. } => workers,
            OrchestratorError::Spawn { .. } | OrchestratorError::Channel(_) => &[],
        }
    }

    /// Checks if the run failed because the deadline passed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, OrchestratorError::TimedOut { .. })
    }
}

/// Runs every role in its own worker process under one deadline.
///
/// Waits for completions with a budget recomputed from the deadline. The
/// first failed completion, a worker exiting without a report, or the
/// deadline passing ends the wait; every still-running worker is then
/// killed, every worker is reaped and the single classified error is
/// returned.
///
/// # Errors
///
/// - `OrchestratorError::TimedOut` - If roles were outstanding at the deadline
/// - `OrchestratorError::RoleFailed` - If a role reported failure
/// - `OrchestratorError::RoleVanished` - If a worker exited without reporting
/// - `OrchestratorError::Spawn` - If a worker could not be forked
/// - `OrchestratorError::Channel` - If the completion channel failed
pub fn run_roles(
    roles: Vec<Role>,
    timeout: Duration,
    settings: &WorkerSettings,
) -> Result<RunReport, OrchestratorError> {
    let started = Instant::now();
    let names: Vec<String> = roles.iter().map(|r| r.name().to_string()).collect();
    tracing::info!("running {} with a {:.1}s deadline", names.join(", "), timeout.as_secs_f64());

    let mut job = Job::spawn(roles, timeout, settings)?;
    if let Err(e) = job.wait() {
        tracing::error!("completion channel failed: {e}");
        job.terminate();
        return Err(OrchestratorError::Channel(e));
    }
    job.finish(started)
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    use super::*;

    fn records() -> Vec<WorkerRecord> {
        vec![
            WorkerRecord {
                name: "client".to_string(),
                pid: 41,
                exit: WorkerExit::Code(1),
            },
            WorkerRecord {
                name: "server".to_string(),
                pid: 42,
                exit: WorkerExit::Signaled("SIGKILL".to_string()),
            },
        ]
    }

    #[test]
    fn test_timeout_banner_names_outstanding_roles() {
        let err = OrchestratorError::TimedOut {
            outstanding: vec!["server".to_string()],
            workers: records(),
            timeout: Duration::from_secs(1),
        };
        let message = err.user_message();
        assert!(message.contains("T I M E O U T"));
        assert!(message.contains("server"));
        assert!(err.is_timeout());
        assert_eq!(err.workers().len(), 2);
    }

    #[test]
    fn test_crash_banner_names_role_and_pid() {
        let err = OrchestratorError::RoleFailed {
            role: "client".to_string(),
            workers: records(),
        };
        let message = err.user_message();
        assert!(message.contains("C R A S H"));
        assert!(message.contains("client (41) crashed"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_vanished_banner() {
        let err = OrchestratorError::RoleVanished {
            role: "server".to_string(),
            workers: records(),
        };
        assert!(err.user_message().contains("server (42) exited without reporting"));
        assert_eq!(err.to_string(), "role server exited without reporting completion");
    }

    #[test]
    fn test_worker_exit_from_wait_status() {
        let pid = Pid::from_raw(7);
        assert_eq!(WorkerExit::from(WaitStatus::Exited(pid, 3)), WorkerExit::Code(3));
        assert_eq!(
            WorkerExit::from(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            WorkerExit::Signaled("SIGKILL".to_string())
        );
        assert_eq!(WorkerExit::Code(0).to_string(), "exit code 0");
    }

    #[test]
    fn test_no_roles_completes_immediately() {
        let report = run_roles(Vec::new(), Duration::from_secs(1), &WorkerSettings::default())
            .unwrap();
        assert!(report.workers.is_empty());
    }
}
