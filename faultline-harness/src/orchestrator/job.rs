//! Spawning, supervising and reaping the workers of one job.

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use faultline_core::tracing_setup::init_worker_tracing;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use super::completion::{Completion, CompletionChannel, Received};
use super::role::{Role, RoleBody, RoleContext, WorkerSettings};
use super::{OrchestratorError, RunReport, WorkerExit, WorkerRecord};

/// Exit code of a worker whose role body failed or panicked.
const FAILURE_EXIT_CODE: i32 = 1;

/// Lifecycle of a job; every state but `Running` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Roles are still outstanding and the deadline has not passed
    Running,
    /// Every role reported success before the deadline
    AllCompleted,
    /// The deadline passed with roles outstanding
    TimedOut,
    /// A role reported failure, or exited without reporting
    Crashed {
        /// Index of the offending role
        role: usize,
        /// False if the worker vanished without a report
        reported: bool,
    },
}

#[derive(Debug)]
struct Worker {
    name: String,
    pid: Pid,
    reported: bool,
    exit: Option<WorkerExit>,
}

impl Worker {
    fn record(&self) -> WorkerRecord {
        WorkerRecord {
            name: self.name.clone(),
            pid: self.pid.as_raw(),
            exit: self.exit.clone().unwrap_or(WorkerExit::Unknown),
        }
    }
}

/// Set of live workers, their completion channel and the single deadline.
#[derive(Debug)]
pub(crate) struct Job {
    workers: Vec<Worker>,
    channel: CompletionChannel,
    state: JobState,
    timeout: Duration,
    deadline: Instant,
}

impl Job {
    /// Forks one worker per role and starts the deadline.
    ///
    /// Workers already spawned when a later fork fails are killed and
    /// reaped before the error is returned.
    ///
    /// # Fork Safety
    ///
    /// Internally calls `fork()`. Only the forking thread is duplicated, so
    /// the caller must not hold locks that a role body needs, and the role
    /// bodies must not rely on threads of the parent. Each worker leaves
    /// through `std::process::exit` and never returns into the caller.
    ///
    /// # Errors
    ///
    /// - `OrchestratorError::Channel` - If the completion channel cannot be created
    /// - `OrchestratorError::Spawn` - If a worker cannot be forked
    pub(crate) fn spawn(
        roles: Vec<Role>,
        timeout: Duration,
        settings: &WorkerSettings,
    ) -> Result<Self, OrchestratorError> {
        let mut job = Self {
            workers: Vec::with_capacity(roles.len()),
            channel: CompletionChannel::new()?,
            state: JobState::Running,
            timeout,
            deadline: Instant::now() + timeout,
        };

        for (index, role) in roles.into_iter().enumerate() {
            let (name, body) = role.into_parts();
            // Flush so buffered output is not duplicated into the child.
            let _ = std::io::stdout().flush();

            // SAFETY: the child only runs the role body and exits without
            // unwinding into the caller, see the fork safety notes above.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let ctx = RoleContext {
                        index,
                        name,
                        settings: *settings,
                    };
                    let code = run_worker(&job.channel, &ctx, body);
                    let _ = std::io::stdout().flush();
                    std::process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => {
                    tracing::info!("started worker {name} ({child})");
                    job.workers.push(Worker {
                        name,
                        pid: child,
                        reported: false,
                        exit: None,
                    });
                }
                Err(source) => {
                    tracing::error!("failed to fork worker {name}: {source}");
                    job.channel.close_writer();
                    job.terminate();
                    return Err(OrchestratorError::Spawn { role: name, source });
                }
            }
        }

        job.channel.close_writer();
        job.deadline = Instant::now() + timeout;
        Ok(job)
    }

    /// Waits for completions until the job reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - `io::Error` - If the completion channel fails
    pub(crate) fn wait(&mut self) -> std::io::Result<&JobState> {
        while self.state == JobState::Running {
            let outstanding = self.outstanding();
            if outstanding.is_empty() {
                self.state = JobState::AllCompleted;
                break;
            }

            let eta = self.deadline.saturating_duration_since(Instant::now());
            tracing::info!(
                "waiting {:.3}s for {} to finish",
                eta.as_secs_f64(),
                outstanding.join(", ")
            );

            match self.channel.recv_until(self.deadline)? {
                Received::Completion(completion) => self.complete(completion),
                Received::TimedOut => {
                    for worker in self.workers.iter().filter(|w| !w.reported) {
                        tracing::error!("worker {} ({}) timed out", worker.name, worker.pid);
                    }
                    self.state = JobState::TimedOut;
                }
                Received::Closed => {
                    let role = self.workers.iter().position(|w| !w.reported).unwrap_or(0);
                    tracing::error!(
                        "worker {} exited without reporting completion",
                        self.workers[role].name
                    );
                    self.state = JobState::Crashed {
                        role,
                        reported: false,
                    };
                }
            }
        }
        Ok(&self.state)
    }

    fn complete(&mut self, completion: Completion) {
        let Some(worker) = self.workers.get_mut(completion.index) else {
            tracing::warn!(index = completion.index, "completion for unknown worker");
            return;
        };
        if worker.reported {
            tracing::warn!("duplicate completion from worker {}", worker.name);
            return;
        }
        worker.reported = true;
        if worker.exit.is_none() {
            worker.exit = Some(reap(worker.pid));
        }

        if completion.success {
            tracing::info!("worker {} ({}) completed gracefully", worker.name, worker.pid);
        } else {
            tracing::error!("worker {} ({}) failed", worker.name, worker.pid);
            self.state = JobState::Crashed {
                role: completion.index,
                reported: true,
            };
        }
    }

    fn outstanding(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| !w.reported)
            .map(|w| w.name.clone())
            .collect()
    }

    /// Kills every worker that has not been reaped, then reaps all of them.
    pub(crate) fn terminate(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.exit.is_none()) {
            match waitpid(worker.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    tracing::warn!("terminating worker {} ({})", worker.name, worker.pid);
                    if let Err(e) = kill(worker.pid, Signal::SIGKILL) {
                        tracing::warn!("failed to kill worker {}: {e}", worker.name);
                    }
                }
                Ok(status) => worker.exit = Some(WorkerExit::from(status)),
                Err(e) => {
                    tracing::warn!("failed to query worker {}: {e}", worker.name);
                    worker.exit = Some(WorkerExit::Unknown);
                }
            }
        }

        for worker in &mut self.workers {
            match &worker.exit {
                Some(exit) => {
                    tracing::warn!(
                        "worker {} ({}) has already exited: {exit}",
                        worker.name,
                        worker.pid
                    );
                }
                None => {
                    tracing::warn!("waiting for worker {} ({}) to exit", worker.name, worker.pid);
                    let exit = reap(worker.pid);
                    tracing::warn!("worker {} ({}) exited: {exit}", worker.name, worker.pid);
                    worker.exit = Some(exit);
                }
            }
        }
    }

    /// Converts the terminal state into the run's outcome.
    ///
    /// Every worker has exited by the time this returns, on both paths.
    pub(crate) fn finish(mut self, started: Instant) -> Result<RunReport, OrchestratorError> {
        if self.state == JobState::AllCompleted {
            return Ok(RunReport {
                workers: self.records(),
                elapsed: started.elapsed(),
            });
        }

        let outstanding = self.outstanding();
        self.terminate();
        let workers = self.records();
        Err(match self.state {
            JobState::TimedOut => OrchestratorError::TimedOut {
                outstanding,
                workers,
                timeout: self.timeout,
            },
            JobState::Crashed {
                role,
                reported: true,
            } => OrchestratorError::RoleFailed {
                role: self.role_name(role),
                workers,
            },
            JobState::Crashed {
                role,
                reported: false,
            } => OrchestratorError::RoleVanished {
                role: self.role_name(role),
                workers,
            },
            JobState::Running | JobState::AllCompleted => OrchestratorError::Channel(
                std::io::Error::other("job finished while still running"),
            ),
        })
    }

    fn role_name(&self, index: usize) -> String {
        self.workers
            .get(index)
            .map(|w| w.name.clone())
            .unwrap_or_else(|| format!("#{index}"))
    }

    fn records(&self) -> Vec<WorkerRecord> {
        self.workers.iter().map(Worker::record).collect()
    }
}

/// Blocks until `pid` has exited.
fn reap(pid: Pid) -> WorkerExit {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => continue,
            Ok(status) => return WorkerExit::from(status),
            Err(e) => {
                tracing::warn!("failed to reap worker {pid}: {e}");
                return WorkerExit::Unknown;
            }
        }
    }
}

/// Entry point of a freshly forked worker; returns its exit code.
fn run_worker(channel: &CompletionChannel, ctx: &RoleContext, body: RoleBody) -> i32 {
    init_worker_tracing(ctx.settings.log_level.as_tracing_level());
    if ctx.settings.suppress_not_implemented {
        tracing::warn!(
            "suppressing not-implemented errors in {} ({})",
            ctx.name,
            std::process::id()
        );
    }

    let success = match catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("role {} failed: {e:#}", ctx.name);
            false
        }
        Err(_) => {
            tracing::error!("role {} panicked", ctx.name);
            false
        }
    };

    let completion = Completion {
        index: ctx.index,
        success,
    };
    if let Err(e) = channel.report(completion) {
        tracing::error!("role {} could not report completion: {e}", ctx.name);
    }

    if success { 0 } else { FAILURE_EXIT_CODE }
}
