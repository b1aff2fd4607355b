// Supervisor module - worker lifecycle: spawn, monitor, bounded restart, shutdown

mod budget;
mod probe;
mod spawner;

pub use budget::RestartBudget;
pub use probe::ProcessProbe;
pub use spawner::{spawn_worker, SpawnedWorker};

use crate::config::{SupervisorConfig, WorkerConfig};
use crate::exit::WorkerExit;
use crate::status::SupervisorStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Lifecycle state of the supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Starting,
    Running,
    Crashed,
    Stopped,
    Restarting,
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Crashed => write!(f, "crashed"),
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Restarting => write!(f, "restarting"),
            WorkerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Handle to the live worker process.
///
/// Replaced wholesale on every restart, never mutated in place.
#[derive(Debug, Clone)]
struct WorkerHandle {
    pid: u32,
    spawned_at: SystemTime,
    /// Fences stale exit watchers and health pollers from a prior spawn
    generation: u64,
}

struct SupervisorState {
    status: WorkerStatus,
    worker: Option<WorkerHandle>,
    budget: RestartBudget,
    /// One-way flag; once set, no further spawn ever happens
    shutting_down: bool,
    generation: u64,
    /// Cancellable timers for the current spawn: health poll, startup
    /// grace, pending restart delay, cooldown retry
    tasks: Vec<JoinHandle<()>>,
}

/// Parent-process supervisor owning the worker's lifecycle.
///
/// Every abnormal exit is retried after a fixed delay, bounded by the
/// restart budget; exhausting the budget engages a cooldown rather than
/// giving up. Only an operator shutdown permanently halts restarts.
pub struct Supervisor {
    worker_config: WorkerConfig,
    policy: SupervisorConfig,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(worker_config: WorkerConfig, policy: SupervisorConfig) -> Self {
        let budget = RestartBudget::new(policy.max_restarts, policy.restart_window());
        Self {
            worker_config,
            policy,
            state: Mutex::new(SupervisorState {
                status: WorkerStatus::Starting,
                worker: None,
                budget,
                shutting_down: false,
                generation: 0,
                tasks: Vec::new(),
            }),
        }
    }

    /// Spawn the worker and begin monitoring it.
    ///
    /// No-op once shutdown has begun. When the restart budget for the
    /// current window is spent, marks the worker `failed` and schedules a
    /// retry after one full window instead of spawning.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return;
        }

        let now = Instant::now();
        state.budget.reset_if_expired(now);

        if state.budget.exhausted() {
            error!(
                "Restart limit ({}) reached within {:?} window; cooling down before next attempt",
                state.budget.max_restarts(),
                state.budget.window()
            );
            state.status = WorkerStatus::Failed;

            let this = Arc::clone(self);
            let cooldown = self.policy.restart_window();
            state.tasks.push(tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                {
                    let mut st = this.state.lock().unwrap();
                    if st.shutting_down {
                        return;
                    }
                    st.budget.reset();
                    st.status = WorkerStatus::Restarting;
                }
                info!("Cooldown elapsed, attempting to start worker again");
                this.start();
            }));
            return;
        }

        // A start reached through handle_restart (or the cooldown retry)
        // counts against the budget; the initial start does not.
        if state.status == WorkerStatus::Restarting {
            state.budget.record(now);
        }

        info!(
            "Starting worker (restart {}/{})",
            state.budget.count(),
            state.budget.max_restarts()
        );
        state.status = WorkerStatus::Starting;

        let spawned = match spawn_worker(&self.worker_config) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Failed to start worker: {}", e);
                state.status = WorkerStatus::Crashed;
                drop(state);
                self.handle_restart();
                return;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let pid = spawned.pid;
        info!("Worker spawned with pid {}", pid);

        state.worker = Some(WorkerHandle {
            pid,
            spawned_at: spawned.spawned_at,
            generation,
        });

        // Exit watcher. Deliberately not in the cancellable task list: it
        // must stay alive to reap the child even across a restart cycle.
        let this = Arc::clone(self);
        let mut child = spawned.child;
        tokio::spawn(async move {
            let result = child.wait().await;
            this.on_worker_exit(generation, result);
        });

        // Startup grace: a worker that survives the grace period without
        // crashing is considered running
        let this = Arc::clone(self);
        let grace = self.policy.startup_grace();
        state.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut st = this.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
            let current = st.worker.as_ref().map(|w| w.generation) == Some(generation);
            if current && st.status == WorkerStatus::Starting {
                st.status = WorkerStatus::Running;
                info!("Worker appears to be running (pid {})", pid);
            }
        }));

        // Health polling: a zero-effect pid existence check
        let this = Arc::clone(self);
        let poll_interval = self.policy.health_poll_interval();
        state.tasks.push(tokio::spawn(async move {
            let mut probe = ProcessProbe::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval fires immediately; skip the tick at spawn time
            ticker.tick().await;
            loop {
                ticker.tick().await;
                {
                    let st = this.state.lock().unwrap();
                    if st.shutting_down {
                        return;
                    }
                    if st.worker.as_ref().map(|w| w.generation) != Some(generation) {
                        return;
                    }
                }
                if probe.is_alive(pid) {
                    debug!("Worker health check passed (pid {})", pid);
                } else {
                    warn!("Worker health check failed: pid {} no longer exists", pid);
                    this.on_worker_lost(generation);
                    return;
                }
            }
        }));
    }

    /// React to the worker's exit event, observed by the exit watcher
    fn on_worker_exit(self: &Arc<Self>, generation: u64, result: std::io::Result<ExitStatus>) {
        {
            let mut st = self.state.lock().unwrap();
            if st.shutting_down {
                debug!("Worker exit observed during shutdown, not restarting");
                return;
            }
            if st.worker.as_ref().map(|w| w.generation) != Some(generation) {
                return;
            }

            match result {
                Ok(status) => {
                    let exit = WorkerExit::from_status(status);
                    match exit {
                        WorkerExit::RestartRequested => {
                            warn!("Worker {} (watchdog judged the session unrecoverable)", exit);
                            st.status = WorkerStatus::Crashed;
                        }
                        WorkerExit::Clean => {
                            warn!("Worker exited cleanly, restarting");
                            st.status = WorkerStatus::Stopped;
                        }
                        WorkerExit::Crashed(_) | WorkerExit::Signaled(_) => {
                            warn!("Worker {}, restarting", exit);
                            st.status = WorkerStatus::Crashed;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to wait on worker: {}", e);
                    st.status = WorkerStatus::Crashed;
                }
            }
        }
        self.handle_restart();
    }

    /// React to the health poller finding the recorded pid gone
    fn on_worker_lost(self: &Arc<Self>, generation: u64) {
        {
            let mut st = self.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
            if st.worker.as_ref().map(|w| w.generation) != Some(generation) {
                return;
            }
            st.status = WorkerStatus::Crashed;
        }
        self.handle_restart();
    }

    /// Clear the dead worker and schedule the next `start()` after the
    /// fixed restart delay.
    ///
    /// The delay is deliberately fixed rather than exponential: crash
    /// storms are bounded by the restart budget, not by growing delay.
    fn handle_restart(self: &Arc<Self>) {
        let mut st = self.state.lock().unwrap();
        if st.shutting_down {
            return;
        }

        st.worker = None;
        for task in st.tasks.drain(..) {
            task.abort();
        }
        st.status = WorkerStatus::Restarting;

        let delay = self.policy.restart_delay();
        info!("Worker ended, restarting in {:?}", delay);

        let this = Arc::clone(self);
        st.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The delay may span an operator shutdown; start() re-checks
            this.start();
        }));
    }

    /// Gracefully terminate the worker and stop supervising.
    ///
    /// Idempotent: the second call observes the shutting-down flag and
    /// sends no further signals. Escalates to SIGKILL if the worker has
    /// not exited within the stop timeout.
    pub async fn shutdown(&self) {
        let pid = {
            let mut st = self.state.lock().unwrap();
            if st.shutting_down {
                debug!("Shutdown already in progress");
                return;
            }
            st.shutting_down = true;
            for task in st.tasks.drain(..) {
                task.abort();
            }
            st.worker.as_ref().map(|w| w.pid)
        };

        info!("Shutting down supervisor");

        if let Some(pid) = pid {
            self.terminate_worker(pid).await;
        }

        let mut st = self.state.lock().unwrap();
        st.worker = None;
        st.status = WorkerStatus::Stopped;
    }

    #[cfg(unix)]
    async fn terminate_worker(&self, pid: u32) {
        let nix_pid = Pid::from_raw(pid as i32);

        info!("Terminating worker (pid {}) with SIGTERM", pid);
        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            // ESRCH here just means the worker beat us to the exit
            debug!("Failed to send SIGTERM to pid {}: {}", pid, e);
            return;
        }

        let timeout = self.policy.stop_timeout();
        let deadline = Instant::now() + timeout;
        let mut probe = ProcessProbe::new();

        while Instant::now() < deadline {
            if !probe.is_alive(pid) {
                info!("Worker exited gracefully");
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        warn!(
            "Worker did not exit within {:?}, sending SIGKILL",
            timeout
        );
        if let Err(e) = kill(nix_pid, Signal::SIGKILL) {
            debug!("Failed to send SIGKILL to pid {}: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    async fn terminate_worker(&self, _pid: u32) {
        warn!("Graceful worker termination is only supported on unix");
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }

    /// Pure read of the supervisor's view of the worker; no side effects
    pub fn status(&self) -> SupervisorStatus {
        let st = self.state.lock().unwrap();
        SupervisorStatus {
            running: st.worker.is_some()
                && matches!(st.status, WorkerStatus::Starting | WorkerStatus::Running),
            pid: st.worker.as_ref().map(|w| w.pid),
            restart_count: st.budget.count(),
            last_restart: st.budget.last_restart().map(DateTime::<Utc>::from),
            max_restarts: st.budget.max_restarts(),
            state: st.status.to_string(),
        }
    }

    /// When the current worker was spawned, if one is alive
    pub fn spawned_at(&self) -> Option<SystemTime> {
        self.state.lock().unwrap().worker.as_ref().map(|w| w.spawned_at)
    }
}
