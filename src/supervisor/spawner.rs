use crate::config::WorkerConfig;
use crate::error::{Result, VigilError};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::{Child, Command};

/// Metadata returned when spawning the worker
#[derive(Debug)]
pub struct SpawnedWorker {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// When the spawn happened
    pub spawned_at: SystemTime,
}

/// Spawn the worker process from the provided configuration.
///
/// The worker inherits the supervisor's stdio and environment, with a
/// single override: the execution-mode marker (e.g. APP_ENV=production).
///
/// # Arguments
/// * `config` - Worker configuration containing command, args, cwd
///
/// # Returns
/// * `Ok(SpawnedWorker)` - Successfully spawned worker with metadata
/// * `Err(VigilError)` - Failed to spawn the worker
pub fn spawn_worker(config: &WorkerConfig) -> Result<SpawnedWorker> {
    if !config.command.exists() {
        return Err(VigilError::SpawnError(format!(
            "Worker command does not exist: {}",
            config.command.display()
        )));
    }

    let mut command = Command::new(&config.command);

    if !config.args.is_empty() {
        command.args(&config.args);
    }

    if let Some(ref cwd) = config.cwd {
        command.current_dir(cwd);
    }

    // Inherited environment plus the production execution-mode marker
    command.env(&config.mode_env_key, &config.mode_env_value);

    // The worker shares the supervisor's stdio so its logs land in the
    // same place the hosting platform collects
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());
    command.stdin(Stdio::inherit());

    let child = command
        .spawn()
        .map_err(|e| VigilError::SpawnError(format!("Failed to spawn worker: {}", e)))?;

    let pid = child
        .id()
        .ok_or_else(|| VigilError::SpawnError("Failed to get worker pid".to_string()))?;

    Ok(SpawnedWorker {
        child,
        pid,
        spawned_at: SystemTime::now(),
    })
}
