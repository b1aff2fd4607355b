use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the supervised worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path to the worker executable or script
    pub command: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the worker
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variable that marks the execution mode
    #[serde(default = "default_mode_env_key")]
    pub mode_env_key: String,

    /// Value written into the mode environment variable
    #[serde(default = "default_mode_env_value")]
    pub mode_env_value: String,
}

/// Supervisor restart and shutdown policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum restarts within the rolling window before cooldown engages
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Rolling window for counting restarts (in seconds)
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// Fixed delay before a restart attempt (in seconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// How often to probe the worker pid for existence (in seconds)
    #[serde(default = "default_health_poll")]
    pub health_poll_secs: u64,

    /// How long a freshly spawned worker must survive before it counts
    /// as running (in seconds)
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,

    /// Timeout before graceful shutdown escalates to SIGKILL (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

/// Watchdog probe intervals and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Activity probe interval (in seconds)
    #[serde(default = "default_activity_interval")]
    pub activity_interval_secs: u64,

    /// Heartbeat probe interval (in seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Aggregate health-check interval (in seconds)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Host-platform pulse interval (in seconds)
    #[serde(default = "default_pulse_interval")]
    pub pulse_interval_secs: u64,

    /// Latency report interval (in seconds)
    #[serde(default = "default_latency_report_interval")]
    pub latency_report_interval_secs: u64,

    /// Missed heartbeats tolerated before a restart is requested
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,

    /// How long without any activity before the session is judged
    /// stalled even if it self-reports ready (in seconds)
    #[serde(default = "default_stall_window")]
    pub stall_window_secs: u64,

    /// Latency above this is no longer considered healthy (in milliseconds)
    #[serde(default = "default_max_healthy_latency")]
    pub max_healthy_latency_ms: u64,

    /// Optional file touched on every pulse so host monitors see disk activity
    #[serde(default)]
    pub keepalive_file: Option<PathBuf>,
}

/// Top-level configuration: worker, supervisor policy, watchdog thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

// Default value functions for serde
fn default_mode_env_key() -> String {
    "APP_ENV".to_string()
}

fn default_mode_env_value() -> String {
    "production".to_string()
}

fn default_max_restarts() -> usize {
    50
}

fn default_restart_window() -> u64 {
    300
}

fn default_restart_delay() -> u64 {
    5
}

fn default_health_poll() -> u64 {
    30
}

fn default_startup_grace() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_activity_interval() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    20
}

fn default_health_check_interval() -> u64 {
    60
}

fn default_pulse_interval() -> u64 {
    10
}

fn default_latency_report_interval() -> u64 {
    300
}

fn default_max_missed_heartbeats() -> u32 {
    3
}

fn default_stall_window() -> u64 {
    300
}

fn default_max_healthy_latency() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window(),
            restart_delay_secs: default_restart_delay(),
            health_poll_secs: default_health_poll(),
            startup_grace_secs: default_startup_grace(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            activity_interval_secs: default_activity_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            health_check_interval_secs: default_health_check_interval(),
            pulse_interval_secs: default_pulse_interval(),
            latency_report_interval_secs: default_latency_report_interval(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            stall_window_secs: default_stall_window(),
            max_healthy_latency_ms: default_max_healthy_latency(),
            keepalive_file: None,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl WatchdogConfig {
    pub fn activity_interval(&self) -> Duration {
        Duration::from_secs(self.activity_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_secs(self.pulse_interval_secs)
    }

    pub fn latency_report_interval(&self) -> Duration {
        Duration::from_secs(self.latency_report_interval_secs)
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigilError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.as_os_str().is_empty() {
            return Err(VigilError::MissingConfigField("worker.command".to_string()));
        }

        if self.worker.mode_env_key.is_empty() {
            return Err(VigilError::ConfigValidationError(
                "worker.mode_env_key must not be empty".to_string(),
            ));
        }

        if self.supervisor.max_restarts == 0 {
            return Err(VigilError::ConfigValidationError(
                "supervisor.max_restarts must be at least 1".to_string(),
            ));
        }

        if self.supervisor.restart_window_secs == 0 {
            return Err(VigilError::ConfigValidationError(
                "supervisor.restart_window_secs must be at least 1".to_string(),
            ));
        }

        if self.watchdog.max_missed_heartbeats == 0 {
            return Err(VigilError::ConfigValidationError(
                "watchdog.max_missed_heartbeats must be at least 1".to_string(),
            ));
        }

        if let Some(ref cwd) = self.worker.cwd {
            if !cwd.is_dir() {
                return Err(VigilError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }
}
