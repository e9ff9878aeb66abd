use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supervisor timings and the filesystem records it watches.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    /// How long a fresh orchestrator has to publish its liveness record.
    pub startup_timeout: Duration,
    /// Time between SIGTERM and SIGKILL when stopping.
    pub grace_period: Duration,
    pub max_rapid_failures: usize,
    pub failure_window: Duration,

    pub liveness_file: PathBuf,
    pub signal_file: PathBuf,
    pub own_liveness: PathBuf,
    pub status_file: PathBuf,
    pub action_log: PathBuf,
    pub control_dir: PathBuf,

    pub staging_dir: PathBuf,
    pub work_dir: PathBuf,
    /// File extensions accepted from the staging directory.
    pub whitelist: Vec<String>,
    /// File names that are never applied from staging.
    pub protected_files: Vec<String>,
}

impl SupervisorConfig {
    /// Defaults with every record under `runtime_dir`.
    pub fn new(runtime_dir: &Path, work_dir: &Path) -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(2),
            grace_period: Duration::from_secs(2),
            max_rapid_failures: 3,
            failure_window: Duration::from_secs(60),

            liveness_file: runtime_dir.join("agent.pid"),
            signal_file: runtime_dir.join("model-switch.json"),
            own_liveness: runtime_dir.join("supervisor.pid"),
            status_file: runtime_dir.join("status.json"),
            action_log: runtime_dir.join("supervisor.log"),
            control_dir: runtime_dir.join("control"),

            staging_dir: runtime_dir.join("staging"),
            work_dir: work_dir.to_path_buf(),
            whitelist: ["yaml", "yml", "json", "toml", "md", "txt"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            protected_files: vec!["vigil.yaml".to_string()],
        }
    }
}
