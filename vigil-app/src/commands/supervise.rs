use super::exit_signal;
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use vigil_supervisor::{ProcessLauncher, Supervisor};

/// Runs the supervisor in the foreground. The orchestrator it manages is this
/// same executable in detached agent mode unless configured otherwise.
pub async fn run(config: &Config, config_path: &Path) -> Result<()> {
    std::fs::create_dir_all(config.runtime_dir())
        .with_context(|| format!("Failed to create {}", config.runtime_dir().display()))?;

    let program = match &config.supervisor.orchestrator_program {
        Some(program) => program.clone(),
        None => std::env::current_exe().context("Failed to locate the vigil executable")?,
    };
    let config_arg =
        std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());

    let launcher = ProcessLauncher::new(
        program,
        vec![
            "--config".to_string(),
            config_arg.display().to_string(),
            "agent".to_string(),
            "--detached".to_string(),
        ],
    )
    .with_output(config.orchestrator_log());

    let supervisor = Supervisor::new(config.supervisor_config(), launcher)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        exit_signal().await;
        trigger.cancel();
    });

    supervisor.run(shutdown).await?;
    Ok(())
}
