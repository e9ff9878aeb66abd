use crate::error::SupervisorError;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Starts one orchestrator process.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<Child, SupervisorError>;
}

/// Spawns a program with stdin closed and output appended to a log file.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            output: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self) -> Result<Child, SupervisorError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        match &self.output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                command.stdout(file.try_clone()?).stderr(file);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        // Own process group: a Ctrl-C aimed at the supervisor's terminal must
        // not reach the orchestrator.
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| SupervisorError::Launch(format!("{}: {e}", self.program.display())))
    }
}
