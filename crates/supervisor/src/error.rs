use thiserror::Error;
use vigil_control::ControlError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Update failed: {0}")]
    UpdateApply(String),

    #[error("{0}")]
    Command(String),
}
