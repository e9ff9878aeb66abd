use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vigil_app::commands::{agent, operator, supervise};
use vigil_app::Config;
use vigil_control::OperatorCommand;

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Supervised local agent with a risk-gated tool loop"
)]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        short,
        global = true,
        env = "VIGIL_CONFIG",
        default_value = "vigil.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the orchestrator.
    Agent {
        /// Read input from the runtime inbox instead of stdin.
        #[arg(long)]
        detached: bool,
    },
    /// Run the supervisor, which keeps a detached orchestrator alive.
    Supervise,
    /// Show orchestrator liveness, last restart and pending updates.
    Status,
    /// Force an orchestrator restart.
    Restart,
    /// Stop the orchestrator and keep it stopped.
    Stop,
    /// Start a stopped orchestrator.
    Start,
    /// Ask the orchestrator to use another model from its next step on.
    SwitchModel { model: String },
    /// Tail the supervisor's action log.
    Logs {
        #[arg(default_value_t = 20)]
        count: usize,
    },
    /// Send input to a detached orchestrator.
    Say {
        text: String,
        /// Interrupt the running cycle and answer this next.
        #[arg(long)]
        interrupt: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    config.apply_env();
    config.validate()?;

    match cli.command {
        Command::Agent { detached } => agent::run(&config, detached).await,
        Command::Supervise => supervise::run(&config, &cli.config).await,
        Command::Status => operator::send(&config, OperatorCommand::Status).await,
        Command::Restart => operator::send(&config, OperatorCommand::Restart).await,
        Command::Stop => operator::send(&config, OperatorCommand::Stop).await,
        Command::Start => operator::send(&config, OperatorCommand::Start).await,
        Command::SwitchModel { model } => {
            operator::send(&config, OperatorCommand::SwitchModel { model }).await
        }
        Command::Logs { count } => operator::send(&config, OperatorCommand::Logs { count }).await,
        Command::Say { text, interrupt } => operator::say(&config, &text, interrupt),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
