use crate::config::Config;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use vigil_control::{Inbox, LivenessFile, Mailbox, OperatorCommand};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one command to the running supervisor and prints its reply.
pub async fn send(config: &Config, command: OperatorCommand) -> Result<()> {
    let message = request(config, command).await?;
    println!("{message}");
    Ok(())
}

pub async fn request(config: &Config, command: OperatorCommand) -> Result<String> {
    let supervisor = LivenessFile::new(config.supervisor_pid_file());
    if supervisor.live_pid().is_none() {
        bail!("supervisor is not running");
    }

    let mailbox = Mailbox::new(config.control_dir());
    let label = command.to_string();
    let posted = mailbox.post(command)?;
    let reply = mailbox
        .wait_reply(posted.id, REPLY_TIMEOUT)
        .await
        .with_context(|| format!("Supervisor did not answer '{label}'"))?;

    if !reply.ok {
        bail!("{label} failed: {}", reply.message);
    }
    Ok(reply.message)
}

/// Queues user input for a detached orchestrator.
pub fn say(config: &Config, text: &str, interrupt: bool) -> Result<()> {
    if text.trim().is_empty() {
        bail!("nothing to say");
    }
    let message = Inbox::new(config.inbox_dir()).post(text, interrupt)?;
    println!("queued message {}", message.id);
    Ok(())
}
