use crate::action_log::ActionLog;
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::events::{LifecycleEvent, Severity};
use crate::launcher::Launcher;
use crate::status::{Desired, Health, SupervisorStatus};
use crate::update::apply_staged;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_control::files::{remove_if_exists, write_json};
use vigil_control::{
    process_alive, ControlReply, LivenessFile, Mailbox, ModelSwitchSignal, OperatorCommand,
    SignalFile, StagingArea,
};

const STARTUP_POLL: Duration = Duration::from_millis(25);
const STOP_POLL: Duration = Duration::from_millis(25);
const KILL_WAIT: Duration = Duration::from_secs(1);

/// Keeps one orchestrator process alive and applies staged updates to it.
pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Box<dyn Launcher>,
    liveness: LivenessFile,
    switch: SignalFile<ModelSwitchSignal>,
    staging: StagingArea,
    mailbox: Mailbox,
    log: ActionLog,
    events: broadcast::Sender<LifecycleEvent>,

    child: Option<Child>,
    desired: Desired,
    health: Health,
    restart_count: u32,
    last_restart: Option<DateTime<Utc>>,
    failures: VecDeque<Instant>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        launcher: impl Launcher + 'static,
    ) -> Result<Self, SupervisorError> {
        let log = ActionLog::open(&config.action_log)?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            liveness: LivenessFile::new(&config.liveness_file),
            switch: SignalFile::new(&config.signal_file),
            staging: StagingArea::new(
                &config.staging_dir,
                &config.whitelist,
                &config.protected_files,
            ),
            mailbox: Mailbox::new(&config.control_dir),
            launcher: Box::new(launcher),
            log,
            events,
            child: None,
            desired: Desired::Running,
            health: Health::Healthy,
            restart_count: 0,
            last_restart: None,
            failures: VecDeque::new(),
            config,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            orchestrator_pid: self.liveness.live_pid(),
            desired: self.desired,
            health: self.health.clone(),
            restart_count: self.restart_count,
            last_restart: self.last_restart,
            pending_updates: self.staging.pending_count().unwrap_or(0),
            supervisor_pid: std::process::id(),
            updated_at: Utc::now(),
        }
    }

    /// Supervises until `shutdown` fires. The orchestrator is left running on exit.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let own = LivenessFile::new(&self.config.own_liveness);
        let _guard = own.claim()?;

        self.announce(LifecycleEvent::SupervisorStarted {
            pid: std::process::id(),
        });

        if let Err(e) = self.start_orchestrator().await {
            warn!(error = %e, "Initial start failed");
        }
        self.write_status();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Supervisor tick failed");
            }
        }

        self.announce(LifecycleEvent::SupervisorExiting);
        self.write_status();
        Ok(())
    }

    /// One poll: reap, answer commands, apply updates, check liveness, publish status.
    pub async fn tick(&mut self) -> Result<(), SupervisorError> {
        self.reap();
        self.handle_commands().await;

        let update = if self.wants_running() {
            self.apply_updates().await
        } else {
            Ok(())
        };

        self.check_liveness().await;
        self.write_status();
        update
    }

    fn wants_running(&self) -> bool {
        self.desired == Desired::Running && self.health == Health::Healthy
    }

    fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Orchestrator process exited");
                self.child = None;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not poll orchestrator process"),
        }
    }

    async fn check_liveness(&mut self) {
        if !self.wants_running() {
            return;
        }

        match self.liveness.read() {
            Ok(Some(record)) if process_alive(record.pid) => return,
            Ok(Some(record)) => {
                self.announce(LifecycleEvent::Crashed { pid: record.pid });
                if let Err(e) = self.liveness.remove() {
                    warn!(error = %e, "Could not remove stale liveness record");
                }
            }
            Ok(None) => {
                self.announce(LifecycleEvent::RecordMissing);
                if let Err(e) = self.stop_orchestrator("liveness record missing").await {
                    warn!(error = %e, "Could not stop orchestrator without a record");
                }
            }
            Err(e) => {
                warn!(error = %e, "Unreadable liveness record; treating as crashed");
                if let Err(e) = self.liveness.remove() {
                    warn!(error = %e, "Could not remove unreadable liveness record");
                }
            }
        }

        if let Err(e) = self.start_orchestrator().await {
            warn!(error = %e, "Restart failed");
        }
    }

    /// Starts a fresh orchestrator and waits for its liveness record. A live
    /// orchestrator that is already recorded is adopted instead.
    async fn start_orchestrator(&mut self) -> Result<u32, SupervisorError> {
        if let Some(pid) = self.liveness.live_pid() {
            self.announce(LifecycleEvent::Adopted { pid });
            return Ok(pid);
        }

        let mut child = match self.launcher.launch() {
            Ok(child) => child,
            Err(e) => return Err(self.startup_failed(e.to_string())),
        };

        let launched = child.id();
        let deadline = Instant::now() + self.config.startup_timeout;
        let failure = loop {
            match self.liveness.read() {
                Ok(Some(record)) if process_alive(record.pid) => {
                    self.child = Some(child);
                    self.failures.clear();
                    self.record_start(record.pid);
                    return Ok(record.pid);
                }
                _ => {}
            }

            match child.try_wait() {
                Ok(Some(status)) => break self.exited_during_startup(launched, status),
                Ok(None) => {}
                Err(e) => break format!("could not poll new process: {e}"),
            }

            if Instant::now() >= deadline {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Could not kill unresponsive orchestrator");
                }
                break format!(
                    "no liveness record within {}ms",
                    self.config.startup_timeout.as_millis()
                );
            }

            tokio::time::sleep(STARTUP_POLL).await;
        };

        Err(self.startup_failed(failure))
    }

    fn record_start(&mut self, pid: u32) {
        self.restart_count += 1;
        self.last_restart = Some(Utc::now());
        self.announce(LifecycleEvent::Started { pid });
    }

    // A child that published its record and then died between two polls did
    // start; it counts as a start followed by a crash, and toward the rapid
    // failure window.
    fn exited_during_startup(&mut self, launched: Option<u32>, status: ExitStatus) -> String {
        let published = match self.liveness.read() {
            Ok(Some(record)) => launched.filter(|pid| *pid == record.pid),
            _ => None,
        };

        let Some(pid) = published else {
            return format!(
                "process exited ({status}) before publishing a liveness record"
            );
        };

        self.record_start(pid);
        self.announce(LifecycleEvent::Crashed { pid });
        if let Err(e) = self.remove_dead_record() {
            warn!(error = %e, "Could not remove stale liveness record");
        }
        format!("process {pid} exited ({status}) right after startup")
    }

    fn startup_failed(&mut self, reason: String) -> SupervisorError {
        self.announce(LifecycleEvent::StartupFailed {
            reason: reason.clone(),
        });

        let now = Instant::now();
        self.failures.push_back(now);
        while let Some(first) = self.failures.front() {
            if now.duration_since(*first) > self.config.failure_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }

        if self.failures.len() >= self.config.max_rapid_failures {
            let fatal = format!(
                "{} failed startups within {}s, last: {reason}",
                self.failures.len(),
                self.config.failure_window.as_secs()
            );
            self.health = Health::Fatal(fatal.clone());
            self.announce(LifecycleEvent::Fatal { reason: fatal });
        }

        SupervisorError::Startup(reason)
    }

    /// SIGTERM, up to `grace_period` to exit, then SIGKILL. Removes the
    /// liveness record once the process is confirmed gone.
    async fn stop_orchestrator(&mut self, reason: &str) -> Result<(), SupervisorError> {
        let pid = self
            .child
            .as_ref()
            .and_then(Child::id)
            .or_else(|| self.liveness.live_pid());

        let Some(pid) = pid else {
            self.child = None;
            self.remove_dead_record()?;
            return Ok(());
        };

        self.announce(LifecycleEvent::Stopping {
            pid,
            reason: reason.to_string(),
        });
        send_signal(pid, Signal::Terminate);

        let deadline = Instant::now() + self.config.grace_period;
        while self.is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL).await;
        }

        let forced = self.is_running(pid);
        if forced {
            send_signal(pid, Signal::Kill);
            let deadline = Instant::now() + KILL_WAIT;
            while self.is_running(pid) && Instant::now() < deadline {
                tokio::time::sleep(STOP_POLL).await;
            }
        }

        self.child = None;
        self.remove_dead_record()?;
        self.announce(LifecycleEvent::Stopped { pid, forced });
        Ok(())
    }

    fn is_running(&mut self, pid: u32) -> bool {
        if let Some(child) = self.child.as_mut() {
            if child.id() == Some(pid) {
                return matches!(child.try_wait(), Ok(None));
            }
        }
        process_alive(pid)
    }

    fn remove_dead_record(&self) -> Result<(), SupervisorError> {
        match self.liveness.read() {
            Ok(Some(record)) if process_alive(record.pid) => Ok(()),
            Ok(None) => Ok(()),
            _ => {
                self.liveness.remove()?;
                Ok(())
            }
        }
    }

    async fn apply_updates(&mut self) -> Result<(), SupervisorError> {
        let staged = self.staging.scan()?;

        for rejection in &staged.protected {
            let file = rejection.path.display().to_string();
            match self.staging.quarantine(&rejection.path) {
                Ok(_) => self.announce(LifecycleEvent::UpdateRejected {
                    file,
                    reason: rejection.reason.clone(),
                }),
                Err(e) => warn!(%file, error = %e, "Could not move rejected file aside"),
            }
        }

        if staged.accepted.is_empty() {
            return Ok(());
        }

        let files: Vec<String> = staged
            .accepted
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        self.announce(LifecycleEvent::UpdateStaged {
            files: files.clone(),
        });

        self.stop_orchestrator("applying staged update").await?;

        let applied = match apply_staged(&staged.accepted, &self.config.work_dir) {
            Ok(applied) => applied,
            Err(e) => {
                let reason = e.to_string();
                self.health = Health::Fatal(reason.clone());
                self.announce(LifecycleEvent::UpdateFailed { reason });
                return Err(e);
            }
        };

        for file in applied {
            self.announce(LifecycleEvent::FileApplied {
                file: file.name,
                before: file.before,
                after: file.after,
            });
        }
        for path in &staged.accepted {
            remove_if_exists(path)?;
        }
        self.announce(LifecycleEvent::UpdateApplied { files });

        self.start_orchestrator().await.map(|_| ())
    }

    async fn handle_commands(&mut self) {
        let requests = match self.mailbox.take_requests() {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "Could not read operator requests");
                return;
            }
        };

        for request in requests {
            self.announce(LifecycleEvent::CommandReceived {
                command: request.command.to_string(),
            });

            let reply = match self.execute(&request.command).await {
                Ok(message) => ControlReply::ok(request.id, message),
                Err(e) => ControlReply::failed(request.id, e.to_string()),
            };

            if let Err(e) = self.mailbox.reply(&reply) {
                warn!(id = %request.id, error = %e, "Could not write reply");
            }
        }
    }

    /// Runs one operator command and returns the text shown to the operator.
    pub async fn execute(&mut self, command: &OperatorCommand) -> Result<String, SupervisorError> {
        match command {
            OperatorCommand::Status => Ok(self.status().render()),
            OperatorCommand::Restart => {
                self.clear_fatal();
                self.desired = Desired::Running;
                self.stop_orchestrator("operator restart").await?;
                let pid = self.start_orchestrator().await?;
                Ok(format!("orchestrator restarted (pid {pid})"))
            }
            OperatorCommand::Stop => {
                self.desired = Desired::Stopped;
                if self.liveness.live_pid().is_none() && self.child.is_none() {
                    return Ok("orchestrator is not running".to_string());
                }
                self.stop_orchestrator("operator stop").await?;
                Ok("orchestrator stopped".to_string())
            }
            OperatorCommand::Start => {
                if let Some(pid) = self.liveness.live_pid() {
                    return Err(SupervisorError::Command(format!(
                        "orchestrator is already running (pid {pid})"
                    )));
                }
                self.clear_fatal();
                self.desired = Desired::Running;
                let pid = self.start_orchestrator().await?;
                Ok(format!("orchestrator started (pid {pid})"))
            }
            OperatorCommand::SwitchModel { model } => {
                let model = model.trim();
                if model.is_empty() {
                    return Err(SupervisorError::Command(
                        "model name must not be empty".to_string(),
                    ));
                }
                self.switch.post(&ModelSwitchSignal::new(model))?;
                self.announce(LifecycleEvent::ModelSwitchRequested {
                    model: model.to_string(),
                });
                Ok(format!("model switch to {model} requested"))
            }
            OperatorCommand::Logs { count } => Ok(self.log.tail(*count)?.join("\n")),
        }
    }

    fn clear_fatal(&mut self) {
        if let Health::Fatal(reason) = &self.health {
            info!(%reason, "Clearing fatal status on operator request");
        }
        self.health = Health::Healthy;
        self.failures.clear();
    }

    fn write_status(&self) {
        if let Err(e) = write_json(&self.config.status_file, &self.status()) {
            warn!(error = %e, "Could not write status file");
        }
    }

    fn announce(&self, event: LifecycleEvent) {
        let message = event.to_string();
        match event.severity() {
            Severity::Info => info!("{message}"),
            Severity::Warn => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }

        if let Err(e) = self.log.record(event.severity(), &message) {
            warn!(error = %e, "Could not write action log");
        }
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let number = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };

    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, number) };
    if rc != 0 {
        debug!(pid, ?signal, error = %std::io::Error::last_os_error(), "kill failed");
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: Signal) {
    warn!(pid, ?signal, "Process signals are not supported on this platform");
}
