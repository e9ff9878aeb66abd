#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_control::{
    process_alive, LivenessFile, Mailbox, ModelSwitchSignal, OperatorCommand, SignalFile,
};
use vigil_supervisor::{
    read_status, Health, LifecycleEvent, ProcessLauncher, Supervisor, SupervisorConfig,
    SupervisorError,
};

/// A stand-in orchestrator: publishes a liveness record for its own pid, then idles.
fn fake_orchestrator(record: &Path) -> ProcessLauncher {
    let record = record.display();
    let script = format!(
        "printf '{{\"pid\":%d,\"started_at\":\"2026-01-01T00:00:00Z\"}}' $$ > '{record}.part' \
         && mv '{record}.part' '{record}' && exec sleep 30"
    );
    ProcessLauncher::new("sh", vec!["-c".to_string(), script])
}

struct Harness {
    _temp: TempDir,
    config: SupervisorConfig,
    shutdown: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let runtime = temp.path().join("run");
        let work = temp.path().join("work");
        std::fs::create_dir_all(&runtime).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        let mut config = SupervisorConfig::new(&runtime, &work);
        config.poll_interval = Duration::from_millis(100);
        config.grace_period = Duration::from_millis(500);

        Self {
            _temp: temp,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    fn liveness(&self) -> LivenessFile {
        LivenessFile::new(&self.config.liveness_file)
    }

    fn mailbox(&self) -> Mailbox {
        Mailbox::new(&self.config.control_dir)
    }

    fn spawn(&self, supervisor: Supervisor) -> JoinHandle<Result<(), SupervisorError>> {
        tokio::spawn(supervisor.run(self.shutdown.clone()))
    }

    async fn command(&self, command: OperatorCommand) -> (bool, String) {
        let mailbox = self.mailbox();
        let request = mailbox.post(command).unwrap();
        let reply = mailbox
            .wait_reply(request.id, Duration::from_secs(10))
            .await
            .unwrap();
        (reply.ok, reply.message)
    }

    async fn shut_down(self, handle: JoinHandle<Result<(), SupervisorError>>) {
        let _ = self.command(OperatorCommand::Stop).await;
        self.shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}

async fn wait_for<T>(limit: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[tokio::test]
async fn test_killed_orchestrator_is_restarted_within_three_seconds() {
    let harness = Harness::new();
    let launcher = fake_orchestrator(&harness.config.liveness_file);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let mut events = supervisor.subscribe();
    let handle = harness.spawn(supervisor);

    let liveness = harness.liveness();
    let first = wait_for(Duration::from_secs(3), || liveness.live_pid())
        .await
        .unwrap();
    wait_for(Duration::from_secs(3), || match events.try_recv() {
        Ok(LifecycleEvent::Started { pid }) if pid == first => Some(()),
        _ => None,
    })
    .await
    .expect("first start was never confirmed");

    kill(first);
    let killed_at = Instant::now();

    let second = wait_for(Duration::from_secs(3), || {
        liveness.live_pid().filter(|pid| *pid != first)
    })
    .await
        .expect("no fresh liveness record within 3 seconds");
    assert!(killed_at.elapsed() < Duration::from_secs(3));
    assert!(process_alive(second));

    let mut saw_crash = false;
    while let Ok(event) = events.try_recv() {
        if event == (LifecycleEvent::Crashed { pid: first }) {
            saw_crash = true;
        }
    }
    assert!(saw_crash);

    let status_file = harness.config.status_file.clone();
    let status = wait_for(Duration::from_secs(2), || {
        read_status(&status_file)
            .ok()
            .flatten()
            .filter(|s| s.restart_count >= 2)
    })
    .await
    .unwrap();
    assert!(status.last_restart.is_some());

    harness.shut_down(handle).await;
}

#[tokio::test]
async fn test_staged_update_is_applied_and_orchestrator_restarted() {
    let harness = Harness::new();
    let launcher = fake_orchestrator(&harness.config.liveness_file);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let handle = harness.spawn(supervisor);

    let liveness = harness.liveness();
    let first = wait_for(Duration::from_secs(3), || liveness.live_pid())
        .await
        .unwrap();

    let staging = harness.config.staging_dir.clone();
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("vigil.yaml"), "tampered: true\n").unwrap();
    std::fs::write(staging.join(".agent.yaml.part"), "model: b\n").unwrap();
    std::fs::rename(staging.join(".agent.yaml.part"), staging.join("agent.yaml")).unwrap();

    let applied: PathBuf = harness.config.work_dir.join("agent.yaml");
    let second = wait_for(Duration::from_secs(10), || {
        let done = applied.exists() && !staging.join("agent.yaml").exists();
        liveness.live_pid().filter(|pid| done && *pid != first)
    })
    .await
    .expect("update was not applied with a restart");

    assert!(!process_alive(first));
    assert!(process_alive(second));
    assert_eq!(std::fs::read_to_string(&applied).unwrap(), "model: b\n");

    assert!(!harness.config.work_dir.join("vigil.yaml").exists());
    assert!(staging.join("rejected").join("vigil.yaml").exists());

    let log = std::fs::read_to_string(&harness.config.action_log).unwrap();
    assert!(log.contains("staged update found: agent.yaml"));
    assert!(log.contains("applied agent.yaml: sha256 (new) -> "));
    assert!(log.contains("rejected staged file"));

    harness.shut_down(handle).await;
}

#[tokio::test]
async fn test_failed_update_turns_fatal_and_keeps_orchestrator_stopped() {
    let harness = Harness::new();
    let launcher = fake_orchestrator(&harness.config.liveness_file);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let mut events = supervisor.subscribe();
    let handle = harness.spawn(supervisor);

    let liveness = harness.liveness();
    let first = wait_for(Duration::from_secs(3), || liveness.live_pid())
        .await
        .unwrap();

    // A directory where the file should land makes the copy fail.
    std::fs::create_dir_all(harness.config.work_dir.join("agent.yaml").join("occupied")).unwrap();
    let staging = harness.config.staging_dir.clone();
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join(".agent.yaml.part"), "model: b\n").unwrap();
    std::fs::rename(staging.join(".agent.yaml.part"), staging.join("agent.yaml")).unwrap();

    let status_file = harness.config.status_file.clone();
    let status = wait_for(Duration::from_secs(10), || {
        read_status(&status_file)
            .ok()
            .flatten()
            .filter(|s| matches!(s.health, Health::Fatal(_)))
    })
    .await
    .expect("failed update did not turn fatal");

    assert!(!status.orchestrator_running());
    assert!(!process_alive(first));
    assert!(staging.join("agent.yaml").exists());
    assert!(harness.config.work_dir.join("agent.yaml").is_dir());

    // No restart on later ticks.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(liveness.live_pid().is_none());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LifecycleEvent::Started { pid } if pid != first));
        if matches!(event, LifecycleEvent::UpdateFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    harness.shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_orchestrator_dying_right_after_publishing_counts_as_started() {
    let harness = Harness::new();
    let record = harness.config.liveness_file.display().to_string();
    let script = format!(
        "printf '{{\"pid\":%d,\"started_at\":\"2026-01-01T00:00:00Z\"}}' $$ > '{record}.part' \
         && mv '{record}.part' '{record}' && exit 0"
    );
    let launcher = ProcessLauncher::new("sh", vec!["-c".to_string(), script]);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let handle = harness.spawn(supervisor);

    let status_file = harness.config.status_file.clone();
    wait_for(Duration::from_secs(5), || {
        read_status(&status_file)
            .ok()
            .flatten()
            .filter(|s| s.restart_count >= 2)
    })
    .await
    .expect("starts that published a record were not counted");

    harness.shutdown.cancel();
    handle.await.unwrap().unwrap();

    let log = std::fs::read_to_string(&harness.config.action_log).unwrap();
    assert!(!log.contains("before publishing"), "{log}");
}

#[tokio::test]
async fn test_repeated_startup_failure_turns_fatal() {
    let mut harness = Harness::new();
    harness.config.poll_interval = Duration::from_millis(50);
    let launcher = ProcessLauncher::new("sh", vec!["-c".to_string(), "exit 1".to_string()]);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let handle = harness.spawn(supervisor);

    let status_file = harness.config.status_file.clone();
    let status = wait_for(Duration::from_secs(5), || {
        read_status(&status_file)
            .ok()
            .flatten()
            .filter(|s| matches!(s.health, Health::Fatal(_)))
    })
    .await
    .expect("supervisor kept restart-looping");

    assert!(!status.orchestrator_running());
    let Health::Fatal(reason) = &status.health else {
        unreachable!()
    };
    assert!(reason.starts_with("3 failed startups"), "{reason}");

    let (ok, text) = harness.command(OperatorCommand::Status).await;
    assert!(ok);
    assert!(text.contains("health: FATAL"));

    harness.shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_operator_commands() {
    let harness = Harness::new();
    let launcher = fake_orchestrator(&harness.config.liveness_file);
    let supervisor = Supervisor::new(harness.config.clone(), launcher).unwrap();
    let handle = harness.spawn(supervisor);

    let liveness = harness.liveness();
    let first = wait_for(Duration::from_secs(3), || liveness.live_pid())
        .await
        .unwrap();
    let own = LivenessFile::new(&harness.config.own_liveness);
    assert!(own.live_pid().is_some());

    let (ok, text) = harness.command(OperatorCommand::Status).await;
    assert!(ok);
    assert!(text.contains(&format!("orchestrator: running (pid {first})")));

    let (ok, text) = harness.command(OperatorCommand::Stop).await;
    assert!(ok, "{text}");
    assert!(!process_alive(first));
    assert!(liveness.read().unwrap().is_none());

    // Stopped on purpose: no automatic restart.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(liveness.live_pid().is_none());

    let (ok, text) = harness.command(OperatorCommand::Start).await;
    assert!(ok, "{text}");
    let second = liveness.live_pid().unwrap();
    assert_ne!(second, first);

    let (ok, text) = harness.command(OperatorCommand::Start).await;
    assert!(!ok);
    assert!(text.contains("already running"));

    let (ok, text) = harness.command(OperatorCommand::Restart).await;
    assert!(ok, "{text}");
    let third = liveness.live_pid().unwrap();
    assert_ne!(third, second);

    let (ok, _) = harness
        .command(OperatorCommand::SwitchModel { model: "  ".into() })
        .await;
    assert!(!ok);

    let (ok, text) = harness
        .command(OperatorCommand::SwitchModel { model: "B".into() })
        .await;
    assert!(ok, "{text}");
    let signal: SignalFile<ModelSwitchSignal> = SignalFile::new(&harness.config.signal_file);
    assert_eq!(signal.peek().unwrap().unwrap().requested_model, "B");

    let (ok, text) = harness.command(OperatorCommand::Logs { count: 3 }).await;
    assert!(ok);
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("model switch to B requested"));

    harness.shut_down(handle).await;
}
