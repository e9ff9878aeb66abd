use crate::files::{read_json, remove_if_exists, write_json};
use crate::ControlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LivenessRecord {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

/// The PID marker. Its owner publishes it on start and removes it on clean exit;
/// everyone else only reads it, except for deletion after confirmed death.
#[derive(Debug, Clone)]
pub struct LivenessFile {
    path: PathBuf,
}

impl LivenessFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<LivenessRecord>, ControlError> {
        read_json(&self.path)
    }

    /// Publishes a record for this process. Fails if a live process other than
    /// this one already holds the file.
    pub fn claim(&self) -> Result<LivenessGuard, ControlError> {
        let own_pid = std::process::id();

        match self.read() {
            Ok(Some(existing)) if existing.pid != own_pid && process_alive(existing.pid) => {
                return Err(ControlError::AlreadyRunning(existing.pid));
            }
            Ok(Some(stale)) => debug!(pid = stale.pid, "Replacing stale liveness record"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "Replacing unreadable record"),
        }

        let record = LivenessRecord::current();
        write_json(&self.path, &record)?;

        Ok(LivenessGuard {
            path: self.path.clone(),
            record,
        })
    }

    pub fn remove(&self) -> Result<bool, ControlError> {
        remove_if_exists(&self.path)
    }

    /// Live pid named by the record, if any.
    pub fn live_pid(&self) -> Option<u32> {
        match self.read() {
            Ok(Some(record)) if process_alive(record.pid) => Some(record.pid),
            _ => None,
        }
    }
}

/// Removes the record on drop if it still names this process.
#[derive(Debug)]
pub struct LivenessGuard {
    path: PathBuf,
    record: LivenessRecord,
}

impl LivenessGuard {
    pub fn record(&self) -> &LivenessRecord {
        &self.record
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        match read_json::<LivenessRecord>(&self.path) {
            Ok(Some(current)) if current.pid == self.record.pid => {
                if let Err(e) = remove_if_exists(&self.path) {
                    warn!(error = %e, "Failed to remove liveness record");
                }
            }
            _ => {}
        }
    }
}

/// True when `pid` names a running process. Zombies count as dead.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }

    system
        .process(pid)
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claim_publishes_and_drop_removes() {
        let temp = TempDir::new().unwrap();
        let file = LivenessFile::new(temp.path().join("agent.pid"));

        let guard = file.claim().unwrap();
        let record = file.read().unwrap().unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(&record, guard.record());
        assert_eq!(file.live_pid(), Some(std::process::id()));

        drop(guard);
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn test_stale_record_is_replaced() {
        let temp = TempDir::new().unwrap();
        let file = LivenessFile::new(temp.path().join("agent.pid"));
        let stale = LivenessRecord {
            pid: 0x7fff_fff0,
            started_at: Utc::now(),
        };
        write_json(file.path(), &stale).unwrap();

        let guard = file.claim().unwrap();
        assert_eq!(guard.record().pid, std::process::id());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_foreign_record_refuses_claim() {
        let temp = TempDir::new().unwrap();
        let file = LivenessFile::new(temp.path().join("agent.pid"));

        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .unwrap();
        let foreign = LivenessRecord {
            pid: child.id(),
            started_at: Utc::now(),
        };
        write_json(file.path(), &foreign).unwrap();

        let result = file.claim();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(matches!(result, Err(ControlError::AlreadyRunning(pid)) if pid == foreign.pid));
    }

    #[test]
    fn test_guard_leaves_foreign_record_alone() {
        let temp = TempDir::new().unwrap();
        let file = LivenessFile::new(temp.path().join("agent.pid"));
        let guard = file.claim().unwrap();

        let other = LivenessRecord {
            pid: 0x7fff_fff1,
            started_at: Utc::now(),
        };
        write_json(file.path(), &other).unwrap();
        drop(guard);

        assert_eq!(file.read().unwrap().unwrap().pid, other.pid);
    }
}
