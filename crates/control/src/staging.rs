use crate::ControlError;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Drop directory for files that replace orchestrator code or config by name.
///
/// Producers should write under a dot-prefixed or `.tmp` name and rename into
/// place; those names are never picked up.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    whitelist: Vec<String>,
    protected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedSet {
    /// Whitelisted, unprotected files, sorted by name.
    pub accepted: Vec<PathBuf>,
    /// Protected names. These must be moved aside, never applied.
    pub protected: Vec<Rejection>,
}

impl StagedSet {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.protected.is_empty()
    }
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, whitelist: &[String], protected: &[String]) -> Self {
        Self {
            dir: dir.into(),
            whitelist: whitelist
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            protected: protected.to_vec(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.dir.join("rejected")
    }

    pub fn scan(&self) -> Result<StagedSet, ControlError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StagedSet::default()),
            Err(e) => return Err(e.into()),
        };

        let mut set = StagedSet::default();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".part") {
                continue;
            }

            if self.protected.iter().any(|p| *p == name) {
                set.protected.push(Rejection {
                    path: entry.path(),
                    reason: format!("{name} is protected"),
                });
            } else if self.is_whitelisted(&name) {
                set.accepted.push(entry.path());
            }
        }

        set.accepted.sort();
        set.protected.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(set)
    }

    pub fn pending_count(&self) -> Result<usize, ControlError> {
        Ok(self.scan()?.accepted.len())
    }

    /// Moves a staged file into `rejected/`, returning its new location.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf, ControlError> {
        let rejected = self.rejected_dir();
        std::fs::create_dir_all(&rejected)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let mut target = rejected.join(&name);
        if target.exists() {
            target = rejected.join(format!("{name}.{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        }

        std::fs::rename(path, &target)?;
        Ok(target)
    }

    fn is_whitelisted(&self, name: &str) -> bool {
        let extension = Path::new(name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        !extension.is_empty() && self.whitelist.iter().any(|allowed| *allowed == extension)
    }
}
