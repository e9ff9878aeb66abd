use crate::error::SupervisorError;
use crate::events::Severity;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only, human-readable log of supervisor actions.
pub struct ActionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ActionLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SupervisorError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, severity: Severity, message: &str) -> Result<(), SupervisorError> {
        let line = format!(
            "{}  {:<5}  {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            severity.as_str(),
            message.replace('\n', " ")
        );

        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Last `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Result<Vec<String>, SupervisorError> {
        let file = File::open(&self.path)?;
        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let skip = lines.len().saturating_sub(count);
        Ok(lines.into_iter().skip(skip).collect())
    }
}
