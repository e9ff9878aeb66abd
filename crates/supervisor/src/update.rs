use crate::error::SupervisorError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vigil_control::files::{remove_if_exists, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppliedFile {
    pub name: String,
    pub before: Option<String>,
    pub after: String,
}

struct Backup {
    target: PathBuf,
    previous: Option<Vec<u8>>,
}

pub(crate) fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Copies staged files into `work_dir` by name. Either every file lands or the
/// working tree is restored to what it was.
pub(crate) fn apply_staged(
    files: &[PathBuf],
    work_dir: &Path,
) -> Result<Vec<AppliedFile>, SupervisorError> {
    std::fs::create_dir_all(work_dir)?;

    let mut backups: Vec<Backup> = Vec::new();
    let mut applied = Vec::new();

    for staged in files {
        match apply_one(staged, work_dir, &mut backups) {
            Ok(file) => applied.push(file),
            Err(e) => {
                rollback(backups);
                return Err(SupervisorError::UpdateApply(format!("{}: {e}", staged.display())));
            }
        }
    }

    Ok(applied)
}

fn apply_one(
    staged: &Path,
    work_dir: &Path,
    backups: &mut Vec<Backup>,
) -> Result<AppliedFile, SupervisorError> {
    let name = staged
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SupervisorError::UpdateApply("staged file has no usable name".to_string())
        })?
        .to_string();
    let target = work_dir.join(&name);

    let content = std::fs::read(staged)?;
    let previous = match std::fs::read(&target) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    let before = previous.as_deref().map(digest);

    backups.push(Backup {
        target: target.clone(),
        previous,
    });
    write_atomic(&target, &content)?;

    let after = digest(&std::fs::read(&target)?);
    debug!(file = %name, %after, "Copied staged file");

    Ok(AppliedFile {
        name,
        before,
        after,
    })
}

fn rollback(backups: Vec<Backup>) {
    for backup in backups.into_iter().rev() {
        let restored = match &backup.previous {
            Some(bytes) => write_atomic(&backup.target, bytes),
            None => remove_if_exists(&backup.target).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(file = %backup.target.display(), error = %e, "Rollback could not restore file");
        }
    }
}
