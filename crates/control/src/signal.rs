use crate::files::write_json;
use crate::ControlError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSwitchSignal {
    pub requested_model: String,
    pub issued_at: DateTime<Utc>,
}

impl ModelSwitchSignal {
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            requested_model: requested_model.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Single-slot typed channel through one file. A newer post overwrites an
/// unconsumed older one. `take` is read-then-clear.
#[derive(Debug)]
pub struct SignalFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SignalFile<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> SignalFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn post(&self, value: &T) -> Result<(), ControlError> {
        write_json(&self.path, value)
    }

    pub fn peek(&self) -> Result<Option<T>, ControlError> {
        crate::files::read_json(&self.path)
    }

    /// Claims the pending value by renaming it aside first, so a post that lands
    /// while this runs is kept for the next take.
    pub fn take(&self) -> Result<Option<T>, ControlError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let claimed = self
            .path
            .with_file_name(format!(".{file_name}.{}.claimed", std::process::id()));

        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let bytes = std::fs::read(&claimed);
        let _ = std::fs::remove_file(&claimed);
        Ok(Some(serde_json::from_slice(&bytes?)?))
    }
}
