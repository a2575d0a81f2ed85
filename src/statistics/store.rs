//! Durable statistics storage seam.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::statistics::mutation::Mutation;

/// Error type for statistics persistence.
#[derive(Debug, thiserror::Error)]
pub enum StatisticsError {
    #[error("statistics I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode mutation: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("statistics channel is closed")]
    ChannelClosed,
    #[error("statistics store rejected mutation: {0}")]
    Rejected(String),
}

/// Receives mutations on the statistics worker thread.
///
/// Implementations may block; they never run on a request-serving thread.
pub trait StatisticsStore: Send + Sync {
    fn persist(&self, mutation: &Mutation) -> Result<(), StatisticsError>;
}

/// Appends each mutation as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatisticsStore for JsonLinesStore {
    fn persist(&self, mutation: &Mutation) -> Result<(), StatisticsError> {
        let mut line = serde_json::to_vec(mutation)?;
        line.push(b'\n');

        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(&line) {
                // Reopen on the next write.
                *guard = None;
                return Err(e.into());
            }
        }
        Ok(())
    }
}
