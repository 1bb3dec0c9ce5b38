//! Key-value store for client state that outlives a single process.
//!
//! The controller directory only needs `get_state`/`set_state` over JSON
//! values. [`FileStateStore`] keeps one JSON object per file and replaces the
//! file atomically; [`MemoryStateStore`] shares a map between handles.

use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but could not be read.
    #[error("failed to read state file {path}: {source}")]
    Read {
        /// Location of the state file.
        path: Utf8PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
    /// The state file is not a JSON object.
    #[error("failed to parse state file {path}: {source}")]
    Parse {
        /// Location of the state file.
        path: Utf8PathBuf,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// The state file could not be replaced.
    #[error("failed to write state file {path}: {source}")]
    Write {
        /// Location of the state file.
        path: Utf8PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
}

/// Persistent key-value storage for JSON state.
pub trait StateStore {
    /// Returns the value stored under `key`, if any.
    fn get_state(&self, key: &str) -> Result<Option<Value>, StateError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StateError>;
}

/// State kept as one JSON object in a file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: Utf8PathBuf,
}

impl FileStateStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StateError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&text).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, values: &Map<String, Value>) -> Result<(), StateError> {
        let write_error = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_error)?;

        let mut staged = NamedTempFile::new_in(parent).map_err(write_error)?;
        serde_json::to_writer_pretty(&mut staged, values)
            .map_err(|error| write_error(io::Error::other(error)))?;
        staged.write_all(b"\n").map_err(write_error)?;
        staged
            .persist(&self.path)
            .map(|_| ())
            .map_err(|error| write_error(error.error))
    }
}

impl StateStore for FileStateStore {
    fn get_state(&self, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StateError> {
        let mut values = self.read_all()?;
        values.insert(key.to_owned(), value);
        self.write_all(&values)
    }
}

/// In-memory state shared by every clone of the handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    values: Arc<Mutex<Map<String, Value>>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get_state(&self, key: &str) -> Result<Option<Value>, StateError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StateError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value);
        Ok(())
    }
}
