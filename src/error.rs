//! Error types for the repository watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The raw event source could not be acquired for the repository.
    #[error("Failed to initialize watcher for {path}: {reason}")]
    InitFailed { path: PathBuf, reason: String },

    /// A lifecycle transition was requested from a state that cannot honor it.
    #[error("Invalid watcher state: {reason}")]
    InvalidState { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        let path = e.paths.first().cloned().unwrap_or_default();
        WatchError::InitFailed {
            path,
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
