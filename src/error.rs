//! Error handling for the analyzer
//!
//! Handlers never surface these to the observed program; they are logged and
//! swallowed at the handler boundary. Administrative operations (snapshots,
//! config, replay) return them to the caller.

use std::path::Path;

/// Result type for analyzer operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Store path is empty")]
    EmptyPath,

    #[error("Store path {path} runs through a leaf record")]
    PathConflict { path: String },

    #[error("Store record at {path} is not a {expected}")]
    UnexpectedRecord { path: String, expected: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Name resolution failed for {what}")]
    Resolve { what: String },

    #[error("Unknown heap reference {id}")]
    UnknownReference { id: u64 },

    #[error("Replay error: {message}")]
    Replay { message: String },
}

/// Create a path conflict error for `path`
pub fn path_conflict(path: &[&str]) -> AnalysisError {
    AnalysisError::PathConflict {
        path: path.join("/"),
    }
}

/// Create an unexpected record error for `path`
pub fn unexpected_record(path: &[&str], expected: &'static str) -> AnalysisError {
    AnalysisError::UnexpectedRecord {
        path: path.join("/"),
        expected,
    }
}

/// Wrap an IO error with the file it happened on
pub fn io_error(path: impl AsRef<Path>, error: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", path.as_ref().display(), error),
    ))
}

pub fn replay_error(message: impl Into<String>) -> AnalysisError {
    AnalysisError::Replay {
        message: message.into(),
    }
}
