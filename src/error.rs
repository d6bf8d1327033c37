//! Error types
//!
//! Discovery, module metadata and runner failures are kept apart so hosts
//! can decide which ones deserve a notification.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExplorerError>;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("symbol provider failed for {}: {message}", path.display())]
    Symbols { path: PathBuf, message: String },

    #[error("{} is not a usable module file: {reason}", path.display())]
    ModuleMetadata { path: PathBuf, reason: String },

    #[error("failed to spawn test runner in {}: {source}", dir.display())]
    RunnerSpawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("test runner in {} exited with {}", dir.display(), exit_label(*code))]
    RunnerExit { dir: PathBuf, code: Option<i32> },

    #[error("test runner stream in {} failed: {source}", dir.display())]
    RunnerStream {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid test id: {0}")]
    InvalidId(String),
}

impl ExplorerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExplorerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error belongs to a runner invocation rather than discovery.
    pub fn is_runner_error(&self) -> bool {
        matches!(
            self,
            ExplorerError::RunnerSpawn { .. }
                | ExplorerError::RunnerExit { .. }
                | ExplorerError::RunnerStream { .. }
        )
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}
