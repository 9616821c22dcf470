use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

/// Failures of a single capture supervisor.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Capture tool missing or refused to spawn.
    #[error("failed to spawn capture tool {bin}: {source}")]
    Configuration {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Graceful stop window elapsed; the process was killed.
    #[error("capture process did not exit within {secs}s of interrupt")]
    ProcessTimeout { secs: u64 },

    #[error("start called while a capture process is already running")]
    AlreadyRunning,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures touching one profile's job store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open job store {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("job {id}: invalid status transition to {to}")]
    InvalidTransition { id: i64, to: JobStatus },

    #[error("unknown job status '{0}'")]
    InvalidStatus(String),

    #[error("job {0} not found")]
    NotFound(i64),

    #[error("invalid profile id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidProfileId(String),
}

/// Conditions the scheduler resolves on its own and reports through logs.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job {id} in {store} is recording but no capture process is tracked")]
    OrphanedJob { store: PathBuf, id: i64 },
}

/// Rejections from the interactive recording controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("a recording is already active")]
    AlreadyActive,

    #[error("no stream is currently selected")]
    NoStream,

    #[error("no recording is active")]
    NotActive,

    #[error("a stop request is already in flight")]
    Stopping,

    #[error(transparent)]
    Start(#[from] RecorderError),
}
