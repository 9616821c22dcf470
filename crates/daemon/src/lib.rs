pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod job;
pub mod output;
pub mod scheduler;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{RecorderConfig, RecordingsDirProvider};
pub use controller::{InteractiveController, StreamContext};
pub use error::{ControllerError, RecorderError, SchedulerError, StoreError};
pub use job::{JobRecord, JobStatus, NewJob};
pub use scheduler::{CycleReport, Scheduler};
pub use store::JobStore;
pub use supervisor::{CaptureFactory, CaptureSession, CompletionSink, Recorder, RecorderFactory, StopReport};
