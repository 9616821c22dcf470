use std::path::PathBuf;

use chrono::Local;
use log::{info, warn};

use crate::error::ControllerError;
use crate::output::output_path;
use crate::supervisor::{stop_and_notify, CaptureFactory, CaptureSession, CompletionSink, StopReport};

/// The stream the user is currently watching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    pub channel_name: String,
    pub url: String,
    pub program_name: Option<String>,
}

impl StreamContext {
    fn display_name(&self) -> &str {
        match self.program_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.channel_name,
        }
    }
}

/// A single user-driven recording slot.
///
/// Stopping can take as long as the stop timeout, so it runs on its own task and
/// the result comes back as a message on the caller's queue. Until
/// [`finish_stop`](Self::finish_stop) is called, further stop requests are refused.
pub struct InteractiveController<F: CaptureFactory> {
    factory: F,
    recordings_dir: PathBuf,
    container: String,
    stream: Option<StreamContext>,
    active: Option<F::Session>,
    stopping: bool,
}

impl<F: CaptureFactory> InteractiveController<F> {
    pub fn new(factory: F, recordings_dir: PathBuf, container: impl Into<String>) -> Self {
        Self {
            factory,
            recordings_dir,
            container: container.into(),
            stream: None,
            active: None,
            stopping: false,
        }
    }

    pub fn set_stream(&mut self, stream: StreamContext) {
        self.stream = Some(stream);
    }

    pub fn clear_stream(&mut self) {
        self.stream = None;
    }

    pub fn stream(&self) -> Option<&StreamContext> {
        self.stream.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Whether the stop affordance should be enabled
    pub fn can_stop(&self) -> bool {
        self.active.is_some() && !self.stopping
    }

    /// Start recording the current stream; returns the output path
    pub async fn start(&mut self) -> Result<PathBuf, ControllerError> {
        if self.active.is_some() || self.stopping {
            return Err(ControllerError::AlreadyActive);
        }
        let stream = self.stream.as_ref().ok_or(ControllerError::NoStream)?;

        let output = output_path(
            &self.recordings_dir,
            stream.display_name(),
            &Local::now(),
            &self.container,
            |_| false,
        );
        let mut session = self.factory.create(&stream.url, output.clone());
        session.start().await?;

        info!("Manual recording of {} -> {}", stream.channel_name, output.display());
        self.active = Some(session);
        Ok(output)
    }

    /// Begin stopping on a background task; `sink` receives the report exactly once.
    pub fn request_stop<S>(&mut self, sink: S) -> Result<(), ControllerError>
    where
        S: CompletionSink + Send + Sync + 'static,
    {
        if self.stopping {
            return Err(ControllerError::Stopping);
        }
        let mut session = self.active.take().ok_or(ControllerError::NotActive)?;
        self.stopping = true;

        tokio::spawn(async move {
            stop_and_notify(&mut session, &sink).await;
        });
        Ok(())
    }

    /// Called by the owner when the stop report arrives on its queue
    pub fn finish_stop(&mut self, report: &StopReport) {
        if !self.stopping {
            warn!("Stop result for {} arrived with no stop pending", report.output.display());
        }
        self.stopping = false;
        if report.success {
            info!("Manual recording saved: {}", report.output.display());
        } else {
            warn!("Manual recording failed: {}", report.output.display());
        }
    }
}
