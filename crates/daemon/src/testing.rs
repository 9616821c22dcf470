//! Scripted capture sessions for scheduler and controller tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::RecorderError;
use crate::supervisor::{CaptureFactory, CaptureSession, RecorderState, StopReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Stop(String),
}

/// URLs containing `unreachable` fail to start; those containing `broken` stop unsuccessfully.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    calls: Arc<Mutex<Vec<Call>>>,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedFactory {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Stop(_))).count()
    }

    /// Output paths of every session that started
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Start(_))).count()
    }
}

impl CaptureFactory for ScriptedFactory {
    type Session = ScriptedSession;

    fn create(&self, input_url: &str, output: PathBuf) -> ScriptedSession {
        ScriptedSession {
            url: input_url.to_string(),
            output,
            state: RecorderState::Idle,
            calls: Arc::clone(&self.calls),
            outputs: Arc::clone(&self.outputs),
        }
    }
}

pub struct ScriptedSession {
    url: String,
    output: PathBuf,
    state: RecorderState,
    calls: Arc<Mutex<Vec<Call>>>,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl CaptureSession for ScriptedSession {
    async fn start(&mut self) -> Result<(), RecorderError> {
        if self.url.contains("unreachable") {
            return Err(RecorderError::Configuration {
                bin: PathBuf::from("ffmpeg"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        self.calls.lock().unwrap().push(Call::Start(self.url.clone()));
        self.outputs.lock().unwrap().push(self.output.clone());
        self.state = RecorderState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> StopReport {
        let was_running = self.state == RecorderState::Running;
        if was_running {
            self.calls.lock().unwrap().push(Call::Stop(self.url.clone()));
        }
        self.state = RecorderState::Idle;
        let success = was_running && !self.url.contains("broken");
        StopReport {
            success,
            was_running,
            exit_code: was_running.then_some(if success { 255 } else { 1 }),
            forced: false,
            output: self.output.clone(),
            output_bytes: None,
        }
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn state(&self) -> RecorderState {
        self.state
    }
}
