use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::output::{ensure_parent_dir, output_size};

/// Exit codes ffmpeg uses for a clean finish: 0, and 255 after it handled
/// SIGINT (or `q` on stdin) and flushed the output.
pub const GRACEFUL_EXIT_CODES: &[i32] = &[0, 255];

/// How long the diagnostic reader may linger once the process is gone
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest diagnostic line kept before the rest is dropped
const MAX_LINE_BYTES: usize = 4096;

/// Builds the capture tool invocation for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub ffmpeg_bin: PathBuf,
    pub input_url: String,
    pub output: PathBuf,
    pub max_reconnect_delay_secs: u64,
}

impl CaptureCommand {
    /// Reconnecting, stream-copy ffmpeg arguments
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-hide_banner".to_string());
        // Interrupts arrive as SIGINT on unix; elsewhere `q` is written to stdin
        if cfg!(unix) {
            args.push("-nostdin".to_string());
        }
        // Never overwrite; a clashing path fails this capture instead of another
        args.push("-n".to_string());

        // Reconnect policy
        args.push("-reconnect".to_string());
        args.push("1".to_string());
        args.push("-reconnect_streamed".to_string());
        args.push("1".to_string());
        args.push("-reconnect_on_network_error".to_string());
        args.push("1".to_string());
        args.push("-reconnect_on_http_error".to_string());
        args.push("4xx,5xx".to_string());
        args.push("-reconnect_delay_max".to_string());
        args.push(self.max_reconnect_delay_secs.to_string());

        args.push("-i".to_string());
        args.push(self.input_url.clone());

        // Stream copy, no re-encoding
        args.push("-map".to_string());
        args.push("0".to_string());
        args.push("-c".to_string());
        args.push("copy".to_string());

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Where a supervisor is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Running,
}

/// Outcome of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Whether the recording should be considered usable
    pub success: bool,
    /// False when stop found no process to stop
    pub was_running: bool,
    pub exit_code: Option<i32>,
    /// The process ignored the interrupt and was killed
    pub forced: bool,
    pub output: PathBuf,
    pub output_bytes: Option<u64>,
}

impl StopReport {
    fn not_running(output: PathBuf) -> Self {
        let output_bytes = output_size(&output);
        Self {
            success: false,
            was_running: false,
            exit_code: None,
            forced: false,
            output,
            output_bytes,
        }
    }
}

/// Two-tier success check.
///
/// A graceful exit code wins outright. Otherwise (odd code, or killed) the
/// recording still counts if the output file exists and is not empty.
pub fn judge_stop(exit_code: Option<i32>, forced: bool, output_bytes: Option<u64>) -> bool {
    if !forced {
        if let Some(code) = exit_code {
            if GRACEFUL_EXIT_CODES.contains(&code) {
                return true;
            }
        }
    }
    matches!(output_bytes, Some(n) if n > 0)
}

/// Receives a stop result on the caller's own execution context.
pub trait CompletionSink {
    fn notify(&self, report: StopReport);
}

/// Posting into the caller's event queue; the caller handles it on its own thread.
impl<T> CompletionSink for mpsc::UnboundedSender<T>
where
    T: From<StopReport> + Send,
{
    fn notify(&self, report: StopReport) {
        if self.send(T::from(report)).is_err() {
            debug!("Completion queue closed before the stop result arrived");
        }
    }
}

/// One supervised capture: one input stream into one output file.
pub trait CaptureSession: Send {
    fn start(&mut self) -> impl Future<Output = Result<(), RecorderError>> + Send;

    /// Interrupt, wait, escalate. A call with nothing running is a no-op.
    fn stop(&mut self) -> impl Future<Output = StopReport> + Send;

    fn output(&self) -> &Path;

    fn state(&self) -> RecorderState;
}

/// Creates capture sessions for the scheduler and the interactive controller.
pub trait CaptureFactory {
    type Session: CaptureSession + 'static;

    fn create(&self, input_url: &str, output: PathBuf) -> Self::Session;
}

/// Stop `session` and hand the result to `sink` exactly once.
pub async fn stop_and_notify<C, S>(session: &mut C, sink: &S) -> bool
where
    C: CaptureSession,
    S: CompletionSink,
{
    let report = session.stop().await;
    let success = report.success;
    sink.notify(report);
    success
}

/// Supervises one ffmpeg process
pub struct Recorder {
    command: CaptureCommand,
    stop_timeout: Duration,
    state: RecorderState,
    child: Option<Child>,
    reader: Option<JoinHandle<usize>>,
}

impl Recorder {
    pub fn new(command: CaptureCommand, stop_timeout: Duration) -> Self {
        Self {
            command,
            stop_timeout,
            state: RecorderState::Idle,
            child: None,
            reader: None,
        }
    }

    pub fn command(&self) -> &CaptureCommand {
        &self.command
    }

    fn label(&self) -> String {
        self.command
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "capture".to_string())
    }

    async fn spawn(&mut self) -> Result<(), RecorderError> {
        if self.child.is_some() {
            return Err(RecorderError::AlreadyRunning);
        }
        ensure_parent_dir(&self.command.output)?;

        let args = self.command.args();
        debug!("Executing capture: {} {}", self.command.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = Command::new(&self.command.ffmpeg_bin);
        cmd.args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if cfg!(unix) {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::piped());
        }
        // Own process group, so a terminal Ctrl-C reaches only the supervisor
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| RecorderError::Configuration {
            bin: self.command.ffmpeg_bin.clone(),
            source,
        })?;

        let label = self.label();
        self.reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_diagnostics(stderr, label)));

        info!(
            "Capture started (pid {:?}): {} -> {}",
            child.id(),
            self.command.input_url,
            self.command.output.display()
        );
        self.child = Some(child);
        self.state = RecorderState::Running;
        Ok(())
    }

    async fn shutdown(&mut self) -> StopReport {
        let Some(mut child) = self.child.take() else {
            debug!("Stop requested for {} with no active process", self.label());
            return StopReport::not_running(self.command.output.clone());
        };

        send_interrupt(&mut child).await;

        let (exit_code, forced) = match timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Capture {} exited with {}", self.label(), status);
                (status.code(), false)
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for capture {}: {}; killing", self.label(), e);
                kill(&mut child).await;
                (None, true)
            }
            Err(_) => {
                let err = RecorderError::ProcessTimeout { secs: self.stop_timeout.as_secs() };
                warn!("{} ({}); killing", err, self.label());
                kill(&mut child).await;
                (None, true)
            }
        };

        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            match timeout(READER_JOIN_TIMEOUT, reader).await {
                Ok(Ok(lines)) => trace!("Drained {} diagnostic line(s) from {}", lines, self.label()),
                Ok(Err(e)) => debug!("Diagnostic reader for {} ended abnormally: {}", self.label(), e),
                Err(_) => {
                    debug!("Diagnostic reader for {} still open, aborting", self.label());
                    abort.abort();
                }
            }
        }

        let output_bytes = output_size(&self.command.output);
        let success = judge_stop(exit_code, forced, output_bytes);
        self.state = RecorderState::Idle;

        info!(
            "Capture stopped: {} (exit {:?}, forced {}, {} bytes) -> {}",
            self.command.output.display(),
            exit_code,
            forced,
            output_bytes.unwrap_or(0),
            if success { "ok" } else { "failed" }
        );

        StopReport {
            success,
            was_running: true,
            exit_code,
            forced,
            output: self.command.output.clone(),
            output_bytes,
        }
    }
}

impl CaptureSession for Recorder {
    async fn start(&mut self) -> Result<(), RecorderError> {
        self.spawn().await
    }

    async fn stop(&mut self) -> StopReport {
        self.shutdown().await
    }

    fn output(&self) -> &Path {
        &self.command.output
    }

    fn state(&self) -> RecorderState {
        self.state
    }
}


#[cfg(unix)]
async fn send_interrupt(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return;
    };
    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGINT) {
                warn!("Failed to send SIGINT to capture pid {}: {}", pid, e);
            }
        }
        Err(_) => warn!("Capture pid {} out of range for signalling", pid),
    }
}

#[cfg(not(unix))]
async fn send_interrupt(child: &mut Child) {
    use tokio::io::AsyncWriteExt;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(b"q\n").await {
            warn!("Failed to ask capture process to quit: {}", e);
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill capture process: {}", e);
    }
}

/// Kind of a capture tool diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Progress,
    Problem,
    Status,
}

pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim_start();
    if trimmed.starts_with("frame=")
        || trimmed.starts_with("size=")
        || (trimmed.contains("time=") && trimmed.contains("speed="))
    {
        return LineKind::Progress;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        LineKind::Problem
    } else {
        LineKind::Status
    }
}

/// Read the tool's stderr until EOF, logging each line by kind.
///
/// ffmpeg ends progress lines with `\r`, so both `\r` and `\n` terminate a line.
pub async fn drain_diagnostics<R>(mut reader: R, label: String) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut line = Vec::with_capacity(256);
    let mut count = 0;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("[{}] diagnostic stream error: {}", label, e);
                break;
            }
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if emit_line(&label, &line) {
                    count += 1;
                }
                line.clear();
            } else if line.len() < MAX_LINE_BYTES {
                line.push(byte);
            }
        }
    }
    if emit_line(&label, &line) {
        count += 1;
    }
    count
}

fn emit_line(label: &str, bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    match classify_line(text) {
        LineKind::Progress => trace!("[{}] {}", label, text),
        LineKind::Problem => warn!("[{}] {}", label, text),
        LineKind::Status => debug!("[{}] {}", label, text),
    }
    true
}

/// Builds ffmpeg-backed recorders from configuration
#[derive(Debug, Clone)]
pub struct RecorderFactory {
    pub ffmpeg_bin: PathBuf,
    pub stop_timeout: Duration,
    pub max_reconnect_delay_secs: u64,
}

impl RecorderFactory {
    pub fn from_config(cfg: &RecorderConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            stop_timeout: Duration::from_secs(cfg.stop_timeout_secs),
            max_reconnect_delay_secs: cfg.max_reconnect_delay_secs,
        }
    }
}

impl CaptureFactory for RecorderFactory {
    type Session = Recorder;

    fn create(&self, input_url: &str, output: PathBuf) -> Recorder {
        Recorder::new(
            CaptureCommand {
                ffmpeg_bin: self.ffmpeg_bin.clone(),
                input_url: input_url.to_string(),
                output,
                max_reconnect_delay_secs: self.max_reconnect_delay_secs,
            },
            self.stop_timeout,
        )
    }
}
