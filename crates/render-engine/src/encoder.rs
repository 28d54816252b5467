//! External encoder subprocess sink.
//!
//! Raw RGB24 frames are streamed to the encoder's stdin, back to back, with
//! no per-frame framing. A dedicated writer thread owns the pipe so that the
//! supervisor's `write` can wait on a bounded channel and still observe
//! cancellation while the encoder is busy.

use std::ffi::OsStr;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{SendTimeoutError, Sender};
use framecast_common::error::{FramecastError, FramecastResult};

use crate::cancel::CancelToken;
use crate::frame::RenderedFrame;
use crate::ordering::POLL_INTERVAL;
use crate::sink::{FrameSink, SinkConfig, SinkExit};

/// Frames queued between `write` and the stdin writer thread.
const PIPE_DEPTH: usize = 2;

/// stdin buffer size.
const STDIN_BUFFER_BYTES: usize = 1 << 20;

/// How long a failed encoder gets to report its exit status before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// How long a healthy encoder may spend finalizing after its input closes.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Lines of encoder stderr quoted in error messages.
const STDERR_TAIL_LINES: usize = 12;

/// Output container, derived from the output file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mov,
    Mkv,
    Webm,
    Other,
}

impl Container {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("mp4") | Some("m4v") => Container::Mp4,
            Some("mov") => Container::Mov,
            Some("mkv") => Container::Mkv,
            Some("webm") => Container::Webm,
            _ => Container::Other,
        }
    }

    fn uses_vp9(self) -> bool {
        self == Container::Webm
    }
}

/// Map quality 0–100 onto the codec's CRF scale (lower CRF = better).
///
/// H.264 spans CRF 40..10, VP9 spans CRF 55..15.
pub fn quality_to_crf(quality: u8, container: Container) -> u8 {
    let q = quality.min(100) as f64;
    let crf = if container.uses_vp9() {
        55.0 - q * 0.4
    } else {
        40.0 - q * 0.3
    };
    crf.round() as u8
}

fn codec_args_for(config: &SinkConfig) -> Vec<String> {
    let container = Container::from_path(&config.output_path);
    let crf = quality_to_crf(config.quality, container).to_string();

    if container.uses_vp9() {
        return vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-crf".to_string(),
            crf,
            "-b:v".to_string(),
            "0".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ];
    }

    let mut args = vec![
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        crf,
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];
    if matches!(container, Container::Mp4 | Container::Mov) {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
    args
}

/// Full encoder argument list for a job.
pub fn encoder_args(config: &SinkConfig) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ];

    // yuv420p needs even dimensions.
    if config.width % 2 == 1 || config.height % 2 == 1 {
        args.push("-vf".to_string());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string());
    }

    args.extend(codec_args_for(config));
    args.push(config.output_path.to_string_lossy().into_owned());
    args
}

/// First line of `program -version`.
pub fn encoder_version(program: &Path) -> FramecastResult<String> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            FramecastError::encoder(None, format!("failed to run {}: {e}", program.display()))
        })?;
    if !output.status.success() {
        return Err(FramecastError::encoder(
            output.status.code(),
            format!("{} -version failed", program.display()),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Encoder subprocess fed through its stdin.
pub struct SubprocessSink {
    child: Option<Child>,
    frames_tx: Option<Sender<RenderedFrame>>,
    writer: Option<JoinHandle<io::Result<u64>>>,
    stderr_task: Option<JoinHandle<String>>,
    cancel: CancelToken,
    frames_written: u64,
    frame_len: usize,
    label: String,
    finalize_timeout: Duration,
    /// Removed on abort or failure. Cleared once the encoder exits cleanly.
    partial_output: Option<PathBuf>,
}

impl SubprocessSink {
    /// Spawn the configured encoder for a job.
    pub fn open(config: &SinkConfig, cancel: &CancelToken) -> FramecastResult<Self> {
        let args = encoder_args(config);
        tracing::debug!(encoder = %config.encoder_path.display(), args = ?args, "Starting encoder");

        let mut cmd = Command::new(&config.encoder_path);
        cmd.args(&args);
        let mut sink = Self::spawn(cmd, config.frame_len, cancel.clone())?;
        sink.partial_output = Some(config.output_path.clone());

        tracing::info!(
            pid = sink.pid(),
            output = %config.output_path.display(),
            width = config.width,
            height = config.height,
            fps = config.fps,
            quality = config.quality,
            total_frames = config.total_frames,
            "Encoder process started"
        );
        Ok(sink)
    }

    /// Spawn an arbitrary command as the frame consumer.
    pub fn spawn(mut cmd: Command, frame_len: usize, cancel: CancelToken) -> FramecastResult<Self> {
        let label = cmd.get_program().to_string_lossy().into_owned();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| FramecastError::encoder(None, format!("failed to start {label}: {e}")))?;

        let (stdin, stderr) = match (child.stdin.take(), child.stderr.take()) {
            (Some(stdin), Some(stderr)) => (stdin, stderr),
            _ => {
                kill_and_reap(&mut child);
                return Err(FramecastError::internal(format!(
                    "failed to capture {label} stdio"
                )));
            }
        };

        // Drain stderr concurrently so the encoder never blocks on a full pipe.
        let stderr_task = thread::Builder::new()
            .name("framecast-encoder-stderr".to_string())
            .spawn(move || -> String {
                let mut reader = BufReader::new(stderr);
                let mut output = String::new();
                match reader.read_to_string(&mut output) {
                    Ok(_) => output,
                    Err(err) => format!("<failed to read encoder stderr: {err}>"),
                }
            });
        let stderr_task = match stderr_task {
            Ok(handle) => handle,
            Err(err) => {
                kill_and_reap(&mut child);
                return Err(FramecastError::internal(format!(
                    "failed to spawn stderr reader: {err}"
                )));
            }
        };

        let (frames_tx, frames_rx) = crossbeam_channel::bounded::<RenderedFrame>(PIPE_DEPTH);
        let writer = thread::Builder::new()
            .name("framecast-encoder-stdin".to_string())
            .spawn(move || -> io::Result<u64> {
                let mut out = BufWriter::with_capacity(STDIN_BUFFER_BYTES, stdin);
                let mut written = 0u64;
                for frame in frames_rx.iter() {
                    out.write_all(frame.pixels())?;
                    written += 1;
                }
                out.flush()?;
                Ok(written)
            });
        let writer = match writer {
            Ok(handle) => handle,
            Err(err) => {
                kill_and_reap(&mut child);
                let _ = stderr_task.join();
                return Err(FramecastError::internal(format!(
                    "failed to spawn encoder writer: {err}"
                )));
            }
        };

        Ok(Self {
            child: Some(child),
            frames_tx: Some(frames_tx),
            writer: Some(writer),
            stderr_task: Some(stderr_task),
            cancel,
            frames_written: 0,
            frame_len,
            label,
            finalize_timeout: FINALIZE_TIMEOUT,
            partial_output: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Frames handed to the stdin writer so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn join_writer(&mut self) -> Option<io::Result<u64>> {
        let handle = self.writer.take()?;
        Some(handle.join().unwrap_or_else(|_| {
            Err(io::Error::new(io::ErrorKind::Other, "encoder writer panicked"))
        }))
    }

    fn join_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }

    /// The far end went away mid-stream. Reap everything and describe why.
    fn collect_failure(&mut self) -> FramecastError {
        self.frames_tx = None;
        let writer = self.join_writer();
        let status = self
            .child
            .take()
            .map(|mut child| wait_with_grace(&mut child, EXIT_GRACE));
        let stderr = self.join_stderr();

        let exit_code = match &status {
            Some(Ok(status)) => status.code(),
            _ => None,
        };
        let mut message = match writer {
            Some(Err(err)) => format!("{} stopped accepting frames: {err}", self.label),
            _ => format!("{} stopped accepting frames", self.label),
        };
        append_stderr(&mut message, &stderr);

        tracing::error!(
            encoder = %self.label,
            exit_code = ?exit_code,
            frames_written = self.frames_written,
            "Encoder exited unexpectedly"
        );
        self.remove_partial_output();
        FramecastError::encoder(exit_code, message)
    }

    fn remove_partial_output(&mut self) {
        let Some(path) = self.partial_output.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial output")
            }
        }
    }
}

impl FrameSink for SubprocessSink {
    fn write(&mut self, frame: RenderedFrame) -> FramecastResult<()> {
        if frame.len() != self.frame_len {
            return Err(FramecastError::internal(format!(
                "frame {} has {} bytes, encoder expects {}",
                frame.index(),
                frame.len(),
                self.frame_len
            )));
        }
        let Some(tx) = self.frames_tx.clone() else {
            return Err(FramecastError::internal("encoder input is already closed"));
        };

        let mut pending = frame;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FramecastError::Cancelled);
            }
            match tx.send_timeout(pending, POLL_INTERVAL) {
                Ok(()) => {
                    self.frames_written += 1;
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(frame)) => pending = frame,
                Err(SendTimeoutError::Disconnected(_)) => return Err(self.collect_failure()),
            }
        }
    }

    fn close(&mut self) -> FramecastResult<SinkExit> {
        self.frames_tx = None;
        let Some(mut child) = self.child.take() else {
            return Err(FramecastError::internal("encoder was already shut down"));
        };
        // The deadline covers flushing the queue too. Once the child is gone
        // a stuck writer sees a broken pipe.
        let status = wait_with_grace(&mut child, self.finalize_timeout);
        let writer = self.join_writer();
        let stderr = self.join_stderr();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.remove_partial_output();
                return Err(FramecastError::encoder(
                    None,
                    format!("failed to wait on {}: {e}", self.label),
                ));
            }
        };
        let exit_code = status.code();

        if !status.success() {
            let mut message = format!("{} exited with {status}", self.label);
            append_stderr(&mut message, &stderr);
            tracing::error!(encoder = %self.label, exit_code = ?exit_code, "Encoder failed");
            self.remove_partial_output();
            return Err(FramecastError::encoder(exit_code, message));
        }
        if let Some(Err(err)) = writer {
            let mut message = format!("failed to stream frames to {}: {err}", self.label);
            append_stderr(&mut message, &stderr);
            self.remove_partial_output();
            return Err(FramecastError::encoder(exit_code, message));
        }

        self.partial_output = None;

        tracing::info!(
            encoder = %self.label,
            frames_written = self.frames_written,
            "Encoder finished"
        );
        Ok(SinkExit {
            exit_code,
            frames_written: self.frames_written,
        })
    }

    fn abort(&mut self) {
        // Kill before closing the queue so the writer cannot flush queued
        // frames into an encoder that is being torn down.
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&mut child);
            self.frames_tx = None;
            let _ = self.join_writer();
            let _ = self.join_stderr();
            tracing::info!(encoder = %self.label, frames_written = self.frames_written, "Encoder aborted");
        }
        self.frames_tx = None;
        self.remove_partial_output();
    }

    fn name(&self) -> &str {
        &self.label
    }
}

impl Drop for SubprocessSink {
    fn drop(&mut self) {
        if self.child.is_some() || self.partial_output.is_some() {
            self.abort();
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_with_grace(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                pid = child.id(),
                grace_secs = grace.as_secs_f64(),
                "Encoder did not exit after closing its input, killing"
            );
            let _ = child.kill();
            return child.wait();
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn append_stderr(message: &mut String, stderr: &str) {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return;
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    message.push_str(": ");
    message.push_str(&tail.join(" | "));
}
