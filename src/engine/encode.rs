//! Transcode invocation: command construction, child-process tracking, and
//! failure policy for turning movies or image sequences into review movies.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::locate::Encoder;
use super::progress::{scan_lines, ProgressParser};
use super::sequence::SequenceDescriptor;

pub const DEFAULT_FRAME_RATE: f64 = 23.98;

/// Letterbox target used when scaling is requested.
const SCALE_FIT: &str = r"scale=iw*min(720/iw\,480/ih):ih*min(720/iw\,480/ih)";
const PAD_CENTER: &str = "pad=720:480:(720-iw)/2:(480-ih)/2";

/// How often the wait loop wakes up to check deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Lines of non-progress output retained for failure diagnostics.
const OUTPUT_TAIL_LINES: usize = 40;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("could not find the encoder executable at {0}")]
    ExecutableNotFound(PathBuf),

    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),

    #[error("input path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("encoder exited with status {code:?}")]
    ProcessFailure { code: Option<i32>, detail: String },

    #[error("encoder produced no output within {0:?}")]
    Timeout(Duration),

    #[error("encode was cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output compression scheme. Only the two review formats are recognized;
/// anything else fails at parse time, before a process can be spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mjpeg,
    H264,
}

impl FromStr for Codec {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mjpeg" => Ok(Codec::Mjpeg),
            "h264" => Ok(Codec::H264),
            other => Err(EncodeError::UnsupportedCodec(other.to_string())),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Mjpeg => write!(f, "mjpeg"),
            Codec::H264 => write!(f, "h264"),
        }
    }
}

/// What the encoder reads: a single movie file, or a resolved sequence.
#[derive(Debug, Clone)]
pub enum EncodeInput {
    Movie(PathBuf),
    Sequence(SequenceDescriptor),
}

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub input: EncodeInput,
    pub output_path: PathBuf,
    /// Scale-to-fit and letterbox the output into a 720x480 box.
    pub scale: bool,
    pub frame_rate: f64,
    /// 3D color lookup table applied during encoding, if the file exists.
    pub lut_3d: Option<PathBuf>,
    pub codec: Codec,
    /// Extra encoder arguments appended verbatim (shell-style quoting).
    pub extra_args: Option<String>,
}

impl EncodeRequest {
    pub fn new(input: EncodeInput, output_path: PathBuf) -> Self {
        Self {
            input,
            output_path,
            scale: false,
            frame_rate: DEFAULT_FRAME_RATE,
            lut_3d: None,
            codec: Codec::H264,
            extra_args: None,
        }
    }
}

/// Set by the caller to abort an in-flight encode; checked between channel
/// polls, so the child dies within one poll interval.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Overall deadline for the child process. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelFlag>,
}

/// The encoder binary expects forward slashes regardless of host platform.
fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_rate(rate: f64) -> String {
    format!("{rate}")
}

/// Build the full encoder command line for a request, including its working
/// directory. Does not touch the filesystem beyond probing the LUT path.
pub fn build_encode_cmd(encoder: &Encoder, request: &EncodeRequest) -> Result<Command, EncodeError> {
    if !(request.frame_rate > 0.0) {
        return Err(EncodeError::InvalidFrameRate(request.frame_rate));
    }

    let mut cmd = Command::new(encoder.exe());
    cmd.arg("-y");

    let mut cwd: PathBuf;
    match &request.input {
        EncodeInput::Movie(path) => {
            cwd = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            cmd.arg("-r").arg(format_rate(request.frame_rate));
            cmd.arg("-i").arg(slash_path(path));
        }
        EncodeInput::Sequence(seq) => {
            let anchor_dir = seq
                .first_file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let pattern = seq
                .input_pattern()
                .ok_or_else(|| EncodeError::NonUtf8Path(seq.first_file_path.clone()))?;

            cmd.arg("-start_number").arg(seq.start_number().to_string());
            cmd.arg("-f").arg("image2");
            cmd.arg("-r").arg(format_rate(request.frame_rate));
            cmd.arg("-i").arg(slash_path(&anchor_dir.join(pattern)));
            cwd = anchor_dir;
        }
    }

    match request.codec {
        // Motion JPEG at top quality scale
        Codec::Mjpeg => {
            cmd.args(["-vcodec", "mjpeg", "-qscale", "1"]);
        }
        // H.264, visually near-lossless
        Codec::H264 => {
            cmd.args(["-c:v", "libx264", "-preset", "slow", "-crf", "18"]);
        }
    }

    let mut filters: Vec<String> = Vec::new();

    if let Some(lut) = &request.lut_3d {
        if lut.is_file() {
            let base = lut
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| EncodeError::NonUtf8Path(lut.clone()))?;
            filters.push(format!("lut3d=file={base}"));
            // The filter references the LUT by base name, so the working
            // directory has to follow the LUT, not the input.
            cwd = lut
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
        }
    }

    if request.scale {
        cmd.args(["-aspect", "1.5"]);
        filters.push(SCALE_FIT.to_string());
        filters.push(PAD_CENTER.to_string());
    }

    if !filters.is_empty() {
        cmd.arg("-vf").arg(filters.join(","));
    }

    if let Some(extra) = &request.extra_args {
        apply_extra_args(&mut cmd, extra);
    }

    cmd.arg(slash_path(&request.output_path));
    cmd.current_dir(cwd);

    Ok(cmd)
}

/// Append additional user-provided encoder arguments, parsed shell-style so
/// quoted strings survive.
fn apply_extra_args(cmd: &mut Command, extra: &str) {
    if extra.is_empty() {
        return;
    }
    if let Some(args) = shlex::split(extra) {
        for arg in args {
            cmd.arg(arg);
        }
    } else {
        for arg in extra.split_whitespace() {
            cmd.arg(arg);
        }
    }
}

/// Render a command for logs and dry runs.
pub fn format_cmd(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|arg| {
        let s = arg.to_string_lossy();
        if s.contains(' ') {
            format!("\"{s}\"")
        } else {
            s.to_string()
        }
    }));
    parts.join(" ")
}

enum StreamEvent {
    Frame(u64),
    Eof,
}

/// Scan one child stream on its own thread: progress markers go to the
/// channel, everything else into a bounded tail returned at EOF.
fn spawn_scanner<R>(stream: R, tx: Sender<StreamEvent>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut parser = ProgressParser::new();
        let mut tail: VecDeque<String> = VecDeque::new();
        let _ = scan_lines(stream, |line| {
            if let Some(frame) = parser.parse_line(line) {
                let _ = tx.send(StreamEvent::Frame(frame));
            } else {
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        });
        let _ = tx.send(StreamEvent::Eof);
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

fn is_cancelled(opts: &EncodeOptions) -> bool {
    opts.cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Launch the command and track it to completion.
///
/// This is the exit-code layer: the child's status is returned as-is along
/// with a tail of its non-progress output; interpreting a non-zero status
/// is the caller's policy. The sink fires once per progress marker, in
/// arrival order.
pub fn run_encoder(
    cmd: &mut Command,
    opts: &EncodeOptions,
    mut sink: Option<&mut dyn FnMut(u64)>,
) -> Result<(ExitStatus, String), EncodeError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_scanner(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_scanner(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = opts.timeout.map(|t| Instant::now() + t);
    let mut open_streams = readers.len();

    while open_streams > 0 {
        if is_cancelled(opts) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncodeError::Cancelled);
        }

        let mut wait = POLL_INTERVAL;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = child.kill();
                let _ = child.wait();
                // opts.timeout is Some whenever deadline is
                return Err(EncodeError::Timeout(opts.timeout.unwrap_or_default()));
            }
            wait = wait.min(remaining);
        }

        match rx.recv_timeout(wait) {
            Ok(StreamEvent::Frame(frame)) => {
                if let Some(sink) = sink.as_mut() {
                    sink(frame);
                }
            }
            Ok(StreamEvent::Eof) => open_streams -= 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // EOF on both pipes does not mean the child exited; keep honoring the
    // deadline and cancel flag while waiting for it.
    let status = loop {
        if is_cancelled(opts) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncodeError::Cancelled);
        }
        if let Some(deadline) = deadline {
            if deadline.saturating_duration_since(Instant::now()).is_zero() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EncodeError::Timeout(opts.timeout.unwrap_or_default()));
            }
        }
        if deadline.is_none() && opts.cancel.is_none() {
            break child.wait()?;
        }
        if let Some(status) = child.try_wait()? {
            break status;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut tails: Vec<String> = readers
        .into_iter()
        .map(|handle| handle.join().unwrap_or_default())
        .collect();
    tails.retain(|t| !t.is_empty());

    Ok((status, tails.join("\n")))
}

/// Encode a request to its output path, streaming frame progress to `sink`.
///
/// Validation failures surface before any process is spawned. A non-zero
/// exit removes whatever partial output the child left behind, so a file at
/// `output_path` after `Ok(())` is trustworthy.
pub fn encode<F>(
    encoder: &Encoder,
    request: &EncodeRequest,
    opts: &EncodeOptions,
    mut sink: F,
) -> Result<(), EncodeError>
where
    F: FnMut(u64),
{
    let mut cmd = build_encode_cmd(encoder, request)?;

    if let Some(parent) = request.output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!(command = %format_cmd(&cmd), "launching encoder");

    let result = run_encoder(&mut cmd, opts, Some(&mut sink));

    let (status, tail) = match result {
        Ok(ok) => ok,
        Err(err) => {
            let _ = fs::remove_file(&request.output_path);
            return Err(err);
        }
    };

    if !status.success() {
        tracing::warn!(status = ?status.code(), "encoder failed:\n{tail}");
        let _ = fs::remove_file(&request.output_path);
        return Err(EncodeError::ProcessFailure {
            code: status.code(),
            detail: tail,
        });
    }

    Ok(())
}
