//! Encoder binary discovery.
//!
//! The ffmpeg executable is resolved once at startup and treated as
//! immutable afterwards; a missing binary is a construction-time error, not
//! a per-encode one.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::encode::EncodeError;

const FFMPEG_BIN: &str = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };

/// Handle to a located ffmpeg executable.
#[derive(Debug, Clone)]
pub struct Encoder {
    exe: PathBuf,
}

impl Encoder {
    /// Locate the encoder: an explicit override first, then the bundled
    /// layout next to the running executable, then a PATH probe.
    pub fn locate(override_path: Option<&Path>) -> Result<Self, EncodeError> {
        if let Some(path) = override_path {
            return Self::from_path(path);
        }

        let bundled = bundled_exe_path();
        if let Some(path) = &bundled {
            if path.is_file() {
                return Ok(Self { exe: path.clone() });
            }
        }

        if path_probe() {
            return Ok(Self {
                exe: PathBuf::from(FFMPEG_BIN),
            });
        }

        Err(EncodeError::ExecutableNotFound(
            bundled.unwrap_or_else(|| PathBuf::from(FFMPEG_BIN)),
        ))
    }

    /// Use a specific executable. Fails if the file does not exist.
    pub fn from_path(path: &Path) -> Result<Self, EncodeError> {
        if path.is_file() {
            Ok(Self {
                exe: path.to_path_buf(),
            })
        } else {
            Err(EncodeError::ExecutableNotFound(path.to_path_buf()))
        }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// First line of `ffmpeg -version`.
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.exe)
            .arg("-version")
            .output()
            .with_context(|| format!("Failed to execute {}", self.exe.display()))?;

        if !output.status.success() {
            anyhow::bail!("encoder version check failed with status: {}", output.status);
        }

        let version_output = String::from_utf8_lossy(&output.stdout);
        let first_line = version_output.lines().next().unwrap_or("Unknown version");
        Ok(first_line.to_string())
    }
}

/// Bundled layout: `<exe dir>/ffmpeg/bin/ffmpeg[.exe]`.
fn bundled_exe_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let root = exe.parent()?;
    Some(root.join("ffmpeg").join("bin").join(FFMPEG_BIN))
}

fn path_probe() -> bool {
    Command::new(FFMPEG_BIN)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
