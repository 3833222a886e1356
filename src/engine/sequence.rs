//! Image-sequence discovery from a single member file.
//!
//! Given one frame of a numbered sequence (`shot_0004.jpg`), derive the
//! shared stem, the zero-padded start frame, and the total frame count by
//! scanning the containing directory for siblings.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("{0} is not part of an image sequence (no trailing frame padding)")]
    NoPadding(PathBuf),

    #[error("could not determine an image list from {0}")]
    EmptySequence(PathBuf),
}

/// A resolved image sequence, anchored at its lowest frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDescriptor {
    /// File name with the trailing digit run and extension removed.
    pub stem: String,
    /// Digit run of the lowest frame, as written on disk (padding preserved).
    pub start_frame: String,
    /// Number of sibling files matching the sequence pattern.
    pub frame_count: usize,
    /// Full path to the lowest frame.
    pub first_file_path: PathBuf,
    /// File extension including the leading dot.
    pub extension: String,
}

impl SequenceDescriptor {
    /// Start frame as an integer (what the encoder's `-start_number` wants).
    /// A digit run wider than `u64` clamps to `u64::MAX` rather than
    /// silently restarting the sequence at zero.
    pub fn start_number(&self) -> u64 {
        self.start_frame.parse().unwrap_or_else(|_| {
            tracing::warn!(start = %self.start_frame, "start frame overflows u64, clamping");
            u64::MAX
        })
    }

    /// Encoder input pattern for the anchor file, with the digit run
    /// replaced by a fixed 4-digit printf placeholder.
    pub fn input_pattern(&self) -> Option<String> {
        let name = self.first_file_path.file_name()?.to_str()?;
        let suffix_len = self.start_frame.len() + self.extension.len();
        let head = name.get(..name.len().checked_sub(suffix_len)?)?;
        let ext = name.get(name.len() - self.extension.len()..)?;
        Some(format!("{head}%04d{ext}"))
    }
}

static TRAILING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)$").expect("trailing digits pattern"));

/// Extract the trailing run of decimal digits from a string, if any.
///
/// Shared between sequence resolution and version-code numbering.
pub fn trailing_digits(value: &str) -> Option<&str> {
    TRAILING_DIGITS.find(value).map(|m| m.as_str())
}

/// If `name` is `stem + digits + ext` (stem/ext compared case-insensitively),
/// return the digit run.
///
/// Works on bytes: a directory sibling's name can put a multibyte character
/// across the stem-length offset, where a `str` split would panic.
fn sibling_digits<'a>(name: &'a str, stem_lower: &str, ext_lower: &str) -> Option<&'a str> {
    let bytes = name.as_bytes();
    if bytes.len() <= stem_lower.len() + ext_lower.len() {
        return None;
    }
    let (head, rest) = bytes.split_at(stem_lower.len());
    if !head.eq_ignore_ascii_case(stem_lower.as_bytes()) {
        return None;
    }
    let (digits, tail) = rest.split_at(rest.len() - ext_lower.len());
    if !tail.eq_ignore_ascii_case(ext_lower.as_bytes()) {
        return None;
    }
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // All-ASCII digit run, so this slice is valid UTF-8.
    std::str::from_utf8(digits).ok()
}

/// Resolve the sequence that `path` belongs to.
///
/// Siblings are ordered by parsed frame number rather than by file name, so
/// a stray frame with a different padding width cannot misorder the
/// sequence.
pub fn resolve(path: &Path) -> Result<SequenceDescriptor, SequenceError> {
    let fname = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SequenceError::NoPadding(path.to_path_buf()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let digits =
        trailing_digits(fname).ok_or_else(|| SequenceError::NoPadding(path.to_path_buf()))?;
    let stem = fname[..fname.len() - digits.len()].to_string();

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let stem_lower = stem.to_lowercase();
    let ext_lower = extension.to_lowercase();

    // (frame number, digit run as written, path)
    let mut frames: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(&dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(run) = sibling_digits(name, &stem_lower, &ext_lower) else {
            continue;
        };
        let Ok(number) = run.parse::<u64>() else {
            continue;
        };
        frames.push((number, run.to_string(), entry.into_path()));
    }

    frames.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    let Some((_, start_frame, first_file_path)) = frames.first().cloned() else {
        return Err(SequenceError::EmptySequence(path.to_path_buf()));
    };

    tracing::debug!(
        stem = %stem,
        start = %start_frame,
        count = frames.len(),
        "resolved image sequence"
    );

    Ok(SequenceDescriptor {
        stem,
        start_frame,
        frame_count: frames.len(),
        first_file_path,
        extension,
    })
}
