//! Frame-progress scraping from the encoder's console output.
//!
//! ffmpeg reports progress as an unstructured stats line it keeps rewriting
//! with carriage returns (`frame=  123 fps= 25 ...`), so the stream is split
//! on both `\r` and `\n` and each piece is matched for a frame marker.

use regex::Regex;
use std::io::{self, BufReader, Read};
use std::sync::LazyLock;

static FRAME_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("frame marker pattern"));

/// Extract the frame number from a stats line, if the line carries one.
pub fn frame_marker(line: &str) -> Option<u64> {
    let caps = FRAME_MARKER.captures(line)?;
    caps[1].parse().ok()
}

/// Parser for the encoder's stats output.
///
/// Frame numbers are reported exactly as they arrive; the encoder does not
/// guarantee they are monotonic and no reordering is applied here.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub last_frame: Option<u64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line of encoder output. Returns the frame number when
    /// the line is a progress marker, `None` for everything else.
    pub fn parse_line(&mut self, line: &str) -> Option<u64> {
        let frame = frame_marker(line)?;
        self.last_frame = Some(frame);
        Some(frame)
    }
}

/// Feed `on_line` every `\r`- or `\n`-terminated piece of `reader`, plus a
/// trailing unterminated piece if the stream ends with one.
pub fn scan_lines<R: Read>(reader: R, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    on_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }

    if !pending.is_empty() {
        on_line(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}
