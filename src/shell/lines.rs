//! Output Line Assembly
//!
//! Turns the raw byte chunks read from a shell channel into text lines.
//! Chunks are cut wherever the transport happened to cut them, so a line
//! (or a multi-byte character) may span chunks; the unterminated tail is
//! carried until its newline arrives. Prompts are never newline-terminated,
//! which is why the tail can be inspected separately.

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI, OSC, charset and two-byte escape sequences, plus BEL
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[@-Z\\-_]|\x07",
    )
    .expect("escape sequence pattern is valid")
});

/// Upper bound for an unterminated line before it is force-split
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental chunk-to-line splitter
#[derive(Debug)]
pub struct LineAssembler {
    /// Bytes after the last newline seen
    pending: Vec<u8>,
    /// Force-split threshold for `pending`
    max_line_bytes: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Append a chunk and return every line it completed, cleaned
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == b'\n' {
                lines.push(clean_line(&self.pending));
                self.pending.clear();
            } else {
                self.pending.push(byte);
                if self.pending.len() >= self.max_line_bytes {
                    lines.push(clean_line(&self.pending));
                    self.pending.clear();
                }
            }
        }

        lines
    }

    /// Cleaned text of the unterminated tail, if there is one
    pub fn partial(&self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(clean_line(&self.pending))
        }
    }

    /// Remove the unterminated tail and return it cleaned
    pub fn take_partial(&mut self) -> Option<String> {
        let partial = self.partial();
        self.pending.clear();
        partial
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forget the tail
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Decode one raw line and reduce it to plain text.
///
/// Escape sequences are removed, trailing carriage returns dropped, and a
/// carriage return inside the line keeps only what was written after it,
/// the same way a terminal would overwrite the row.
pub fn clean_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let stripped = ESCAPE_SEQUENCE.replace_all(&text, "");
    let trimmed = stripped.trim_end_matches('\r');
    match trimmed.rfind('\r') {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}
