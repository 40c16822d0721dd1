use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;

static ANSI_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ansi escape regex")
});

const MAX_CAPTURED_BYTES: usize = 2 * 1024 * 1024;
const MAX_CAPTURED_LINES: usize = 4_000;
pub(crate) const MAX_LINE_LENGTH: usize = 100_000;
pub(crate) const MAX_PENDING_BYTES: usize = 2_000_000;

/// Splits a byte stream, decoded chunk by chunk, into lines.
///
/// `\n`, `\r\n` and a lone `\r` all end a line. Pending text past the byte cap
/// is dropped from the front and counted.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: String,
    max_pending_bytes: Option<usize>,
    dropped_bytes: usize,
}

impl LineSplitter {
    pub fn new(max_pending_bytes: Option<usize>) -> Self {
        Self {
            pending: String::new(),
            max_pending_bytes,
            dropped_bytes: 0,
        }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        self.enforce_cap();

        let mut lines = Vec::new();
        let mut start = 0;
        let bytes = self.pending.as_bytes();
        let mut index = 0;
        while index < bytes.len() {
            match bytes[index] {
                b'\n' => {
                    lines.push(self.pending[start..index].to_string());
                    index += 1;
                    start = index;
                }
                b'\r' => {
                    // A trailing \r may be the first half of \r\n; wait for more.
                    if index + 1 == bytes.len() {
                        break;
                    }
                    lines.push(self.pending[start..index].to_string());
                    index += if bytes[index + 1] == b'\n' { 2 } else { 1 };
                    start = index;
                }
                _ => index += 1,
            }
        }
        self.pending.drain(..start);
        lines
    }

    pub fn take_dropped_bytes(&mut self) -> usize {
        std::mem::take(&mut self.dropped_bytes)
    }

    /// Returns whatever is left after the stream closed.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        rest.strip_suffix('\r').map(ToString::to_string).unwrap_or(rest)
    }

    fn enforce_cap(&mut self) {
        let Some(max) = self.max_pending_bytes else {
            return;
        };
        if self.pending.len() <= max {
            return;
        }
        let mut cut = self.pending.len() - max;
        while !self.pending.is_char_boundary(cut) {
            cut += 1;
        }
        self.pending.drain(..cut);
        self.dropped_bytes = self.dropped_bytes.saturating_add(cut);
    }
}

/// The tail of one output stream, bounded by line count and total bytes.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    lines: VecDeque<String>,
    total_bytes: usize,
    evicted_lines: usize,
}

impl CapturedOutput {
    pub fn push(&mut self, line: String) {
        self.total_bytes = self.total_bytes.saturating_add(line.len());
        self.lines.push_back(line);

        while self.lines.len() > MAX_CAPTURED_LINES || self.total_bytes > MAX_CAPTURED_BYTES {
            let Some(removed) = self.lines.pop_front() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(removed.len());
            self.evicted_lines += 1;
        }
    }

    pub fn evicted_lines(&self) -> usize {
        self.evicted_lines
    }

    pub fn joined(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn sanitize_line(raw: &str) -> String {
    let stripped = ANSI_ESCAPE_RE.replace_all(raw, "");
    let mut line = stripped.replace('\r', "");
    if line.len() > MAX_LINE_LENGTH {
        let mut cut = MAX_LINE_LENGTH;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    line
}

/// Trimmed stdout when it has content, trimmed stderr otherwise.
pub fn choose_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        stderr.trim().to_string()
    } else {
        stdout.to_string()
    }
}
