//! PTY output filtering (§4.4).
//!
//! The coding assistant's PTY emits terminal control codes, a banner before
//! its first structured line, and a stream of newline-delimited JSON after
//! that. [`LineFilter`] turns a raw byte stream into a sequence of JSON
//! lines: nothing before the first `{"type":` sentinel is ever surfaced,
//! ANSI escapes are stripped, and lines that don't parse as JSON are
//! dropped rather than passed through.

const SENTINEL: &[u8] = b"{\"type\":";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AnsiMode {
    Normal,
    Esc,
    Csi,
    Osc,
}

/// Stateful filter over an arbitrarily-chunked byte stream.
pub struct LineFilter {
    sentinel_found: bool,
    /// Holds up to `SENTINEL.len() - 1` trailing bytes while we're still
    /// looking for the sentinel, so a match spanning a chunk boundary isn't
    /// missed.
    pending: Vec<u8>,
    ansi: AnsiMode,
    /// Bytes accumulated for the current (still unterminated) line, after
    /// ANSI stripping.
    line: Vec<u8>,
}

impl Default for LineFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFilter {
    pub fn new() -> Self {
        Self {
            sentinel_found: false,
            pending: Vec::new(),
            ansi: AnsiMode::Normal,
            line: Vec::new(),
        }
    }

    /// Feed a chunk of raw PTY bytes, returning any complete, validly-JSON
    /// lines it produced. Partial lines are buffered until the next `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let bytes = if self.sentinel_found {
            chunk.to_vec()
        } else {
            match self.find_sentinel(chunk) {
                Some(from) => chunk[from..].to_vec(),
                None => return Vec::new(),
            }
        };

        let mut out = Vec::new();
        for &byte in &bytes {
            match self.ansi {
                AnsiMode::Normal => match byte {
                    0x1b => self.ansi = AnsiMode::Esc,
                    b'\n' => {
                        self.flush_line(&mut out);
                    }
                    _ => self.line.push(byte),
                },
                AnsiMode::Esc => match byte {
                    b'[' => self.ansi = AnsiMode::Csi,
                    b']' => self.ansi = AnsiMode::Osc,
                    _ => self.ansi = AnsiMode::Normal,
                },
                AnsiMode::Csi => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.ansi = AnsiMode::Normal;
                    }
                }
                AnsiMode::Osc => {
                    if byte == 0x07 {
                        self.ansi = AnsiMode::Normal;
                    }
                }
            }
        }
        out
    }

    /// Scan `chunk` (together with any carried-over `pending` bytes) for
    /// the sentinel. Returns the offset into `chunk` where the sentinel
    /// match begins, if found this call.
    fn find_sentinel(&mut self, chunk: &[u8]) -> Option<usize> {
        let mut haystack = std::mem::take(&mut self.pending);
        let carried = haystack.len();
        haystack.extend_from_slice(chunk);

        if let Some(pos) = find_subslice(&haystack, SENTINEL) {
            self.sentinel_found = true;
            // pos indexes into haystack (carried pending + chunk); if the
            // match starts inside the carried prefix, the whole chunk is
            // past the sentinel start.
            return Some(pos.saturating_sub(carried));
        }

        let keep = SENTINEL.len().saturating_sub(1);
        if haystack.len() > keep {
            self.pending = haystack[haystack.len() - keep..].to_vec();
        } else {
            self.pending = haystack;
        }
        None
    }

    fn flush_line(&mut self, out: &mut Vec<String>) {
        let line = std::mem::take(&mut self.line);
        if let Ok(text) = String::from_utf8(line) {
            if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                out.push(text);
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
