//! Single-line progress reporting (§7): every step prints on one line with
//! a trailing `done|warning|skipped` marker.

use std::io::Write;

pub enum Marker {
    Done,
    Warning,
    Skipped,
}

impl Marker {
    fn as_str(&self) -> &'static str {
        match self {
            Marker::Done => "done",
            Marker::Warning => "warning",
            Marker::Skipped => "skipped",
        }
    }
}

/// Print `"{label}... {marker}"` and flush immediately, so progress is
/// visible even if a later step hangs.
pub fn step(label: &str, marker: Marker) {
    println!("{label}... {}", marker.as_str());
    let _ = std::io::stdout().flush();
}

/// Print the one-line error message `§7` calls for, to stderr.
pub fn error(message: &str) {
    eprintln!("error: {message}");
}

/// Print an informational line with no trailing marker, for steps that
/// are starting rather than concluding (e.g. an install step about to run).
pub fn note(message: &str) {
    println!("{message}");
}
