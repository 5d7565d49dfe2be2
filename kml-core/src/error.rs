use std::fmt;
use std::time::Duration;

/// Errors returned by any component of the orchestrator.
///
/// This is the single error type shared across the sandbox-provider client,
/// the edge client, the catalog, the AI runner, and the orchestrator itself,
/// so that `?` composes across crate boundaries without manual wrapping at
/// every call site.
#[derive(Debug)]
pub enum KmlError {
    /// Failure of an external RPC: network error, non-2xx status, or a body
    /// that didn't parse the way the caller expected.
    Transport { status: Option<u16>, message: String },
    /// Missing required credential, missing session record, or an operation
    /// attempted while the sandbox is not in the state it requires.
    Precondition(String),
    /// `catalog.create` (or an equivalent create-if-absent call) on a slug
    /// that already exists.
    Duplicate(String),
    /// A step in the install list exited non-zero.
    InstallFailure {
        name: String,
        command: String,
        exit_code: i64,
        output: String,
    },
    /// Failure during `delete`, `destroy`, or `delete_worker`. Callers that
    /// want strict propagation may still construct and inspect this, but
    /// orchestrator cleanup paths log and swallow it instead of returning it.
    CleanupFailure(String),
    /// A wait loop elapsed before the awaited state was reached.
    Timeout { what: String, after: Duration },
    /// Malformed on-disk state (invalid JSON, missing directory, I/O error).
    Storage(String),
}

impl fmt::Display for KmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KmlError::Transport { status: Some(s), message } => {
                write!(f, "transport error (HTTP {s}): {message}")
            }
            KmlError::Transport { status: None, message } => {
                write!(f, "transport error: {message}")
            }
            KmlError::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            KmlError::Duplicate(slug) => write!(f, "duplicate: '{slug}' already exists"),
            KmlError::InstallFailure { name, command, exit_code, output } => {
                write!(
                    f,
                    "install step '{name}' ({command}) exited with exit code {exit_code}: {output}"
                )
            }
            KmlError::CleanupFailure(msg) => write!(f, "cleanup failed: {msg}"),
            KmlError::Timeout { what, after } => {
                write!(f, "timed out waiting for {what} after {after:?}")
            }
            KmlError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for KmlError {}

impl From<reqwest::Error> for KmlError {
    fn from(err: reqwest::Error) -> Self {
        KmlError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for KmlError {
    fn from(err: serde_json::Error) -> Self {
        KmlError::Storage(format!("invalid JSON: {err}"))
    }
}

impl From<std::io::Error> for KmlError {
    fn from(err: std::io::Error) -> Self {
        KmlError::Storage(err.to_string())
    }
}

/// Classify an HTTP status code plus a response body fragment into a
/// [`KmlError::Transport`]. Shared by the sandbox-provider and edge clients
/// so both classify 4xx/5xx identically.
pub fn classify_http_status(status: reqwest::StatusCode, body: &str) -> KmlError {
    let fragment: String = body.chars().take(512).collect();
    KmlError::Transport {
        status: Some(status.as_u16()),
        message: fragment,
    }
}

pub type Result<T> = std::result::Result<T, KmlError>;
