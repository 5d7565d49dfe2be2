//! Typed RPC client for the remote sandbox-provisioning service (C1).
//!
//! All interaction with the provider goes through HTTPS; there is no local
//! container runtime involved. Every request carries a bearer token and a
//! caller-supplied or default timeout; non-2xx responses are classified via
//! [`kml_core::error::classify_http_status`].

pub mod types;

use std::time::Duration;

use futures_util::StreamExt;
use kml_core::error::{KmlError, Result};
use kml_core::http::{bearer_headers, build_url, http_client, send_json};
use kml_core::util::poll_until;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::info;

pub use types::{CreateSandboxParams, ExecResult, GitCloneParams, SandboxRecord, SandboxState, SnapshotRecord};

/// Default timeout for a single request (§5: 30s open / 300s total).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Default timeout for long-running requests (install commands, PTY runs).
pub const LONG_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
/// `wait_for_sandbox` default timeout.
pub const WAIT_FOR_SANDBOX_TIMEOUT: Duration = Duration::from_secs(120);
/// `wait_for_snapshot` default timeout.
pub const WAIT_FOR_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(600);
/// Wait-for-stopped default timeout.
pub const WAIT_FOR_STOPPED_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct SandboxProviderClient {
    base_url: String,
    api_key: String,
}

impl SandboxProviderClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        bearer_headers(&self.api_key)
    }

    // -- Snapshots -----------------------------------------------------

    pub async fn create_snapshot(
        &self,
        name: &str,
        build_file: &str,
        cpu: u32,
        memory_gib: u32,
        disk_gib: u32,
    ) -> Result<SnapshotRecord> {
        let url = build_url(&self.base_url, "/snapshots")?;
        let body = json!({
            "name": name,
            "buildFile": build_file,
            "cpu": cpu,
            "memoryGib": memory_gib,
            "diskGib": disk_gib,
        });
        let value = send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        parse(value)
    }

    pub async fn find_snapshot_by_name(&self, name: &str) -> Result<Option<SnapshotRecord>> {
        let url = build_url(&self.base_url, &format!("/snapshots?name={name}"))?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        let items: Vec<SnapshotRecord> = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            Value::Null => Vec::new(),
            other => vec![serde_json::from_value(other)?],
        };
        Ok(items.into_iter().find(|s| s.name == name))
    }

    pub async fn wait_for_snapshot(&self, id: &str, timeout: Duration) -> Result<SnapshotRecord> {
        poll_until("snapshot readiness", timeout, POLL_INTERVAL, || async {
            let url = build_url(&self.base_url, &format!("/snapshots/{id}"))?;
            let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
            let record: SnapshotRecord = parse(value)?;
            match record.state.as_ref() {
                Some(s) if s.is_ready() => Ok(Some(record)),
                Some(s) if s.is_failed() => Err(KmlError::Precondition(format!(
                    "snapshot {id} entered failed state: {s:?}"
                ))),
                _ => Ok(None),
            }
        })
        .await
    }

    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/snapshots/{id}"))?;
        send_json(Method::DELETE, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    // -- Sandboxes -------------------------------------------------------

    pub async fn create_sandbox(&self, params: &CreateSandboxParams) -> Result<SandboxRecord> {
        let url = build_url(&self.base_url, "/sandboxes")?;
        let body = serde_json::to_value(params)?;
        let value = send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        let record: SandboxRecord = parse(value)?;
        info!(sandbox_id = %record.id, name = %params.name, "sandbox created");
        Ok(record)
    }

    pub async fn get_sandbox(&self, id: &str) -> Result<SandboxRecord> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{id}"))?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        parse(value)
    }

    pub async fn find_sandbox_by_name(&self, name: &str) -> Result<Option<SandboxRecord>> {
        let sandboxes = self.list_sandboxes().await?;
        Ok(sandboxes.into_iter().find(|s| s.name == name))
    }

    pub async fn list_sandboxes(&self) -> Result<Vec<SandboxRecord>> {
        let url = build_url(&self.base_url, "/sandboxes")?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        match value {
            Value::Null => Ok(Vec::new()),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    pub async fn start_sandbox(&self, id: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{id}/start"))?;
        send_json(Method::POST, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn stop_sandbox(&self, id: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{id}/stop"))?;
        send_json(Method::POST, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Delete a sandbox, tolerating the case where it is already gone.
    pub async fn delete_sandbox(&self, id: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{id}"))?;
        match send_json(Method::DELETE, url, None, self.headers()?, DEFAULT_REQUEST_TIMEOUT).await {
            Ok(_) => {
                info!(sandbox_id = id, "sandbox deleted");
                Ok(())
            }
            Err(KmlError::Transport { status: Some(404), .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn wait_for_sandbox(&self, id: &str, timeout: Duration) -> Result<SandboxRecord> {
        poll_until("sandbox readiness", timeout, POLL_INTERVAL, || async {
            let record = self.get_sandbox(id).await?;
            if record.state.is_ready() {
                Ok(Some(record))
            } else if record.state.is_failed() {
                Err(KmlError::Precondition(format!(
                    "sandbox {id} entered failed state: {:?}",
                    record.state
                )))
            } else {
                Ok(None)
            }
        })
        .await
    }

    pub async fn wait_for_sandbox_stopped(&self, id: &str, timeout: Duration) -> Result<()> {
        poll_until("sandbox stopped", timeout, POLL_INTERVAL, || async {
            match self.get_sandbox(id).await {
                Ok(record) if record.state.is_stopped() => Ok(Some(())),
                Ok(_) => Ok(None),
                Err(KmlError::Transport { status: Some(404), .. }) => Ok(Some(())),
                Err(err) => Err(err),
            }
        })
        .await
    }

    // -- Files / commands --------------------------------------------------

    pub async fn upload_file(&self, sandbox_id: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{sandbox_id}/files"))?;
        let client = http_client()?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(path.to_string());
        let form = reqwest::multipart::Form::new().part("file", part).text("path", path.to_string());

        let response = client
            .post(url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(kml_core::error::classify_http_status(status, &body));
        }
        Ok(())
    }

    pub async fn execute_command(&self, sandbox_id: &str, command: &str, timeout: Duration) -> Result<ExecResult> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{sandbox_id}/exec"))?;
        let body = json!({ "command": command, "timeoutSeconds": timeout.as_secs() });
        let value = send_json(Method::POST, url, Some(body), self.headers()?, timeout + Duration::from_secs(10)).await?;
        parse(value)
    }

    pub async fn git_clone(&self, sandbox_id: &str, params: &GitCloneParams) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{sandbox_id}/git/clone"))?;
        let body = serde_json::to_value(params)?;
        send_json(Method::POST, url, Some(body), self.headers()?, LONG_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    // -- Persistent shell sessions ----------------------------------------

    /// Open a named, long-lived background shell. Output is not retrievable
    /// after the fact; callers that need process status use
    /// [`Self::execute_command`] with a fresh one-shot command instead.
    pub async fn create_session(&self, sandbox_id: &str, session_id: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/sandboxes/{sandbox_id}/sessions"))?;
        let body = json!({ "sessionId": session_id });
        send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Fire a command into a persistent session. Returns as soon as the
    /// provider has accepted it; it does not wait for completion.
    pub async fn session_execute(&self, sandbox_id: &str, session_id: &str, command: &str) -> Result<()> {
        let url = build_url(
            &self.base_url,
            &format!("/sandboxes/{sandbox_id}/sessions/{session_id}/exec"),
        )?;
        let body = json!({ "command": command });
        send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Open a PTY, stream raw bytes to `on_chunk` as they arrive, and block
    /// until the command exits. `on_chunk` is called serially on the calling
    /// task; the streaming itself runs on the current `tokio` runtime.
    ///
    /// The provider appends one out-of-band control frame after the
    /// command's own output, prefixed with [`EXIT_FRAME_PREFIX`], carrying
    /// its exit code; that frame is never forwarded to `on_chunk`. Returns
    /// `Ok(None)` if the stream closed without one (the provider gave up
    /// mid-command, e.g. on a connection drop).
    pub async fn run_pty_command<F>(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
        mut on_chunk: F,
    ) -> Result<Option<i64>>
    where
        F: FnMut(&[u8]),
    {
        let url = build_url(&self.base_url, &format!("/sandboxes/{sandbox_id}/pty"))?;
        let client = http_client()?;
        let body = json!({ "command": command });

        let response = tokio::time::timeout(
            timeout,
            client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| KmlError::Timeout {
            what: format!("PTY command on sandbox {sandbox_id}"),
            after: timeout,
        })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(kml_core::error::classify_http_status(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut tail: Vec<u8> = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(KmlError::Timeout {
                    what: format!("PTY command on sandbox {sandbox_id}"),
                    after: timeout,
                });
            }
            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    tail.extend_from_slice(&chunk);
                    if let Some(exit_code) = take_exit_frame(&mut tail) {
                        if !tail.is_empty() {
                            on_chunk(&tail);
                        }
                        return Ok(Some(exit_code));
                    }
                    // No complete frame yet: hold back from the first byte
                    // that could be part of one (either a full prefix match
                    // still waiting on its newline, or a partial match
                    // trailing off the end of this chunk) and emit the rest.
                    let hold_from = find_subslice(&tail, EXIT_FRAME_PREFIX)
                        .unwrap_or_else(|| tail.len() - partial_suffix_match_len(&tail, EXIT_FRAME_PREFIX));
                    if hold_from > 0 {
                        on_chunk(&tail[..hold_from]);
                        tail.drain(..hold_from);
                    }
                }
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(None) => {
                    if !tail.is_empty() {
                        on_chunk(&tail);
                    }
                    return Ok(None);
                }
                Err(_) => {
                    return Err(KmlError::Timeout {
                        what: format!("PTY command on sandbox {sandbox_id}"),
                        after: timeout,
                    });
                }
            }
        }
    }
}

/// Out-of-band control frame the provider appends once the PTY command
/// exits, carrying its exit code: `\x00EXIT:<code>\n`.
pub const EXIT_FRAME_PREFIX: &[u8] = b"\x00EXIT:";

/// If `buf` contains a complete exit frame, remove it (and everything after
/// it — the frame is always last) and return the parsed exit code.
fn take_exit_frame(buf: &mut Vec<u8>) -> Option<i64> {
    let start = find_subslice(buf, EXIT_FRAME_PREFIX)?;
    let rest = &buf[start + EXIT_FRAME_PREFIX.len()..];
    let newline = rest.iter().position(|&b| b == b'\n')?;
    let code: i64 = std::str::from_utf8(&rest[..newline]).ok()?.trim().parse().ok()?;
    buf.truncate(start);
    Some(code)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Length of the longest suffix of `haystack` that equals a prefix of
/// `needle` — i.e. how much of `haystack`'s tail could be the start of a
/// `needle` match that continues in the next chunk.
fn partial_suffix_match_len(haystack: &[u8], needle: &[u8]) -> usize {
    let max_len = needle.len().saturating_sub(1).min(haystack.len());
    (1..=max_len)
        .rev()
        .find(|&len| haystack[haystack.len() - len..] == needle[..len])
        .unwrap_or(0)
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(Into::into)
}
