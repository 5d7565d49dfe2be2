use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sandbox or snapshot as reported by the provider.
/// The provider is free to use other strings; anything unrecognized
/// deserializes to [`SandboxState::Other`] rather than failing, since the
/// client must not treat a new/unknown provider state as corruption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SandboxState {
    Creating,
    Started,
    Running,
    Stopping,
    Stopped,
    Error,
    Active,
    Ready,
    Failed,
    Other(String),
}

impl SandboxState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SandboxState::Started | SandboxState::Running | SandboxState::Active | SandboxState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SandboxState::Error | SandboxState::Failed)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, SandboxState::Stopped | SandboxState::Error)
    }
}

impl From<String> for SandboxState {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "creating" => SandboxState::Creating,
            "started" => SandboxState::Started,
            "running" => SandboxState::Running,
            "stopping" => SandboxState::Stopping,
            "stopped" => SandboxState::Stopped,
            "error" => SandboxState::Error,
            "active" => SandboxState::Active,
            "ready" => SandboxState::Ready,
            "failed" => SandboxState::Failed,
            _ => SandboxState::Other(s),
        }
    }
}

impl From<SandboxState> for String {
    fn from(state: SandboxState) -> Self {
        match state {
            SandboxState::Creating => "creating".into(),
            SandboxState::Started => "started".into(),
            SandboxState::Running => "running".into(),
            SandboxState::Stopping => "stopping".into(),
            SandboxState::Stopped => "stopped".into(),
            SandboxState::Error => "error".into(),
            SandboxState::Active => "active".into(),
            SandboxState::Ready => "ready".into(),
            SandboxState::Failed => "failed".into(),
            SandboxState::Other(s) => s,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<SandboxState>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: String,
    pub name: String,
    pub state: SandboxState,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CreateSandboxParams {
    pub snapshot: String,
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub public: bool,
    #[serde(rename = "autoStopInterval")]
    pub auto_stop_interval: u32,
}

impl CreateSandboxParams {
    pub fn new(snapshot: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            name: name.into(),
            env: HashMap::new(),
            public: false,
            auto_stop_interval: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GitCloneParams {
    pub url: String,
    pub path: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}
