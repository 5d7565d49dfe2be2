//! Lifecycle events emitted during `start` so the caller can persist
//! progress durably as it happens, rather than only at the end.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    SandboxCreated { sandbox_id: String },
    TunnelCreated { tunnel_id: String, tunnel_token: String },
    InstallStart { name: String, command: String },
    InstallComplete { name: String, command: String, exit_code: i64, output: String },
}
