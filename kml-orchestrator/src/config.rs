//! The configuration the orchestrator needs to run one session's lifecycle
//! (§6 "Configuration hash consumed by the orchestrator").

use std::collections::BTreeMap;

/// One entry of the `install` list: either a bare command, or a
/// `{name, command}` pair used to label progress events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallStep {
    Command(String),
    Named { name: String, command: String },
}

impl InstallStep {
    pub fn command(&self) -> &str {
        match self {
            InstallStep::Command(c) => c,
            InstallStep::Named { command, .. } => command,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InstallStep::Command(c) => c,
            InstallStep::Named { name, .. } => name,
        }
    }
}

/// Configuration for one session's `start` lifecycle. The AI backend's own
/// credentials (`ANTHROPIC_AUTH_TOKEN`/`ANTHROPIC_BASE_URL`) aren't part of
/// this struct — they're only needed later, by `run`, which takes them
/// directly rather than threading them through the sandbox-creation path.
///
/// The `resume_*` fields are the "resume keys" of §6's configuration hash:
/// prior session state the caller already has on hand (typically read
/// straight out of the catalog record), so `start` can tell a session it
/// has seen before from a genuinely fresh one instead of relying solely on
/// the provider's/edge's own find-by-name fallbacks.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub slug: String,
    pub service_name: String,
    pub domain: String,
    pub git_repo: Option<String>,
    pub git_branch: String,
    pub git_token: Option<String>,
    pub install: Vec<InstallStep>,
    pub processes: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub worker_files: BTreeMap<String, String>,
    pub worker_bindings: BTreeMap<String, String>,
    pub worker_injection: Option<String>,
    pub resume_sandbox_id: Option<String>,
    pub resume_access_token: Option<String>,
    pub resume_created_at: Option<String>,
    pub resume_tunnel_id: Option<String>,
    pub resume_tunnel_token: Option<String>,
}

impl SessionConfig {
    pub fn new(slug: impl Into<String>, service_name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            service_name: service_name.into(),
            domain: domain.into(),
            git_repo: None,
            git_branch: "main".to_string(),
            git_token: None,
            install: Vec::new(),
            processes: BTreeMap::new(),
            env: BTreeMap::new(),
            worker_files: BTreeMap::new(),
            worker_bindings: BTreeMap::new(),
            worker_injection: None,
            resume_sandbox_id: None,
            resume_access_token: None,
            resume_created_at: None,
            resume_tunnel_id: None,
            resume_tunnel_token: None,
        }
    }

    /// Carry a catalog record's resume keys into this config, so `start`
    /// can see what the session already had before this call.
    pub fn with_resume_state(mut self, record: &kml_catalog::SessionRecord) -> Self {
        self.resume_sandbox_id = record.sandbox_id.clone();
        self.resume_access_token = Some(record.access_token.clone());
        self.resume_created_at = Some(record.created_at.clone());
        self.resume_tunnel_id = record.tunnel_id.clone();
        self.resume_tunnel_token = record.tunnel_token.clone();
        self
    }
}

/// Normalize `git@host:owner/repo(.git)?` into `https://host/owner/repo`.
/// Any other form passes through unchanged.
pub fn normalize_git_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("git@") else {
        return url.to_string();
    };
    let Some((host, path)) = rest.split_once(':') else {
        return url.to_string();
    };
    format!("https://{host}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ssh_style_git_url() {
        assert_eq!(
            normalize_git_url("git@github.com:u/r.git"),
            "https://github.com/u/r.git"
        );
    }

    #[test]
    fn leaves_https_url_untouched() {
        assert_eq!(normalize_git_url("https://github.com/u/r.git"), "https://github.com/u/r.git");
    }

    #[test]
    fn install_step_exposes_name_and_command() {
        let bare = InstallStep::Command("bundle install".to_string());
        assert_eq!(bare.command(), "bundle install");
        assert_eq!(bare.name(), "bundle install");

        let named = InstallStep::Named { name: "deps".to_string(), command: "bundle install".to_string() };
        assert_eq!(named.command(), "bundle install");
        assert_eq!(named.name(), "deps");
    }
}
