//! Environment-variable configuration for the CLI binary (§6, A3).
//!
//! This is the one collaborator allowed to read `std::env`; every other
//! crate receives its configuration as explicit arguments. The `.env`/YAML
//! config reader described in the original system is out of scope (§1) —
//! this binary reads the documented environment variables directly.

use kml_core::error::{KmlError, Result};

/// Everything read from the process environment to construct the
/// sandbox-provider and edge clients plus the session defaults.
pub struct EnvConfig {
    pub daytona_api_key: String,
    pub daytona_api_url: String,
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_account_id: Option<String>,
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_domain: Option<String>,
    pub anthropic_auth_token: String,
    pub anthropic_base_url: Option<String>,
    pub git_repo_url: Option<String>,
    pub github_token: Option<String>,
}

const DEFAULT_DAYTONA_API_URL: &str = "https://app.daytona.io/api";

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            daytona_api_key: require_env("DAYTONA_API_KEY")?,
            daytona_api_url: optional_env("DAYTONA_API_URL").unwrap_or_else(|| DEFAULT_DAYTONA_API_URL.to_string()),
            cloudflare_api_token: optional_env("CLOUDFLARE_API_TOKEN"),
            cloudflare_account_id: optional_env("CLOUDFLARE_ACCOUNT_ID"),
            cloudflare_zone_id: optional_env("CLOUDFLARE_ZONE_ID"),
            cloudflare_domain: optional_env("CLOUDFLARE_DOMAIN"),
            anthropic_auth_token: require_env("ANTHROPIC_AUTH_TOKEN")?,
            anthropic_base_url: optional_env("ANTHROPIC_BASE_URL"),
            git_repo_url: optional_env("GIT_REPO_URL"),
            github_token: optional_env("GITHUB_TOKEN"),
        })
    }

    /// The four Cloudflare variables are only required by commands that
    /// touch the edge (`deploy`, `destroy`, `session new/delete`); `session
    /// ps`/`logs`/`restart` don't need them.
    pub fn cloudflare(&self) -> Result<(String, String, String, String)> {
        let token = self
            .cloudflare_api_token
            .clone()
            .ok_or_else(|| missing("CLOUDFLARE_API_TOKEN"))?;
        let account_id = self
            .cloudflare_account_id
            .clone()
            .ok_or_else(|| missing("CLOUDFLARE_ACCOUNT_ID"))?;
        let zone_id = self.cloudflare_zone_id.clone().ok_or_else(|| missing("CLOUDFLARE_ZONE_ID"))?;
        let domain = self.cloudflare_domain.clone().ok_or_else(|| missing("CLOUDFLARE_DOMAIN"))?;
        Ok((token, account_id, zone_id, domain))
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| missing(name))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn missing(name: &str) -> KmlError {
    KmlError::Precondition(format!("missing required environment variable {name}"))
}

/// The service name is the basename of the current working directory
/// (§3 "Service"), matching the original system's implicit service
/// identity rather than a separately-configured name.
pub fn service_name_from_cwd() -> Result<String> {
    let cwd = std::env::current_dir()?;
    cwd.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| KmlError::Precondition("could not determine service name from current directory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "DAYTONA_API_KEY",
            "DAYTONA_API_URL",
            "CLOUDFLARE_API_TOKEN",
            "CLOUDFLARE_ACCOUNT_ID",
            "CLOUDFLARE_ZONE_ID",
            "CLOUDFLARE_DOMAIN",
            "ANTHROPIC_AUTH_TOKEN",
            "ANTHROPIC_BASE_URL",
            "GIT_REPO_URL",
            "GITHUB_TOKEN",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn from_env_fails_without_required_vars() {
        clear_env();
        assert!(EnvConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn from_env_defaults_daytona_url_when_unset() {
        clear_env();
        std::env::set_var("DAYTONA_API_KEY", "key");
        std::env::set_var("ANTHROPIC_AUTH_TOKEN", "token");

        let env = EnvConfig::from_env().unwrap();
        assert_eq!(env.daytona_api_url, DEFAULT_DAYTONA_API_URL);
        assert!(env.cloudflare_api_token.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn cloudflare_requires_all_four_vars() {
        clear_env();
        std::env::set_var("DAYTONA_API_KEY", "key");
        std::env::set_var("ANTHROPIC_AUTH_TOKEN", "token");
        std::env::set_var("CLOUDFLARE_API_TOKEN", "cf-token");

        let env = EnvConfig::from_env().unwrap();
        assert!(env.cloudflare().is_err());

        std::env::set_var("CLOUDFLARE_ACCOUNT_ID", "acct");
        std::env::set_var("CLOUDFLARE_ZONE_ID", "zone");
        std::env::set_var("CLOUDFLARE_DOMAIN", "example.com");
        let env = EnvConfig::from_env().unwrap();
        let (token, account_id, zone_id, domain) = env.cloudflare().unwrap();
        assert_eq!((token.as_str(), account_id.as_str(), zone_id.as_str(), domain.as_str()), (
            "cf-token",
            "acct",
            "zone",
            "example.com",
        ));

        clear_env();
    }
}
