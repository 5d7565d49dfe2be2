//! Shell command construction for launching the coding assistant (§4.4).

use kml_core::util::shell_escape;

/// The shell prefix that puts the in-sandbox language-toolchain shims on
/// `PATH` before running a command (glossary: "Mise PATH export").
pub const MISE_PATH_EXPORT: &str =
    r#"export PATH="$HOME/.local/share/mise/shims:$HOME/.local/bin:$PATH""#;

/// Whether to start a fresh conversation or resume an existing one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionFlag {
    New(String),
    Resume(String),
}

impl SessionFlag {
    fn as_cli_flag(&self) -> String {
        match self {
            SessionFlag::New(uuid) => format!("--session-id {uuid}"),
            SessionFlag::Resume(uuid) => format!("--resume {uuid}"),
        }
    }
}

/// Build the shell command run inside the sandbox's PTY: exports the mise
/// shims onto `PATH`, sets the Anthropic auth env vars, then invokes the
/// assistant in streaming-JSON, non-interactive, permission-skipping mode
/// with the given prompt and session flag (§4.4).
pub fn build_command(
    anthropic_token: &str,
    anthropic_base_url: Option<&str>,
    session_flag: &SessionFlag,
    prompt: &str,
) -> String {
    let mut exports = format!(
        "{MISE_PATH_EXPORT} && export ANTHROPIC_AUTH_TOKEN={}",
        shell_escape(anthropic_token)
    );
    if let Some(base_url) = anthropic_base_url {
        exports.push_str(&format!(" && export ANTHROPIC_BASE_URL={}", shell_escape(base_url)));
    }

    format!(
        "{exports} && claude {flag} --dangerously-skip-permissions -p --verbose \
         --output-format=stream-json --include-partial-messages {prompt}",
        flag = session_flag.as_cli_flag(),
        prompt = shell_escape(prompt),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_uses_session_id_flag() {
        let cmd = build_command("tok", None, &SessionFlag::New("abc-123".into()), "hello");
        assert!(cmd.contains("--session-id abc-123"));
        assert!(!cmd.contains("--resume"));
    }

    #[test]
    fn resume_uses_resume_flag() {
        let cmd = build_command("tok", None, &SessionFlag::Resume("abc-123".into()), "hello");
        assert!(cmd.contains("--resume abc-123"));
        assert!(!cmd.contains("--session-id"));
    }

    #[test]
    fn includes_base_url_when_set() {
        let cmd = build_command(
            "tok",
            Some("https://proxy.example"),
            &SessionFlag::New("u".into()),
            "hello",
        );
        assert!(cmd.contains("ANTHROPIC_BASE_URL='https://proxy.example'"));
    }

    #[test]
    fn omits_base_url_when_unset() {
        let cmd = build_command("tok", None, &SessionFlag::New("u".into()), "hello");
        assert!(!cmd.contains("ANTHROPIC_BASE_URL"));
    }

    #[test]
    fn escapes_prompt_with_special_characters() {
        let cmd = build_command("tok", None, &SessionFlag::New("u".into()), "it's a 'test'");
        assert!(cmd.contains(r#"'it'"'"'s a '"'"'test'"'"''"#));
    }

    #[test]
    fn exports_mise_shims_onto_path_before_claude() {
        let cmd = build_command("tok", None, &SessionFlag::New("u".into()), "hello");
        assert!(cmd.contains(MISE_PATH_EXPORT));
        assert!(cmd.find(MISE_PATH_EXPORT).unwrap() < cmd.find("claude").unwrap());
    }

    #[test]
    fn includes_partial_messages_flag() {
        let cmd = build_command("tok", None, &SessionFlag::New("u".into()), "hello");
        assert!(cmd.contains("--include-partial-messages"));
    }
}
