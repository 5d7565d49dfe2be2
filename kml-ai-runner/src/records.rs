//! Classification of the assistant's stream-json lines into structured
//! records (§4.4.1). Ported from the message-processing helpers of a
//! gRPC-based session manager that classifies the same `claude
//! --output-format=stream-json` event stream into status lines for chat
//! delivery; `format_tool_action` and `signal_name` are carried over
//! near-verbatim.

use serde_json::Value;

/// One classified line of assistant output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputRecord {
    /// `{"type":"system","subtype":"init",...}` — turn started.
    ProcessingStarted { input_tokens: u64 },
    /// A line of assistant text.
    TextLine(String),
    /// A tool-use block, formatted as a concise status line.
    ToolAction(String),
    /// `{"type":"result",...}` with a non-error outcome.
    ResponseComplete { input_tokens: u64, output_tokens: u64 },
    /// The assistant process exited with a non-zero code once the PTY
    /// closed; `signal` is set when the code looks signal-derived
    /// (`exit_code > 128`).
    ProcessExited { exit_code: i64, signal: Option<String> },
}

/// Classify a non-zero process exit code into a [`OutputRecord::ProcessExited`].
pub fn classify_exit(exit_code: i64) -> OutputRecord {
    let signal = (exit_code > 128).then(|| signal_name(exit_code).to_string());
    OutputRecord::ProcessExited { exit_code, signal }
}

/// Classify one validated-JSON line into zero or more [`OutputRecord`]s.
/// A single `assistant` message can contain both text and tool-use
/// content blocks, hence the `Vec` return.
pub fn classify(line: &str) -> Vec<OutputRecord> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Vec::new();
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };

    match kind {
        "system" => {
            let input_tokens = value
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            vec![OutputRecord::ProcessingStarted { input_tokens }]
        }
        "assistant" => classify_assistant_message(&value),
        "result" => classify_result(&value),
        _ => Vec::new(),
    }
}

fn classify_assistant_message(value: &Value) -> Vec<OutputRecord> {
    let Some(blocks) = value.pointer("/message/content").and_then(Value::as_array) else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter_map(|block| {
            let block_type = block.get("type").and_then(Value::as_str)?;
            match block_type {
                "text" => {
                    let text = block.get("text").and_then(Value::as_str)?;
                    Some(OutputRecord::TextLine(text.to_string()))
                }
                "tool_use" => {
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("?");
                    let empty = Value::Object(Default::default());
                    let input = block.get("input").unwrap_or(&empty);
                    Some(OutputRecord::ToolAction(format_tool_action(name, input)))
                }
                _ => None,
            }
        })
        .collect()
}

fn classify_result(value: &Value) -> Vec<OutputRecord> {
    if value.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }
    let input_tokens = value
        .pointer("/usage/input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = value
        .pointer("/usage/output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    vec![OutputRecord::ResponseComplete { input_tokens, output_tokens }]
}

/// Map common fatal exit codes to human-readable signal names. Exit codes
/// above 128 typically indicate the process was killed by a signal, where
/// the signal number is `exit_code - 128`.
pub fn signal_name(code: i64) -> &'static str {
    match code {
        134 => "SIGABRT",
        137 => "SIGKILL (possibly OOM)",
        139 => "SIGSEGV (segmentation fault)",
        143 => "SIGTERM",
        _ => "unknown signal",
    }
}

/// Format a `tool_use` block as a concise status line.
fn format_tool_action(name: &str, input: &Value) -> String {
    match name {
        "Read" => format!("**Read** `{}`", str_field(input, "file_path")),
        "Write" => format!("**Write** `{}`", str_field(input, "file_path")),
        "Edit" => format!("**Edit** `{}`", str_field(input, "file_path")),
        "Bash" => {
            let cmd = str_field(input, "command");
            let (short, suffix) = if cmd.len() > 80 { (&cmd[..77], "...") } else { (cmd.as_str(), "") };
            format!("**Bash** `{short}{suffix}`")
        }
        "Glob" => format!("**Glob** `{}`", str_field(input, "pattern")),
        "Grep" => format!("**Grep** `{}`", str_field(input, "pattern")),
        "WebFetch" => format!("**WebFetch** `{}`", str_field(input, "url")),
        "WebSearch" => format!("**WebSearch** `{}`", str_field(input, "query")),
        "Task" => format!("**Task** _{}_", str_field(input, "description")),
        "NotebookEdit" => format!("**NotebookEdit** `{}`", str_field(input, "notebook_path")),
        "AskUserQuestion" => "**AskUserQuestion**".to_string(),
        _ if name.starts_with("mcp__") => {
            let short = name.rsplit("__").next().unwrap_or(name);
            format!("**MCP** _{short}_")
        }
        _ => format!("**{name}**"),
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> std::borrow::Cow<'a, str> {
    input.get(key).and_then(Value::as_str).map_or("?".into(), Into::into)
}
