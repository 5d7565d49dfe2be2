use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry in a session's conversation history. `last_prompt_excerpt` is
/// the first 51 characters of the prompt that started or continued it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub uuid: String,
    pub created_at: String,
    pub last_prompt_excerpt: String,
}

pub const EXCERPT_MAX_LEN: usize = 51;

pub fn excerpt(prompt: &str) -> String {
    prompt.chars().take(EXCERPT_MAX_LEN).collect()
}

/// The durable representation of one sandbox (§3). Unrecognized fields are
/// captured in `extra` and re-serialized verbatim so a read-modify-write
/// cycle never drops data this build doesn't know about.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    #[serde(default)]
    pub sandbox_id: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub tunnel_id: Option<String>,
    #[serde(default)]
    pub tunnel_token: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    pub fn new(access_token: String, created_at: String) -> Self {
        Self {
            sandbox_id: None,
            access_token,
            tunnel_id: None,
            tunnel_token: None,
            created_at,
            conversations: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Merge a partial JSON object into this record, field by field. Keys
    /// matching a known field update it; anything else lands in `extra`.
    pub fn merge(&mut self, partial: &Value) {
        let Some(obj) = partial.as_object() else { return };
        for (key, value) in obj {
            match key.as_str() {
                "sandbox_id" => self.sandbox_id = value.as_str().map(str::to_string),
                "access_token" => {
                    if let Some(s) = value.as_str() {
                        self.access_token = s.to_string();
                    }
                }
                "tunnel_id" => self.tunnel_id = value.as_str().map(str::to_string),
                "tunnel_token" => self.tunnel_token = value.as_str().map(str::to_string),
                "created_at" => {
                    if let Some(s) = value.as_str() {
                        self.created_at = s.to_string();
                    }
                }
                "conversations" => {
                    if let Ok(conversations) = serde_json::from_value(value.clone()) {
                        self.conversations = conversations;
                    }
                }
                other => {
                    self.extra.insert(other.to_string(), value.clone());
                }
            }
        }
    }
}

/// A [`SessionRecord`] with its `slug` injected for callers that don't want
/// to track the map key separately.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionWithSlug {
    pub slug: String,
    #[serde(flatten)]
    pub record: SessionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_at_51_chars() {
        let long = "a".repeat(100);
        assert_eq!(excerpt(&long).len(), EXCERPT_MAX_LEN);
    }

    #[test]
    fn excerpt_keeps_short_strings_whole() {
        assert_eq!(excerpt("hello"), "hello");
    }

    #[test]
    fn merge_preserves_unrecognized_fields() {
        let mut record = SessionRecord::new("a".repeat(64), "2026-01-01T00:00:00Z".into());
        record.merge(&serde_json::json!({ "custom_field": "keep-me" }));
        assert_eq!(record.extra.get("custom_field").unwrap(), "keep-me");
    }

    #[test]
    fn merge_updates_known_fields_only() {
        let mut record = SessionRecord::new("a".repeat(64), "2026-01-01T00:00:00Z".into());
        record.merge(&serde_json::json!({ "sandbox_id": "sbx-1" }));
        assert_eq!(record.sandbox_id.as_deref(), Some("sbx-1"));
    }
}
