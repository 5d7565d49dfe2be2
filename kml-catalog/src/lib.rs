//! Durable, file-backed session catalog (C3).
//!
//! Backing store: a single JSON document `{"sessions": {slug: record}}` at
//! a fixed relative path, pretty-printed. The catalog assumes one
//! orchestrator process at a time per working directory; concurrent writers
//! are undefined (§5) and there is no file locking.

pub mod record;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kml_core::error::{KmlError, Result};
use kml_core::util::{generate_token, iso8601_now};
pub use record::{Conversation, SessionRecord, SessionWithSlug, excerpt};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default catalog path, relative to the orchestrator's working directory.
pub const DEFAULT_CATALOG_RELATIVE_PATH: &str = ".kml/sessions.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

#[derive(Clone, Debug)]
pub struct SessionCatalog {
    path: PathBuf,
}

impl SessionCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A catalog rooted at `cwd`'s `.kml/sessions.json`.
    pub fn at_cwd(cwd: impl AsRef<Path>) -> Self {
        Self::new(cwd.as_ref().join(DEFAULT_CATALOG_RELATIVE_PATH))
    }

    /// Read the catalog document. Malformed JSON (or a missing file) reads
    /// as an empty map rather than an error — the catalog is
    /// corruption-tolerant by design (§8, scenario 6).
    fn load(&self) -> CatalogDocument {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %self.path.display(), %err, "catalog file is not valid JSON, treating as empty");
                CatalogDocument::default()
            }),
            Err(_) => CatalogDocument::default(),
        }
    }

    /// Write the full document atomically: write to a temp file in the
    /// same directory, then rename over the target.
    fn save(&self, doc: &CatalogDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pretty = serde_json::to_string_pretty(doc)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, pretty)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Create a new session record with a fresh `access_token` and
    /// `created_at`. Fails with [`KmlError::Duplicate`] if `slug` exists.
    pub fn create(&self, slug: &str) -> Result<SessionRecord> {
        let mut doc = self.load();
        if doc.sessions.contains_key(slug) {
            return Err(KmlError::Duplicate(slug.to_string()));
        }
        let record = SessionRecord::new(generate_token(), iso8601_now());
        doc.sessions.insert(slug.to_string(), record.clone());
        self.save(&doc)?;
        Ok(record)
    }

    pub fn find(&self, slug: &str) -> Option<SessionWithSlug> {
        let doc = self.load();
        doc.sessions.get(slug).cloned().map(|record| SessionWithSlug {
            slug: slug.to_string(),
            record,
        })
    }

    /// Merge `partial` into the existing record. No-op if `slug` is absent.
    pub fn update(&self, slug: &str, partial: &serde_json::Value) -> Result<()> {
        let mut doc = self.load();
        if let Some(record) = doc.sessions.get_mut(slug) {
            record.merge(partial);
            self.save(&doc)?;
        }
        Ok(())
    }

    pub fn delete(&self, slug: &str) -> Result<()> {
        let mut doc = self.load();
        doc.sessions.remove(slug);
        self.save(&doc)
    }

    /// Append a new conversation entry. No-op if `slug` is absent.
    pub fn add_conversation(&self, slug: &str, uuid: &str, prompt: &str) -> Result<()> {
        let mut doc = self.load();
        if let Some(record) = doc.sessions.get_mut(slug) {
            record.conversations.push(Conversation {
                uuid: uuid.to_string(),
                created_at: iso8601_now(),
                last_prompt_excerpt: excerpt(prompt),
            });
            self.save(&doc)?;
        }
        Ok(())
    }

    /// Update the `last_prompt_excerpt` of an existing conversation entry.
    /// No-op if `slug` or `uuid` is absent.
    pub fn update_conversation(&self, slug: &str, uuid: &str, prompt: &str) -> Result<()> {
        let mut doc = self.load();
        if let Some(record) = doc.sessions.get_mut(slug) {
            if let Some(conversation) = record.conversations.iter_mut().find(|c| c.uuid == uuid) {
                conversation.last_prompt_excerpt = excerpt(prompt);
                self.save(&doc)?;
            }
        }
        Ok(())
    }

    pub fn all(&self) -> BTreeMap<String, SessionRecord> {
        self.load().sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn catalog() -> (tempfile::TempDir, SessionCatalog) {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::at_cwd(dir.path());
        (dir, catalog)
    }

    #[test]
    fn create_generates_64_hex_access_token() {
        let (_dir, catalog) = catalog();
        let record = catalog.create("test-run").unwrap();
        assert_eq!(record.access_token.len(), 64);
        assert!(record.access_token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn create_fails_on_duplicate_slug() {
        let (_dir, catalog) = catalog();
        catalog.create("dup").unwrap();
        let result = catalog.create("dup");
        assert!(matches!(result, Err(KmlError::Duplicate(_))));
    }

    #[test]
    fn find_injects_slug() {
        let (_dir, catalog) = catalog();
        catalog.create("s").unwrap();
        let found = catalog.find("s").unwrap();
        assert_eq!(found.slug, "s");
    }

    #[test]
    fn find_returns_none_for_missing_slug() {
        let (_dir, catalog) = catalog();
        assert!(catalog.find("missing").is_none());
    }

    #[test]
    fn update_merges_without_dropping_other_fields() {
        let (_dir, catalog) = catalog();
        catalog.create("s").unwrap();
        catalog
            .update("s", &serde_json::json!({ "sandbox_id": "sbx-1" }))
            .unwrap();
        let found = catalog.find("s").unwrap();
        assert_eq!(found.record.sandbox_id.as_deref(), Some("sbx-1"));
        assert_eq!(found.record.access_token.len(), 64);
    }

    #[test]
    fn update_is_noop_for_missing_slug() {
        let (_dir, catalog) = catalog();
        catalog.update("missing", &serde_json::json!({ "sandbox_id": "x" })).unwrap();
        assert!(catalog.find("missing").is_none());
    }

    #[test]
    fn delete_removes_record() {
        let (_dir, catalog) = catalog();
        catalog.create("s").unwrap();
        catalog.delete("s").unwrap();
        assert!(catalog.find("s").is_none());
    }

    #[test]
    fn conversations_are_append_only() {
        let (_dir, catalog) = catalog();
        catalog.create("s").unwrap();
        catalog.add_conversation("s", "u1", "hello world").unwrap();
        catalog.add_conversation("s", "u2", "second prompt").unwrap();
        let found = catalog.find("s").unwrap();
        assert_eq!(found.record.conversations.len(), 2);
        assert_eq!(found.record.conversations[0].uuid, "u1");
    }

    #[test]
    fn update_conversation_mutates_excerpt_only() {
        let (_dir, catalog) = catalog();
        catalog.create("s").unwrap();
        catalog.add_conversation("s", "u1", "hello").unwrap();
        catalog.update_conversation("s", "u1", "more context now").unwrap();
        let found = catalog.find("s").unwrap();
        assert_eq!(found.record.conversations[0].last_prompt_excerpt, "more context now");
        assert_eq!(found.record.conversations[0].uuid, "u1");
    }

    #[test]
    fn corrupted_catalog_reads_as_empty_and_create_recovers() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".kml")).unwrap();
        std::fs::write(dir.path().join(".kml/sessions.json"), b"not json at all").unwrap();
        let catalog = SessionCatalog::at_cwd(dir.path());

        assert!(catalog.all().is_empty());
        catalog.create("x").unwrap();

        let raw = std::fs::read_to_string(dir.path().join(".kml/sessions.json")).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(reparsed["sessions"]["x"].is_object());
    }

    #[test]
    fn unrecognized_fields_round_trip() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".kml")).unwrap();
        std::fs::write(
            dir.path().join(".kml/sessions.json"),
            serde_json::to_string_pretty(&serde_json::json!({
                "sessions": {
                    "s": {
                        "access_token": "a".repeat(64),
                        "created_at": "2026-01-01T00:00:00Z",
                        "future_field": "unknown-to-this-build",
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();
        let catalog = SessionCatalog::at_cwd(dir.path());

        catalog.update("s", &serde_json::json!({ "sandbox_id": "sbx-1" })).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(".kml/sessions.json")).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(reparsed["sessions"]["s"]["future_field"], "unknown-to-this-build");
        assert_eq!(reparsed["sessions"]["s"]["sandbox_id"], "sbx-1");
    }
}
