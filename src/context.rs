//! Run-scoped, write-once artifact store.
//!
//! The `ExecutionContext` is the only shared mutable object in a pipeline
//! run. Its write-once-per-key rule removes the need for fine-grained
//! locking: a single mutex around the map suffices, because build-time
//! validation guarantees no two concurrently running capabilities ever
//! target the same key.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;

// ── Artifact values ──────────────────────────────────────────────

/// A single artifact stored under an output key: free text or a
/// structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Artifact {
    /// Plain text (seed refs, raw diff excerpts).
    Text(String),
    /// Structured record (reviewer payloads, scan results).
    Json(serde_json::Value),
}

impl Artifact {
    /// Borrow the text content, if this is a text artifact.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Json(_) => None,
        }
    }

    /// Borrow the JSON value, if this is a structured artifact.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    /// Render for prompt interpolation: text as-is, JSON pretty-printed.
    pub fn to_prompt_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        }
    }
}

impl From<&str> for Artifact {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Artifact {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<serde_json::Value> for Artifact {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

// ── Execution context ────────────────────────────────────────────

/// Write-once key/value artifact store for one pipeline run.
///
/// Created empty at run start, written only by the task runner on
/// successful capability completion, read through [`ContextSnapshot`]s by
/// later phases and the report synthesizer, discarded at run end.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    artifacts: Mutex<HashMap<String, Artifact>>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an artifact under `key`.
    ///
    /// Fails with [`PipelineError::DuplicateArtifact`] if the key is
    /// already present; the failed attempt leaves the store unchanged.
    pub fn set(&self, key: &str, value: Artifact) -> Result<(), PipelineError> {
        let mut map = self.artifacts.lock();
        if map.contains_key(key) {
            return Err(PipelineError::DuplicateArtifact(key.to_string()));
        }
        map.insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch a clone of the artifact under `key`.
    ///
    /// Fails with [`PipelineError::MissingArtifact`] if absent.
    pub fn get(&self, key: &str) -> Result<Artifact, PipelineError> {
        self.artifacts
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::MissingArtifact(key.to_string()))
    }

    /// Whether `key` has been written.
    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.lock().contains_key(key)
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    /// Whether the context holds no artifacts.
    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    /// Immutable view of the context as of this instant.
    ///
    /// Capabilities launched in the same phase all receive the snapshot
    /// taken at phase entry, so they observe an identical view regardless
    /// of sibling completion order.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            artifacts: Arc::new(self.artifacts.lock().clone()),
        }
    }
}

// ── Context snapshot ─────────────────────────────────────────────

/// Immutable, cheaply cloneable view of the context for read-only
/// consumers.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    artifacts: Arc<HashMap<String, Artifact>>,
}

impl ContextSnapshot {
    /// Borrow the artifact under `key`.
    pub fn get(&self, key: &str) -> Result<&Artifact, PipelineError> {
        self.artifacts
            .get(key)
            .ok_or_else(|| PipelineError::MissingArtifact(key.to_string()))
    }

    /// Whether `key` is present in this view.
    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    /// Iterate over the keys present in this view.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Number of artifacts in this view.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether this view holds no artifacts.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
