//! Metadata store contract: the async read/write interface the lifecycle
//! core drives, plus the record types it persists. Storage engines implement
//! [`MetadataStore`]; the core never assumes anything beyond this contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::lifecycle::state::{DocumentState, ResourceKind, SubState};

pub mod memory;

pub use memory::InMemoryMetadataStore;

/// Errors surfaced by metadata store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found for user {user_id}, document {document_id}")]
    NotFound {
        user_id: String,
        document_id: String,
    },

    #[error("record already exists for user {user_id}, document {document_id}")]
    AlreadyExists {
        user_id: String,
        document_id: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {reason}")]
    Backend { reason: String },
}

/// One entry of the per-document transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: DocumentState,
    pub sub_state: SubState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(state: DocumentState, sub_state: SubState, details: Option<Value>) -> Self {
        Self {
            state,
            sub_state,
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Creation claim for one derived artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl ResourceEntry {
    pub fn new(metadata: Value) -> Self {
        Self {
            created_at: Utc::now(),
            metadata,
        }
    }
}

/// The persisted lifecycle record for one `(user_id, document_id)` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub user_id: String,
    pub document_id: String,
    pub state: DocumentState,
    pub sub_state: SubState,
    #[serde(default)]
    pub state_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceKind, ResourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Fresh record in `init` with empty history and no resources.
    pub fn new(user_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
            state: DocumentState::Init,
            sub_state: SubState::None,
            state_history: Vec::new(),
            resources: BTreeMap::new(),
            state_details: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by [`MetadataStore::update`].
///
/// Nested maps merge rather than overwrite: `resources` upserts are applied
/// per key (preserving an existing entry's `created_at` and deep-merging
/// object metadata), and `state_details` deep-merges object payloads.
/// `Value::Null` in `state_details` clears it. `state_history` replaces the
/// stored history wholesale so callers control append/rewrite/pop.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub state: Option<DocumentState>,
    pub sub_state: Option<SubState>,
    pub state_details: Option<Value>,
    pub state_history: Option<Vec<HistoryEntry>>,
    pub upsert_resources: BTreeMap<ResourceKind, ResourceEntry>,
    pub remove_resources: Vec<ResourceKind>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: DocumentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_sub_state(mut self, sub_state: SubState) -> Self {
        self.sub_state = Some(sub_state);
        self
    }

    /// `Value::Null` clears the stored details.
    pub fn with_state_details(mut self, details: Value) -> Self {
        self.state_details = Some(details);
        self
    }

    pub fn with_state_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.state_history = Some(history);
        self
    }

    pub fn upsert_resource(mut self, kind: ResourceKind, entry: ResourceEntry) -> Self {
        self.upsert_resources.insert(kind, entry);
        self
    }

    pub fn remove_resource(mut self, kind: ResourceKind) -> Self {
        self.remove_resources.push(kind);
        self
    }
}

/// Async contract for the external metadata store.
///
/// Implementations own durability and concurrency control; the lifecycle
/// core only requires last-writer-wins semantics and the merge behavior
/// documented on [`RecordPatch`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch the record, or `None` when the entity has never been created.
    async fn get(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, StoreError>;

    /// Create the record; fails with [`StoreError::AlreadyExists`] when the
    /// identity key is taken.
    async fn create(
        &self,
        user_id: &str,
        document_id: &str,
        initial: DocumentRecord,
    ) -> Result<DocumentRecord, StoreError>;

    /// Apply a partial update and return the merged record. Fails with
    /// [`StoreError::NotFound`] when the record does not exist.
    async fn update(
        &self,
        user_id: &str,
        document_id: &str,
        patch: RecordPatch,
    ) -> Result<DocumentRecord, StoreError>;
}

/// Deep-merge `incoming` into `target`: object keys merge recursively,
/// everything else is replaced by `incoming`.
pub fn deep_merge_json(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(new)) => {
            for (key, value) in new {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge_json(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_recurses_into_objects() {
        let mut target = json!({"a": {"x": 1, "y": 2}, "b": 3});
        deep_merge_json(&mut target, json!({"a": {"y": 20, "z": 30}, "c": 4}));
        assert_eq!(target, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3, "c": 4}));
    }

    #[test]
    fn deep_merge_replaces_scalars_and_arrays() {
        let mut target = json!({"list": [1, 2], "n": 1});
        deep_merge_json(&mut target, json!({"list": [3], "n": 2}));
        assert_eq!(target, json!({"list": [3], "n": 2}));
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = DocumentRecord::new("u1", "d1");
        record.state = DocumentState::Chunked;
        record.sub_state = SubState::Completed;
        record
            .state_history
            .push(HistoryEntry::new(DocumentState::Uploaded, SubState::None, None));
        record.resources.insert(
            ResourceKind::Chunks,
            ResourceEntry::new(json!({"count": 12})),
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: DocumentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, DocumentState::Chunked);
        assert_eq!(back.state_history.len(), 1);
        assert!(back.resources.contains_key(&ResourceKind::Chunks));
    }
}
