//! In-process metadata store: the reference implementation of the
//! [`MetadataStore`] contract, backed by a tokio-guarded map. Used by the
//! test suite and by embedders that do not need durability.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{deep_merge_json, DocumentRecord, MetadataStore, RecordPatch, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<(String, String), DocumentRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, document_id: &str) -> (String, String) {
        (user_id.to_string(), document_id.to_string())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&Self::key(user_id, document_id)).cloned())
    }

    async fn create(
        &self,
        user_id: &str,
        document_id: &str,
        initial: DocumentRecord,
    ) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.lock().await;
        let key = Self::key(user_id, document_id);
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                user_id: user_id.to_string(),
                document_id: document_id.to_string(),
            });
        }
        debug!(user_id, document_id, "created lifecycle record");
        records.insert(key, initial.clone());
        Ok(initial)
    }

    async fn update(
        &self,
        user_id: &str,
        document_id: &str,
        patch: RecordPatch,
    ) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&Self::key(user_id, document_id))
            .ok_or_else(|| StoreError::NotFound {
                user_id: user_id.to_string(),
                document_id: document_id.to_string(),
            })?;

        if let Some(state) = patch.state {
            record.state = state;
        }
        if let Some(sub_state) = patch.sub_state {
            record.sub_state = sub_state;
        }
        if let Some(details) = patch.state_details {
            if details.is_null() {
                record.state_details = None;
            } else {
                match record.state_details.as_mut() {
                    Some(existing) => deep_merge_json(existing, details),
                    None => record.state_details = Some(details),
                }
            }
        }
        if let Some(history) = patch.state_history {
            record.state_history = history;
        }
        for (kind, entry) in patch.upsert_resources {
            match record.resources.get_mut(&kind) {
                Some(existing) => {
                    // Re-adding a claim keeps the original creation stamp.
                    deep_merge_json(&mut existing.metadata, entry.metadata);
                }
                None => {
                    record.resources.insert(kind, entry);
                }
            }
        }
        for kind in patch.remove_resources {
            record.resources.remove(&kind);
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }
}
