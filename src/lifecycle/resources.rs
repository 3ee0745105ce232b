//! Resource ledger: the per-entity claim registry for derived artifacts.
//!
//! The ledger records that a callback *declared* an artifact created; it
//! never verifies physical existence. Claims live in the metadata record's
//! `resources` map and are read through the store on every query.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::state::ResourceKind;
use crate::store::{MetadataStore, RecordPatch, ResourceEntry, StoreError};

pub struct ResourceLedger {
    user_id: String,
    document_id: String,
    store: Arc<dyn MetadataStore>,
}

impl std::fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLedger")
            .field("user_id", &self.user_id)
            .field("document_id", &self.document_id)
            .finish()
    }
}

impl ResourceLedger {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        user_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
            store,
        }
    }

    /// Upsert a creation claim. The creation stamp of an existing claim is
    /// preserved; metadata objects merge per key.
    pub async fn add(&self, kind: ResourceKind, metadata: Value) -> Result<(), StoreError> {
        let patch = RecordPatch::new().upsert_resource(kind, ResourceEntry::new(metadata));
        self.store
            .update(&self.user_id, &self.document_id, patch)
            .await?;
        debug!(
            user_id = %self.user_id,
            document_id = %self.document_id,
            resource = %kind,
            "recorded resource claim"
        );
        Ok(())
    }

    /// Drop a claim. Succeeds as a no-op when the claim is absent.
    pub async fn remove(&self, kind: ResourceKind) -> Result<(), StoreError> {
        let patch = RecordPatch::new().remove_resource(kind);
        self.store
            .update(&self.user_id, &self.document_id, patch)
            .await?;
        debug!(
            user_id = %self.user_id,
            document_id = %self.document_id,
            resource = %kind,
            "removed resource claim"
        );
        Ok(())
    }

    pub async fn has(&self, kind: ResourceKind) -> Result<bool, StoreError> {
        Ok(self.get(kind).await?.is_some())
    }

    pub async fn get(&self, kind: ResourceKind) -> Result<Option<ResourceEntry>, StoreError> {
        let record = self.store.get(&self.user_id, &self.document_id).await?;
        Ok(record.and_then(|r| r.resources.get(&kind).cloned()))
    }
}
