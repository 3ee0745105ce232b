//! Per-document lifecycle state machine.
//!
//! Composes the sequence registry, resource ledger and callback registry
//! into validated transitions with sub-state progress tracking, rollback and
//! state/resource consistency repair. One machine instance is bound to one
//! `(user_id, document_id)` entity; the caller serializes operations per
//! entity. Every public operation reads the record through the store at
//! entry, so out-of-band edits are always visible.

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::callbacks::{CallbackKind, CallbackRegistry};
use super::resources::ResourceLedger;
use super::sequence;
use super::state::{DocumentState, ResourceKind, SubState};
use crate::config::LifecycleConfig;
use crate::store::{DocumentRecord, HistoryEntry, MetadataStore, RecordPatch, StoreError};

/// Failures that abort a lifecycle operation outright. Callback failures are
/// not errors; they map to `Ok(false)` or a logged continuation depending on
/// the transition phase.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),
}

/// Rollback re-entry cleanups: arriving back at `to` from `from` drops the
/// claim for the artifact derived after `to`.
const REENTRY_CLEANUPS: &[(DocumentState, DocumentState, ResourceKind)] = &[
    (
        DocumentState::Chunked,
        DocumentState::Markdowned,
        ResourceKind::Chunks,
    ),
    (
        DocumentState::Embedded,
        DocumentState::Chunked,
        ResourceKind::Embeddings,
    ),
    (
        DocumentState::Embedded,
        DocumentState::QaExtracted,
        ResourceKind::Embeddings,
    ),
];

/// Which resource claim a state implies once reached.
fn required_resource(state: DocumentState) -> Option<ResourceKind> {
    match state {
        DocumentState::Markdowned => Some(ResourceKind::Markdown),
        DocumentState::Chunked => Some(ResourceKind::Chunks),
        DocumentState::Embedded => Some(ResourceKind::Embeddings),
        _ => None,
    }
}

pub struct DocumentLifecycleMachine {
    user_id: String,
    document_id: String,
    store: Arc<dyn MetadataStore>,
    callbacks: Arc<CallbackRegistry>,
    config: LifecycleConfig,
    current_state: DocumentState,
    sub_state: SubState,
    /// Lineage hint supplied at activation, used until the history can
    /// answer which lineage the entity travels.
    activation_hint: Option<DocumentState>,
    /// Effective hint as of the last record read.
    lineage_hint: Option<DocumentState>,
}

impl std::fmt::Debug for DocumentLifecycleMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLifecycleMachine")
            .field("user_id", &self.user_id)
            .field("document_id", &self.document_id)
            .field("current_state", &self.current_state)
            .field("sub_state", &self.sub_state)
            .field("lineage_hint", &self.lineage_hint)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl DocumentLifecycleMachine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        callbacks: Arc<CallbackRegistry>,
        user_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
            store,
            callbacks,
            config: LifecycleConfig::default(),
            current_state: DocumentState::Init,
            sub_state: SubState::None,
            activation_hint: None,
            lineage_hint: None,
        }
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Resource ledger bound to the same entity and store.
    pub fn ledger(&self) -> ResourceLedger {
        ResourceLedger::new(self.store.clone(), &self.user_id, &self.document_id)
    }

    /// Load (or create in `init`) the record and bind its state. The hint
    /// declares the intended lineage for an entity still in `init`, e.g.
    /// `Some(DocumentState::Bookmarked)` before the first bookmark
    /// transition.
    pub async fn activate(
        &mut self,
        lineage_hint: Option<DocumentState>,
    ) -> Result<(), LifecycleError> {
        self.activation_hint = lineage_hint;
        let record = self.load_or_create().await?;
        self.bind(&record);
        info!(
            user_id = %self.user_id,
            document_id = %self.document_id,
            state = %record.state,
            sub_state = %record.sub_state,
            hint = ?lineage_hint,
            "activated lifecycle machine"
        );
        Ok(())
    }

    async fn load_or_create(&self) -> Result<DocumentRecord, LifecycleError> {
        if let Some(record) = self.store.get(&self.user_id, &self.document_id).await? {
            return Ok(record);
        }
        let record = self
            .store
            .create(
                &self.user_id,
                &self.document_id,
                DocumentRecord::new(&self.user_id, &self.document_id),
            )
            .await?;
        Ok(record)
    }

    /// Previously visited primary state, from the history tail when there is
    /// one, `init` for an entity one step in, otherwise the activation hint.
    fn previous_visited(&self, record: &DocumentRecord) -> Option<DocumentState> {
        self.hint_from_history(&record.state_history)
    }

    fn hint_from_history(&self, history: &[HistoryEntry]) -> Option<DocumentState> {
        match history.len() {
            0 => self.activation_hint,
            1 => Some(DocumentState::Init),
            n => history.get(n - 2).map(|e| e.state),
        }
    }

    fn bind(&mut self, record: &DocumentRecord) {
        self.current_state = record.state;
        self.sub_state = record.sub_state;
        self.lineage_hint = self.previous_visited(record);
    }

    /// Validated transition to `target`.
    ///
    /// Returns `Ok(false)` without mutation when the transition is illegal
    /// (unless `force`) or a before-guard vetoes it. A forward callback
    /// failure after the write is logged and does not revert the committed
    /// state. `target == current` is always accepted: it refines the
    /// sub-state of the current stage in place.
    pub async fn set_state(
        &mut self,
        target: DocumentState,
        sub_state: SubState,
        details: Option<Value>,
        force: bool,
    ) -> Result<bool, LifecycleError> {
        let record = self.load_or_create().await?;
        self.bind(&record);
        let current = record.state;
        let hint = self.lineage_hint;

        if !force
            && target != current
            && !sequence::can_transition(current, target, hint)
        {
            warn!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                from = %current,
                to = %target,
                hint = ?hint,
                "rejected illegal transition"
            );
            return Ok(false);
        }

        if let Err(e) = self
            .callbacks
            .run(
                CallbackKind::Before,
                current,
                target,
                &self.user_id,
                &self.document_id,
            )
            .await
        {
            warn!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                from = %current,
                to = %target,
                reason = %e.reason,
                "before-transition callback vetoed transition"
            );
            return Ok(false);
        }

        let mut history = record.state_history;
        let entry = HistoryEntry::new(target, sub_state, details.clone());
        if target == current && history.last().map(|e| e.state) == Some(current) {
            // Sub-state refinement rewrites the arrival entry in place.
            if let Some(last) = history.last_mut() {
                *last = entry;
            }
        } else {
            history.push(entry);
        }

        let patch = RecordPatch::new()
            .with_state(target)
            .with_sub_state(sub_state)
            .with_state_details(details.unwrap_or(Value::Null))
            .with_state_history(history);
        self.store
            .update(&self.user_id, &self.document_id, patch)
            .await?;

        self.current_state = target;
        self.sub_state = sub_state;
        if target != current {
            self.lineage_hint = Some(current);
        }
        info!(
            user_id = %self.user_id,
            document_id = %self.document_id,
            from = %current,
            to = %target,
            sub_state = %sub_state,
            forced = force,
            "lifecycle state transition"
        );

        self.run_reentry_cleanup(current, target).await?;

        if let Err(e) = self
            .callbacks
            .run(
                CallbackKind::After,
                current,
                target,
                &self.user_id,
                &self.document_id,
            )
            .await
        {
            // The state write is already committed; the worker is expected
            // to surface its own failure via fail_processing.
            error!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                from = %current,
                to = %target,
                reason = %e.reason,
                "forward callback failed after committed transition"
            );
        }

        Ok(true)
    }

    /// Enter `target` with the `processing` progress marker.
    pub async fn start_processing(
        &mut self,
        target: DocumentState,
    ) -> Result<bool, LifecycleError> {
        self.set_state(target, SubState::Processing, None, false).await
    }

    /// Mark `state` as fully processed.
    pub async fn complete_processing(
        &mut self,
        state: DocumentState,
    ) -> Result<bool, LifecycleError> {
        self.set_state(state, SubState::Completed, None, false).await
    }

    /// Mark `state` as failed, attaching the error text to the record.
    pub async fn fail_processing(
        &mut self,
        state: DocumentState,
        error: impl Into<String>,
    ) -> Result<bool, LifecycleError> {
        let details = json!({ "error": error.into() });
        self.set_state(state, SubState::Failed, Some(details), false)
            .await
    }

    /// Undo the most recent progress.
    ///
    /// With sub-state `processing` or `failed` this only restores the
    /// `completed` marker of the current stage; the entity never left its
    /// last committed primary state, so the history is untouched and no
    /// rollback callback runs. Otherwise the last history entry is popped
    /// after the matching rollback callback succeeds; a callback failure
    /// aborts with `Ok(false)` and leaves everything intact.
    pub async fn rollback(&mut self) -> Result<bool, LifecycleError> {
        let record = self.load_or_create().await?;
        self.bind(&record);

        if matches!(record.sub_state, SubState::Processing | SubState::Failed) {
            return self
                .set_state(record.state, SubState::Completed, None, false)
                .await;
        }

        if record.state_history.len() <= 1 {
            warn!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                state = %record.state,
                "nothing to roll back to"
            );
            return Ok(false);
        }

        let current = record.state;
        let mut history = record.state_history;
        let prior = history[history.len() - 2].clone();

        if let Err(e) = self
            .callbacks
            .run(
                CallbackKind::BeforeRollback,
                current,
                prior.state,
                &self.user_id,
                &self.document_id,
            )
            .await
        {
            warn!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                from = %current,
                to = %prior.state,
                reason = %e.reason,
                "rollback callback failed, aborting rollback"
            );
            return Ok(false);
        }

        history.pop();
        // The popped tail, not the state rolled back from, decides the
        // lineage the accessors answer with.
        let hint = self.hint_from_history(&history);
        let patch = RecordPatch::new()
            .with_state(prior.state)
            .with_sub_state(prior.sub_state)
            .with_state_history(history);
        self.store
            .update(&self.user_id, &self.document_id, patch)
            .await?;

        self.current_state = prior.state;
        self.sub_state = prior.sub_state;
        self.lineage_hint = hint;
        info!(
            user_id = %self.user_id,
            document_id = %self.document_id,
            from = %current,
            to = %prior.state,
            sub_state = %prior.sub_state,
            "rolled back lifecycle state"
        );

        self.run_reentry_cleanup(current, prior.state).await?;

        Ok(true)
    }

    async fn run_reentry_cleanup(
        &self,
        from: DocumentState,
        to: DocumentState,
    ) -> Result<(), LifecycleError> {
        for (hook_from, hook_to, resource) in REENTRY_CLEANUPS {
            if *hook_from == from && *hook_to == to {
                info!(
                    user_id = %self.user_id,
                    document_id = %self.document_id,
                    from = %from,
                    to = %to,
                    resource = %resource,
                    "re-entry cleanup dropping resource claim"
                );
                self.ledger().remove(*resource).await?;
            }
        }
        Ok(())
    }

    /// Current primary state, read through the store.
    pub async fn current_state(&mut self) -> Result<DocumentState, LifecycleError> {
        let record = self.load_or_create().await?;
        self.bind(&record);
        Ok(record.state)
    }

    /// Full current record, read through the store.
    pub async fn current_state_info(&mut self) -> Result<DocumentRecord, LifecycleError> {
        let record = self.load_or_create().await?;
        self.bind(&record);
        Ok(record)
    }

    /// Detect and repair drift between recorded state and recorded resource
    /// claims: a state whose implied resource claim is missing is rolled
    /// back, repeatedly until consistent or the pass bound is hit. Returns
    /// `true` iff at least one repair was attempted, even when the repairing
    /// rollback itself failed (the violation is then left for the next
    /// read).
    pub async fn ensure_state_resource_consistency(&mut self) -> Result<bool, LifecycleError> {
        let mut repaired = false;
        for _ in 0..self.config.max_repair_passes {
            let record = self.load_or_create().await?;
            self.bind(&record);

            let Some(resource) = required_resource(record.state) else {
                break;
            };
            if record.resources.contains_key(&resource) {
                break;
            }

            warn!(
                user_id = %self.user_id,
                document_id = %self.document_id,
                state = %record.state,
                resource = %resource,
                "state/resource drift detected, repairing via rollback"
            );
            repaired = true;

            match self.rollback().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        user_id = %self.user_id,
                        document_id = %self.document_id,
                        "repair rollback was declined, leaving drift for next read"
                    );
                    break;
                }
                Err(e) => {
                    error!(
                        user_id = %self.user_id,
                        document_id = %self.document_id,
                        error = %e,
                        "repair rollback failed, leaving drift for next read"
                    );
                    break;
                }
            }
        }
        Ok(repaired)
    }

    /// Sequence-relative successor of the bound state, lineage-aware.
    pub fn next_state(&self) -> Option<DocumentState> {
        sequence::next_of(self.current_state, self.lineage_hint)
    }

    /// Sequence-relative predecessor of the bound state, lineage-aware.
    pub fn previous_state(&self) -> Option<DocumentState> {
        sequence::previous_of(self.current_state, self.lineage_hint)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMetadataStore;

    fn machine(store: Arc<InMemoryMetadataStore>) -> DocumentLifecycleMachine {
        DocumentLifecycleMachine::new(store, CallbackRegistry::empty(), "u1", "d1")
    }

    #[tokio::test]
    async fn activate_creates_record_in_init() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store.clone());
        m.activate(None).await.unwrap();

        let record = store.get("u1", "d1").await.unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Init);
        assert_eq!(record.sub_state, SubState::None);
        assert!(record.state_history.is_empty());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_mutation() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store.clone());
        m.activate(None).await.unwrap();

        assert!(!m
            .set_state(DocumentState::Embedded, SubState::None, None, false)
            .await
            .unwrap());
        let record = store.get("u1", "d1").await.unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Init);
        assert!(record.state_history.is_empty());
    }

    #[tokio::test]
    async fn force_bypasses_legality() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store.clone());
        m.activate(None).await.unwrap();

        assert!(m
            .set_state(DocumentState::Embedded, SubState::Completed, None, true)
            .await
            .unwrap());
        assert_eq!(m.current_state().await.unwrap(), DocumentState::Embedded);
    }

    #[tokio::test]
    async fn sub_state_refinement_rewrites_history_tail() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store.clone());
        m.activate(None).await.unwrap();

        assert!(m.start_processing(DocumentState::Uploaded).await.unwrap());
        assert!(m.complete_processing(DocumentState::Uploaded).await.unwrap());

        let record = store.get("u1", "d1").await.unwrap().unwrap();
        assert_eq!(record.state_history.len(), 1);
        assert_eq!(record.state_history[0].sub_state, SubState::Completed);
    }

    #[tokio::test]
    async fn read_through_sees_external_mutation() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store.clone());
        m.activate(None).await.unwrap();

        store
            .update(
                "u1",
                "d1",
                RecordPatch::new().with_state(DocumentState::Uploaded),
            )
            .await
            .unwrap();
        assert_eq!(m.current_state().await.unwrap(), DocumentState::Uploaded);
    }

    #[tokio::test]
    async fn next_and_previous_follow_bound_lineage() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut m = machine(store);
        m.activate(Some(DocumentState::SavedChat)).await.unwrap();
        assert_eq!(m.next_state(), Some(DocumentState::SavedChat));

        assert!(m
            .set_state(DocumentState::SavedChat, SubState::Completed, None, false)
            .await
            .unwrap());
        assert_eq!(m.next_state(), Some(DocumentState::QaExtracted));
        assert_eq!(m.previous_state(), Some(DocumentState::Init));
    }
}
