//! Callback registry: externally supplied side-effect hooks keyed by the
//! transition they attach to.
//!
//! Resolution is an explicit table over `(kind, from, to)` built once at
//! construction and immutable afterwards. A missing entry means the hook is
//! skipped, never an error. Callbacks must be idempotent under retry: a
//! forward hook runs after its state write commits, a rollback hook runs
//! before the write that removes the state.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::state::DocumentState;

/// Failure raised by a callback. The machine maps it to the asymmetric
/// handling of the transition phase it occurred in.
#[derive(Debug, Clone, Error)]
#[error("callback failed: {reason}")]
pub struct CallbackError {
    pub reason: String,
}

impl CallbackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Which phase of a transition a callback attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Guard run before the state write; a failure vetoes the transition.
    Before,
    /// Side-effect work run after the state write commits.
    After,
    /// Resource undo run before a rollback's state write.
    BeforeRollback,
}

impl CallbackKind {
    fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Before => "before",
            CallbackKind::After => "after",
            CallbackKind::BeforeRollback => "before_rollback",
        }
    }
}

pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send>>;
pub type TransitionCallback = Arc<dyn Fn(String, String) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure `(user_id, document_id)` into a registrable callback.
pub fn callback<F, Fut>(f: F) -> TransitionCallback
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |user_id, document_id| Box::pin(f(user_id, document_id)))
}

type CallbackKey = (CallbackKind, DocumentState, DocumentState);

/// Immutable table of transition callbacks, supplied once at construction.
#[derive(Default)]
pub struct CallbackRegistry {
    table: HashMap<CallbackKey, TransitionCallback>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.table.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn builder() -> CallbackRegistryBuilder {
        CallbackRegistryBuilder::default()
    }

    /// Registry with no callbacks; every hook is a no-op.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, kind: CallbackKind, from: DocumentState, to: DocumentState) -> bool {
        self.table.contains_key(&(kind, from, to))
    }

    /// Run the callback registered for `(kind, from, to)`. Missing entries
    /// are skipped and count as success.
    pub async fn run(
        &self,
        kind: CallbackKind,
        from: DocumentState,
        to: DocumentState,
        user_id: &str,
        document_id: &str,
    ) -> Result<(), CallbackError> {
        match self.table.get(&(kind, from, to)) {
            Some(cb) => {
                debug!(
                    hook = kind.as_str(),
                    from = %from,
                    to = %to,
                    user_id,
                    document_id,
                    "running transition callback"
                );
                cb(user_id.to_string(), document_id.to_string()).await
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct CallbackRegistryBuilder {
    table: HashMap<CallbackKey, TransitionCallback>,
}

impl CallbackRegistryBuilder {
    fn register<F, Fut>(
        mut self,
        kind: CallbackKind,
        from: DocumentState,
        to: DocumentState,
        f: F,
    ) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.table.insert((kind, from, to), callback(f));
        self
    }

    /// Guard run before the `from -> to` state write commits.
    pub fn before<F, Fut>(self, from: DocumentState, to: DocumentState, f: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(CallbackKind::Before, from, to, f)
    }

    /// Forward worker run after the `from -> to` state write commits.
    pub fn after<F, Fut>(self, from: DocumentState, to: DocumentState, f: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(CallbackKind::After, from, to, f)
    }

    /// Resource undo run before the rollback from `from` to `to` is written.
    pub fn before_rollback<F, Fut>(self, from: DocumentState, to: DocumentState, f: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.register(CallbackKind::BeforeRollback, from, to, f)
    }

    pub fn build(self) -> Arc<CallbackRegistry> {
        Arc::new(CallbackRegistry { table: self.table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registered_callback_runs_with_entity_key() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_cb = hits.clone();
        let registry = CallbackRegistry::builder()
            .after(
                DocumentState::Uploaded,
                DocumentState::Markdowned,
                move |user_id, document_id| {
                    let hits = hits_in_cb.clone();
                    async move {
                        assert_eq!(user_id, "u1");
                        assert_eq!(document_id, "d1");
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .build();

        registry
            .run(
                CallbackKind::After,
                DocumentState::Uploaded,
                DocumentState::Markdowned,
                "u1",
                "d1",
            )
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_callback_is_skipped() {
        let registry = CallbackRegistry::empty();
        registry
            .run(
                CallbackKind::BeforeRollback,
                DocumentState::Chunked,
                DocumentState::Markdowned,
                "u1",
                "d1",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failure_propagates() {
        let registry = CallbackRegistry::builder()
            .before_rollback(
                DocumentState::Chunked,
                DocumentState::Markdowned,
                |_, _| async { Err(CallbackError::new("undo failed")) },
            )
            .build();

        let err = registry
            .run(
                CallbackKind::BeforeRollback,
                DocumentState::Chunked,
                DocumentState::Markdowned,
                "u1",
                "d1",
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason, "undo failed");
    }

    #[test]
    fn kinds_with_same_transition_are_distinct_entries() {
        let registry = CallbackRegistry::builder()
            .after(DocumentState::Uploaded, DocumentState::Markdowned, |_, _| async { Ok(()) })
            .before_rollback(DocumentState::Markdowned, DocumentState::Uploaded, |_, _| async {
                Ok(())
            })
            .build();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(
            CallbackKind::After,
            DocumentState::Uploaded,
            DocumentState::Markdowned
        ));
        assert!(!registry.contains(
            CallbackKind::Before,
            DocumentState::Uploaded,
            DocumentState::Markdowned
        ));
    }
}
