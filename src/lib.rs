// doc-lifecycle - per-document lifecycle state machine with
// resource-consistency self-healing.
//
// Three ingestion lineages (document upload, bookmark, saved chat) share a
// converging pipeline of derived artifacts (markdown, chunks, qa pairs,
// embeddings). This crate tracks where each document is on that pipeline,
// runs externally supplied side-effect callbacks around each transition, and
// repairs drift between recorded state and recorded resource claims.

pub mod config;
pub mod lifecycle;
pub mod store;

// Re-export key types for easy access
pub use config::LifecycleConfig;
pub use lifecycle::{
    can_transition, next_of, previous_of, resolve_sequence, sequences_containing, CallbackError,
    CallbackKind, CallbackRegistry, CallbackRegistryBuilder, DocumentLifecycleMachine,
    DocumentState, Lineage, LifecycleError, ResourceKind, ResourceLedger, Sequence, SubState,
};
pub use store::{
    DocumentRecord, HistoryEntry, InMemoryMetadataStore, MetadataStore, RecordPatch,
    ResourceEntry, StoreError,
};
