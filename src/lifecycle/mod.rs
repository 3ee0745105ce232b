//! The lifecycle core: state definitions, sequence registry, resource
//! ledger, callback registry and the per-document state machine.

pub mod callbacks;
pub mod machine;
pub mod resources;
pub mod sequence;
pub mod state;

pub use callbacks::{CallbackError, CallbackKind, CallbackRegistry, CallbackRegistryBuilder};
pub use machine::{DocumentLifecycleMachine, LifecycleError};
pub use resources::ResourceLedger;
pub use sequence::{can_transition, next_of, previous_of, resolve_sequence, sequences_containing, Sequence};
pub use state::{DocumentState, Lineage, ResourceKind, SubState};
