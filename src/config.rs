use serde::{Deserialize, Serialize};

/// Tunables for the lifecycle machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on consecutive repair rollbacks per consistency check.
    /// One pass per lifecycle stage is enough to walk any drift back to a
    /// consistent state.
    pub max_repair_passes: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_repair_passes: 8,
        }
    }
}
