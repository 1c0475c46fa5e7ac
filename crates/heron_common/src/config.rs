use serde::{Deserialize, Serialize};

/// Runtime settings consulted by table engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// When true, the process must not accept writes. Engines that buffer
    /// writes warn at startup since they will never be able to flush.
    #[serde(default)]
    pub readonly: bool,
    /// How long a reader waits for a shared structure lock on a
    /// collaborator table before giving up.
    #[serde(default = "default_lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
    /// Whether inserted blocks may carry materialized columns.
    #[serde(default)]
    pub insert_allow_materialized: bool,
}

fn default_lock_acquire_timeout_ms() -> u64 {
    120_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            readonly: false,
            lock_acquire_timeout_ms: default_lock_acquire_timeout_ms(),
            insert_allow_materialized: false,
        }
    }
}

/// Per-operation context handed into table engine entry points.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub settings: EngineSettings,
    /// Identifier of the query this operation belongs to, for log correlation.
    pub query_id: String,
}

impl EngineContext {
    pub fn with_settings(settings: EngineSettings) -> Self {
        Self {
            settings,
            query_id: String::new(),
        }
    }
}
