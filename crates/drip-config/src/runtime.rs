use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Upper bound on concurrent subject-store queries (Semaphore permits).
    pub eval_parallelism: usize,
    /// Timeout for a single offset query against a subject store.
    pub query_timeout: HumanDuration,
    /// Glob of drip rule files, relative to the config file's directory.
    #[serde(default)]
    pub drips: Option<String>,
}
