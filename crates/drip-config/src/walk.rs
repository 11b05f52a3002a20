use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Defaults for walking drips across time, from `[walk]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Width of one time bucket; every offset step moves by one unit.
    pub unit: HumanDuration,
    /// Offsets evaluated before the current one.
    pub into_past: u32,
    /// Offsets evaluated after the current one.
    pub into_future: u32,
    /// Tick interval for `drip run --watch`.
    pub interval: HumanDuration,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            unit: HumanDuration::from(std::time::Duration::from_secs(86400)),
            into_past: 0,
            into_future: 0,
            interval: HumanDuration::from(std::time::Duration::from_secs(3600)),
        }
    }
}
