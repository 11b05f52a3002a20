pub mod campaign;
pub mod drip;
pub mod logging;
pub mod runtime;
pub mod store;
pub mod types;
mod validate;
pub mod walk;

pub use campaign::{CampaignConfig, LedgerConfig, OutboxConfig};
pub use drip::{DripConfig, LiteralValue, PredicateConfig, load_drips};
pub use logging::{LogFormat, LoggingConfig};
pub use runtime::RuntimeConfig;
pub use store::StoreConfig;
pub use types::{HumanDuration, SignedDuration};
pub use walk::WalkConfig;
