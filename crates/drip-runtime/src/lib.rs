#[macro_use]
mod log_macros;

pub mod bootstrap;
pub mod campaign;
pub mod error;
pub mod signal;
pub mod tracing_init;

pub use bootstrap::bootstrap;
pub use campaign::{
    Campaign, EvalSettings, OffsetReport, RuleFailure, RuleHandle, RuleRun, RunReport,
    TimelineEntry,
};
pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
