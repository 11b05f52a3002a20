pub mod dedupe;
pub mod error;
pub mod evaluate;
pub mod message;
pub mod predicate;
pub mod registry;
pub mod rule;
pub mod schema;
pub mod send;
pub mod store;
pub mod walk;

pub use dedupe::{Deduplicator, dedupe};
pub use error::{CoreError, CoreReason, CoreResult};
pub use evaluate::{evaluate, evaluate_walk};
pub use registry::Registry;
pub use rule::{CompiledRule, RepeatPolicy, RuleDefinition};
pub use store::{MatchSet, SubjectId, SubjectStore};
pub use walk::{ShiftedRule, TimeBucket, Walker, walk};
