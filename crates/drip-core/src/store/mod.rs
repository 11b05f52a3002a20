mod memory;

pub use memory::MemoryStore;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::predicate::BoundPredicate;
use crate::schema::{Schema, Value};
use crate::walk::TimeBucket;

// ---------------------------------------------------------------------------
// SubjectId
// ---------------------------------------------------------------------------

/// Stable identity of a subject, taken from the rule's subject field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity of a record value. Nulls and lists identify nobody.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::List(_) => None,
            other => Some(Self(other.to_string())),
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Subjects matched by one shifted rule. Ordered, so reports and previews
/// are deterministic.
pub type MatchSet = BTreeSet<SubjectId>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One subject-store row, keyed by flattened dotted field path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ---------------------------------------------------------------------------
// SubjectQuery
// ---------------------------------------------------------------------------

/// Everything a store needs to answer one shifted rule: the event-time
/// bucket plus every predicate, all bound to a concrete moment.
#[derive(Debug, Clone)]
pub struct SubjectQuery {
    pub rule: String,
    pub event_time_field: String,
    pub subject_field: String,
    pub bucket: TimeBucket,
    pub predicates: Vec<BoundPredicate>,
}

impl SubjectQuery {
    /// Reference semantics for stores that scan records themselves.
    pub fn matches(&self, record: &Record) -> bool {
        let in_bucket = record
            .get(&self.event_time_field)
            .and_then(Value::as_time)
            .is_some_and(|t| self.bucket.contains(t));
        in_bucket && self.predicates.iter().all(|p| p.matches(record))
    }

    pub fn subject_of(&self, record: &Record) -> Option<SubjectId> {
        record
            .get(&self.subject_field)
            .and_then(SubjectId::from_value)
    }
}

// ---------------------------------------------------------------------------
// SubjectStore
// ---------------------------------------------------------------------------

/// Source of subjects. A store may evaluate a query however it likes as
/// long as the result equals filtering every record through
/// [`SubjectQuery::matches`].
#[async_trait]
pub trait SubjectStore: Send + Sync {
    fn schema(&self) -> &Schema;

    async fn find(&self, query: &SubjectQuery) -> CoreResult<MatchSet>;

    /// First record whose `subject_field` identifies `id`, if any.
    async fn get(&self, subject_field: &str, id: &SubjectId) -> CoreResult<Option<Record>>;
}
