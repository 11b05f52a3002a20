mod gate;
mod ledger;
mod outbox;

pub use gate::{SendFailure, SendGate, SendReport, SendStage, already_sent};
pub use ledger::{FileLedger, MemoryLedger};
pub use outbox::{Envelope, FileOutbox, MemoryOutbox, Outbox, idempotency_key};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::store::SubjectId;

/// Persisted fact: `subject` received the message of `rule` at `sent_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub rule: String,
    pub subject: SubjectId,
    pub sent_at: DateTime<Utc>,
}

/// Result of an atomic check-and-insert on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// A matching record already existed; nothing was written.
    AlreadyPresent,
}

/// The cross-request memory of what was sent.
///
/// `since` narrows the lookup to records at or after it; `None` means any
/// record counts. `record_sent` must check and insert as one step so that of
/// two concurrent writers for the same `(rule, subject)` exactly one sees
/// [`RecordOutcome::Inserted`]. Records sharing a timestamp are listed by
/// rule, then subject.
#[async_trait]
pub trait SendLedger: Send + Sync {
    async fn has_sent(
        &self,
        rule: &str,
        subject: &SubjectId,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<bool>;

    async fn record_sent(
        &self,
        record: &SendRecord,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<RecordOutcome>;

    /// Every record, newest first, optionally narrowed to one rule.
    async fn records(&self, rule: Option<&str>) -> CoreResult<Vec<SendRecord>>;
}
