use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use orion_error::prelude::*;

use super::{Envelope, Outbox, RecordOutcome, SendLedger, SendRecord};
use crate::error::{CoreError, CoreReason, CoreResult};
use crate::message::{MessageProducer, RenderContext};
use crate::rule::CompiledRule;
use crate::store::{MatchSet, SubjectId, SubjectStore};
use crate::walk::ShiftedRule;

// ---------------------------------------------------------------------------
// SendReport
// ---------------------------------------------------------------------------

/// Step of the per-subject send sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    LedgerCheck,
    Lookup,
    Render,
    Delivery,
    LedgerWrite,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SendStage::LedgerCheck => "ledger-check",
            SendStage::Lookup => "lookup",
            SendStage::Render => "render",
            SendStage::Delivery => "delivery",
            SendStage::LedgerWrite => "ledger-write",
        })
    }
}

#[derive(Debug)]
pub struct SendFailure {
    pub subject: SubjectId,
    pub stage: SendStage,
    pub error: CoreError,
}

/// What happened to each subject handed to [`SendGate::send`].
#[derive(Debug)]
pub struct SendReport {
    pub rule: String,
    pub offset: i64,
    pub sent: Vec<SubjectId>,
    /// Excluded by the ledger, or lost the record race to another sender.
    pub already_sent: Vec<SubjectId>,
    /// Another send for the same `(rule, subject)` was running in this process.
    pub in_flight: Vec<SubjectId>,
    pub failed: Vec<SendFailure>,
}

impl SendReport {
    fn new(rule: &str, offset: i64) -> Self {
        Self {
            rule: rule.to_string(),
            offset,
            sent: Vec::new(),
            already_sent: Vec::new(),
            in_flight: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn attempted(&self) -> usize {
        self.sent.len() + self.already_sent.len() + self.in_flight.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SendGate
// ---------------------------------------------------------------------------

enum Outcome {
    Sent,
    AlreadySent,
    InFlight,
}

type PairKey = (String, SubjectId);

/// Holds a `(rule, subject)` pair in the in-flight set until dropped.
struct Claim<'a> {
    set: &'a Mutex<HashSet<PairKey>>,
    key: PairKey,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.key);
    }
}

/// Last step of a walk: ledger exclusion, rendering, delivery and recording,
/// one subject at a time.
pub struct SendGate {
    ledger: Arc<dyn SendLedger>,
    outbox: Arc<dyn Outbox>,
    vars: Arc<HashMap<String, String>>,
    in_flight: Mutex<HashSet<PairKey>>,
}

impl fmt::Debug for SendGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self.in_flight.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("SendGate")
            .field("vars", &self.vars.len())
            .field("in_flight", &in_flight)
            .finish()
    }
}

impl SendGate {
    pub fn new(
        ledger: Arc<dyn SendLedger>,
        outbox: Arc<dyn Outbox>,
        vars: Arc<HashMap<String, String>>,
    ) -> Self {
        Self {
            ledger,
            outbox,
            vars,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn SendLedger> {
        &self.ledger
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Send `shifted`'s message to every subject in `subjects` (already
    /// deduplicated). A failure for one subject is recorded and the rest
    /// proceed.
    pub async fn send(
        &self,
        shifted: &ShiftedRule,
        subjects: &MatchSet,
        store: &dyn SubjectStore,
        producer: &dyn MessageProducer,
        now: DateTime<Utc>,
    ) -> SendReport {
        let mut report = SendReport::new(shifted.name(), shifted.offset());
        for subject in subjects {
            match self.send_one(shifted, subject, store, producer, now).await {
                Ok(Outcome::Sent) => report.sent.push(subject.clone()),
                Ok(Outcome::AlreadySent) => report.already_sent.push(subject.clone()),
                Ok(Outcome::InFlight) => report.in_flight.push(subject.clone()),
                Err(failure) => {
                    log::warn!(
                        "drip {:?} subject {} failed at {}: {}",
                        shifted.name(),
                        failure.subject,
                        failure.stage,
                        failure.error
                    );
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    fn claim(&self, rule: &str, subject: &SubjectId) -> Option<Claim<'_>> {
        let key = (rule.to_string(), subject.clone());
        let mut set = self.in_flight.lock().expect("in-flight lock poisoned");
        if !set.insert(key.clone()) {
            return None;
        }
        Some(Claim {
            set: &self.in_flight,
            key,
        })
    }

    async fn send_one(
        &self,
        shifted: &ShiftedRule,
        subject: &SubjectId,
        store: &dyn SubjectStore,
        producer: &dyn MessageProducer,
        now: DateTime<Utc>,
    ) -> Result<Outcome, SendFailure> {
        let rule = &shifted.rule().definition;
        let fail = |stage: SendStage| {
            move |error: CoreError| SendFailure {
                subject: subject.clone(),
                stage,
                error,
            }
        };

        let Some(_claim) = self.claim(&rule.name, subject) else {
            return Ok(Outcome::InFlight);
        };

        let since = rule.repeat.since(now);
        if self
            .ledger
            .has_sent(&rule.name, subject, since)
            .await
            .map_err(fail(SendStage::LedgerCheck))?
        {
            return Ok(Outcome::AlreadySent);
        }

        let record = store
            .get(rule.subject_field.as_str(), subject)
            .await
            .map_err(fail(SendStage::Lookup))?
            .ok_or_else(|| {
                fail(SendStage::Lookup)(
                    StructError::from(CoreReason::Store)
                        .with_detail(format!("subject {subject} vanished from store")),
                )
            })?;

        let message = producer
            .render(&RenderContext {
                rule,
                subject,
                record: &record,
                vars: &self.vars,
            })
            .map_err(fail(SendStage::Render))?;

        let envelope = Envelope::new(
            &rule.name,
            subject,
            shifted.offset(),
            shifted.effective_time_lower(),
            message,
        );
        self.outbox
            .deliver(&envelope)
            .await
            .map_err(fail(SendStage::Delivery))?;

        let sent = SendRecord {
            rule: rule.name.clone(),
            subject: subject.clone(),
            sent_at: now,
        };
        match self.ledger.record_sent(&sent, since).await {
            Ok(RecordOutcome::Inserted) => Ok(Outcome::Sent),
            Ok(RecordOutcome::AlreadyPresent) => {
                log::warn!(
                    "drip {:?} subject {}: delivered, but another sender recorded first (key {})",
                    rule.name,
                    subject,
                    envelope.idempotency_key
                );
                Ok(Outcome::AlreadySent)
            }
            Err(e) => {
                log::error!(
                    "drip {:?} subject {}: delivered but not recorded, may be sent again (key {})",
                    rule.name,
                    subject,
                    envelope.idempotency_key
                );
                Err(fail(SendStage::LedgerWrite)(e))
            }
        }
    }
}

/// Subjects of `subjects` the ledger already holds for `rule`, honouring its
/// repeat policy at `now`. Used by previews, which never send.
pub async fn already_sent(
    ledger: &dyn SendLedger,
    rule: &CompiledRule,
    subjects: &MatchSet,
    now: DateTime<Utc>,
) -> CoreResult<MatchSet> {
    let since = rule.definition.repeat.since(now);
    let mut hit = MatchSet::new();
    for subject in subjects {
        if ledger.has_sent(rule.name(), subject, since).await? {
            hit.insert(subject.clone());
        }
    }
    Ok(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TextProducer;
    use crate::rule::RuleDefinition;
    use crate::schema::{FieldKind, Schema};
    use crate::send::{MemoryLedger, MemoryOutbox};
    use crate::store::MemoryStore;
    use crate::walk::walk;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        let schema = Schema::new([
            ("id".to_string(), FieldKind::String),
            ("name".to_string(), FieldKind::String),
            ("date_joined".to_string(), FieldKind::Time),
        ]);
        MemoryStore::from_jsonl(
            schema,
            r#"{"id": "a", "name": "Ann", "date_joined": "2024-03-09T13:00:00Z"}
{"id": "b", "name": "Bob", "date_joined": "2024-03-09T14:00:00Z"}"#,
        )
        .unwrap()
    }

    fn shifted(store: &MemoryStore, body: &str) -> ShiftedRule {
        let mut def = RuleDefinition::new("welcome", "date_joined", TimeDelta::days(1), "id").unwrap();
        def.template.subject = "Hi".into();
        def.template.body = body.into();
        let rule = Arc::new(def.compile(store.schema()).unwrap());
        walk(rule, 0, 0, now(), TimeDelta::days(1)).unwrap().next().unwrap()
    }

    fn ids(v: &[&str]) -> MatchSet {
        v.iter().map(|s| SubjectId::from(*s)).collect()
    }

    #[tokio::test]
    async fn sends_and_records_then_skips() {
        let store = store();
        let ledger = Arc::new(MemoryLedger::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let gate = SendGate::new(ledger.clone(), outbox.clone(), Arc::new(HashMap::new()));
        let s = shifted(&store, "Hello {{name}}");

        let report = gate.send(&s, &ids(&["a", "b"]), &store, &TextProducer, now()).await;
        assert_eq!(report.sent, vec![SubjectId::from("a"), SubjectId::from("b")]);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.delivered()[0].message.content, b"Hello Ann".to_vec());
        assert_eq!(ledger.len(), 2);

        let again = gate.send(&s, &ids(&["a", "b"]), &store, &TextProducer, now()).await;
        assert!(again.sent.is_empty());
        assert_eq!(again.already_sent.len(), 2);
        assert_eq!(outbox.len(), 2);
    }

    #[tokio::test]
    async fn missing_subject_is_isolated() {
        let store = store();
        let ledger = Arc::new(MemoryLedger::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let gate = SendGate::new(ledger.clone(), outbox.clone(), Arc::new(HashMap::new()));
        let s = shifted(&store, "Hello {{name}}");

        let report = gate
            .send(&s, &ids(&["a", "ghost", "b"]), &store, &TextProducer, now())
            .await;
        assert_eq!(report.sent.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].subject, SubjectId::from("ghost"));
        assert_eq!(report.failed[0].stage, SendStage::Lookup);
        assert!(!ledger.has_sent("welcome", &SubjectId::from("ghost"), None).await.unwrap());
    }

    struct FlakyOutbox {
        inner: MemoryOutbox,
        reject: SubjectId,
    }

    #[async_trait]
    impl Outbox for FlakyOutbox {
        async fn deliver(&self, envelope: &Envelope) -> CoreResult<()> {
            if envelope.subject == self.reject {
                return StructError::from(CoreReason::Delivery)
                    .with_detail("mailbox full")
                    .err();
            }
            self.inner.deliver(envelope).await
        }
    }

    #[tokio::test]
    async fn delivery_failure_leaves_no_record() {
        let store = store();
        let ledger = Arc::new(MemoryLedger::new());
        let outbox = Arc::new(FlakyOutbox {
            inner: MemoryOutbox::new(),
            reject: SubjectId::from("a"),
        });
        let gate = SendGate::new(ledger.clone(), outbox.clone(), Arc::new(HashMap::new()));
        let s = shifted(&store, "x");

        let report = gate.send(&s, &ids(&["a", "b"]), &store, &TextProducer, now()).await;
        assert_eq!(report.sent, vec![SubjectId::from("b")]);
        assert_eq!(report.failed[0].stage, SendStage::Delivery);
        assert!(!ledger.has_sent("welcome", &SubjectId::from("a"), None).await.unwrap());
    }

    #[tokio::test]
    async fn in_flight_claim_blocks_second_sender() {
        let store = store();
        let gate = SendGate::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryOutbox::new()),
            Arc::new(HashMap::new()),
        );
        let s = shifted(&store, "x");
        let claim = gate.claim("welcome", &SubjectId::from("a"));
        assert!(claim.is_some());
        let report = gate.send(&s, &ids(&["a"]), &store, &TextProducer, now()).await;
        assert_eq!(report.in_flight, vec![SubjectId::from("a")]);
        drop(claim);
        let report = gate.send(&s, &ids(&["a"]), &store, &TextProducer, now()).await;
        assert_eq!(report.sent, vec![SubjectId::from("a")]);
    }

    #[tokio::test]
    async fn already_sent_filters_by_ledger() {
        let store = store();
        let s = shifted(&store, "x");
        let ledger = MemoryLedger::with_records([SendRecord {
            rule: "welcome".into(),
            subject: SubjectId::from("b"),
            sent_at: now() - TimeDelta::days(40),
        }]);
        let hit = already_sent(&ledger, s.rule(), &ids(&["a", "b"]), now()).await.unwrap();
        assert_eq!(hit, ids(&["b"]));
    }
}
