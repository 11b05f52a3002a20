//! Store misbehaviour stays contained to the drip that hit it.
//!
//! Each campaign here is wired by hand so a drip can sit on a store that
//! errors, stalls, panics or counts its concurrent queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use drip_core::message::{Message, MessageProducer, RenderContext, builtin_producers};
use drip_core::schema::{FieldKind, Schema, Value};
use drip_core::send::{MemoryLedger, MemoryOutbox, SendGate};
use drip_core::store::{MemoryStore, Record, SubjectQuery};
use drip_core::{
    CoreReason, CoreResult, MatchSet, Registry, RuleDefinition, SubjectId, SubjectStore,
};
use drip_runtime::{Campaign, EvalSettings, RuleHandle, RunReport, RuntimeReason};
use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn schema() -> Schema {
    Schema::new([
        ("id".to_string(), FieldKind::String),
        ("date_joined".to_string(), FieldKind::Time),
    ])
}

/// One subject inside the Δ=0 bucket of a 3d drip at [`now`].
fn subjects() -> MemoryStore {
    let joined = Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap();
    MemoryStore::new(
        schema(),
        vec![Record::new([
            ("id".to_string(), Value::Str("B".into())),
            ("date_joined".to_string(), Value::Time(joined)),
        ])],
    )
}

enum Fault {
    Fail,
    Stall(Duration),
    Panic,
}

struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
}

impl FaultyStore {
    fn new(fault: Fault) -> Self {
        Self {
            inner: subjects(),
            fault,
        }
    }
}

#[async_trait]
impl SubjectStore for FaultyStore {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    async fn find(&self, query: &SubjectQuery) -> CoreResult<MatchSet> {
        match self.fault {
            Fault::Fail => StructError::from(CoreReason::Store)
                .with_detail("connection refused")
                .err(),
            Fault::Stall(wait) => {
                tokio::time::sleep(wait).await;
                self.inner.find(query).await
            }
            Fault::Panic => panic!("store driver crashed"),
        }
    }

    async fn get(&self, subject_field: &str, id: &SubjectId) -> CoreResult<Option<Record>> {
        self.inner.get(subject_field, id).await
    }
}

/// Tracks how many `find` calls overlap.
struct CountingStore {
    inner: MemoryStore,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingStore {
    fn new(delay: Duration) -> Self {
        Self {
            inner: subjects(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SubjectStore for CountingStore {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    async fn find(&self, query: &SubjectQuery) -> CoreResult<MatchSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.find(query).await
    }

    async fn get(&self, subject_field: &str, id: &SubjectId) -> CoreResult<Option<Record>> {
        self.inner.get(subject_field, id).await
    }
}

struct CrashingProducer;

impl MessageProducer for CrashingProducer {
    fn kind(&self) -> &'static str {
        "crash"
    }

    fn render(&self, _ctx: &RenderContext<'_>) -> CoreResult<Message> {
        panic!("template engine crashed")
    }
}

fn text_producer() -> Arc<dyn MessageProducer> {
    builtin_producers().unwrap().lookup("text").unwrap()
}

fn handle(name: &str, store: Arc<dyn SubjectStore>, producer: Arc<dyn MessageProducer>) -> RuleHandle {
    let mut def = RuleDefinition::new(name, "date_joined", TimeDelta::days(3), "id").unwrap();
    def.template.subject = format!("{name} for {{{{id}}}}");
    RuleHandle {
        rule: Arc::new(def.compile(&schema()).unwrap()),
        store,
        producer,
    }
}

fn campaign(handles: Vec<RuleHandle>, eval_parallelism: usize, query_timeout: Duration) -> Campaign {
    let mut stores: Registry<dyn SubjectStore> = Registry::new("store");
    for h in &handles {
        stores.register(h.name(), Arc::clone(&h.store)).unwrap();
    }
    let gate = SendGate::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(MemoryOutbox::new()),
        Arc::new(HashMap::new()),
    );
    Campaign::new(
        handles,
        stores,
        builtin_producers().unwrap(),
        Arc::new(gate),
        EvalSettings {
            unit: TimeDelta::days(1),
            into_past: 0,
            into_future: 0,
            interval: Duration::from_secs(60),
            eval_parallelism,
            query_timeout,
        },
    )
}

fn failed_rules(report: &RunReport) -> Vec<&str> {
    report.failures.iter().map(|f| f.rule.as_str()).collect()
}

#[tokio::test]
async fn store_error_fails_only_its_drip() {
    let campaign = campaign(
        vec![
            handle("broken", Arc::new(FaultyStore::new(Fault::Fail)), text_producer()),
            handle("welcome", Arc::new(subjects()), text_producer()),
        ],
        4,
        Duration::from_secs(5),
    );

    let report = campaign.run_once(now(), 0, 0, &CancellationToken::new()).await;
    assert!(!report.is_clean());
    assert_eq!(failed_rules(&report), vec!["broken"]);
    let reason = report.failures[0].error.reason();
    assert_eq!(reason, &RuntimeReason::Core(CoreReason::Store));
    assert!(reason.is_retryable());

    assert_eq!(report.rules.len(), 1);
    assert_eq!(report.rules[0].rule, "welcome");
    assert_eq!(report.sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_query_times_out_as_retryable() {
    let campaign = campaign(
        vec![
            handle(
                "stalled",
                Arc::new(FaultyStore::new(Fault::Stall(Duration::from_secs(60)))),
                text_producer(),
            ),
            handle("welcome", Arc::new(subjects()), text_producer()),
        ],
        4,
        Duration::from_secs(1),
    );

    let report = campaign.run_once(now(), 0, 0, &CancellationToken::new()).await;
    assert_eq!(failed_rules(&report), vec!["stalled"]);
    let reason = report.failures[0].error.reason();
    assert_eq!(reason, &RuntimeReason::Timeout);
    assert!(reason.is_retryable());
    assert_eq!(report.sent(), 1);
}

#[tokio::test]
async fn panicking_store_is_reported_as_panic() {
    let campaign = campaign(
        vec![
            handle("crashing", Arc::new(FaultyStore::new(Fault::Panic)), text_producer()),
            handle("welcome", Arc::new(subjects()), text_producer()),
        ],
        4,
        Duration::from_secs(5),
    );

    let report = campaign.run_once(now(), 0, 0, &CancellationToken::new()).await;
    assert_eq!(failed_rules(&report), vec!["crashing"]);
    let reason = report.failures[0].error.reason();
    assert_eq!(reason, &RuntimeReason::Panic);
    assert!(!reason.is_retryable());
    assert_eq!(report.sent(), 1);
}

#[tokio::test]
async fn panicking_drip_task_stays_in_report() {
    let campaign = campaign(
        vec![
            handle("crashing", Arc::new(subjects()), Arc::new(CrashingProducer)),
            handle("welcome", Arc::new(subjects()), text_producer()),
        ],
        4,
        Duration::from_secs(5),
    );

    let report = campaign.run_once(now(), 0, 0, &CancellationToken::new()).await;
    assert!(!report.is_clean());
    assert_eq!(failed_rules(&report), vec!["crashing"]);
    assert_eq!(report.failures[0].error.reason(), &RuntimeReason::Panic);
    assert_eq!(report.rules.len(), 1);
    assert_eq!(report.sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_queries_stay_within_parallelism() {
    let store = Arc::new(CountingStore::new(Duration::from_millis(50)));
    let campaign = campaign(
        vec![
            handle("welcome", store.clone(), text_producer()),
            handle("nudge", store.clone(), text_producer()),
        ],
        2,
        Duration::from_secs(5),
    );

    let report = campaign.run_once(now(), 3, 3, &CancellationToken::new()).await;
    assert!(report.is_clean());
    assert_eq!(store.calls.load(Ordering::SeqCst), 14);
    let peak = store.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak in-flight queries {peak}");
    assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
}
