use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use drip_config::CampaignConfig;
use drip_core::message::{Message, MessageProducer, RenderContext};
use drip_core::send::{SendGate, SendLedger, SendRecord, SendReport, already_sent};
use drip_core::{
    CompiledRule, CoreReason, Deduplicator, MatchSet, Registry, ShiftedRule, SubjectId,
    SubjectStore, TimeBucket, Walker, evaluate, walk,
};
use orion_error::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, RuntimeReason, RuntimeResult};

// ---------------------------------------------------------------------------
// Settings and handles
// ---------------------------------------------------------------------------

/// Evaluation knobs taken from `[runtime]` and `[walk]`.
#[derive(Debug, Clone, Copy)]
pub struct EvalSettings {
    pub unit: TimeDelta,
    pub into_past: u32,
    pub into_future: u32,
    pub interval: Duration,
    pub eval_parallelism: usize,
    pub query_timeout: Duration,
}

impl EvalSettings {
    pub fn from_config(config: &CampaignConfig) -> Self {
        Self {
            unit: config.walk.unit.as_time_delta(),
            into_past: config.walk.into_past,
            into_future: config.walk.into_future,
            interval: config.walk.interval.as_duration(),
            eval_parallelism: config.runtime.eval_parallelism,
            query_timeout: config.runtime.query_timeout.as_duration(),
        }
    }
}

/// A compiled rule with the store and producer its config named.
#[derive(Clone)]
pub struct RuleHandle {
    pub rule: Arc<CompiledRule>,
    pub store: Arc<dyn SubjectStore>,
    pub producer: Arc<dyn MessageProducer>,
}

impl RuleHandle {
    pub fn name(&self) -> &str {
        self.rule.name()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One offset of a walk that reached the send step.
#[derive(Debug)]
pub struct OffsetReport {
    pub offset: i64,
    pub bucket: TimeBucket,
    /// Raw match count, before deduplication.
    pub matched: usize,
    pub send: SendReport,
}

/// Outcome of walking and sending one rule.
#[derive(Debug)]
pub struct RuleRun {
    pub rule: String,
    pub offsets: Vec<OffsetReport>,
    /// Cancellation stopped the walk before its last offset was sent.
    pub cancelled: bool,
}

impl RuleRun {
    pub fn sent(&self) -> usize {
        self.offsets.iter().map(|o| o.send.sent.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.offsets.iter().map(|o| o.send.failed.len()).sum()
    }

    pub fn sent_subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.offsets.iter().flat_map(|o| o.send.sent.iter())
    }
}

#[derive(Debug)]
pub struct RuleFailure {
    pub rule: String,
    pub error: RuntimeError,
}

/// Outcome of one scheduler tick over every enabled rule.
#[derive(Debug)]
pub struct RunReport {
    pub now: DateTime<Utc>,
    /// In rule configuration order.
    pub rules: Vec<RuleRun>,
    /// Rules whose walk failed as a whole (store error, timeout).
    pub failures: Vec<RuleFailure>,
    pub disabled: Vec<String>,
}

impl RunReport {
    pub fn sent(&self) -> usize {
        self.rules.iter().map(RuleRun::sent).sum()
    }

    pub fn failed_subjects(&self) -> usize {
        self.rules.iter().map(RuleRun::failed).sum()
    }

    pub fn cancelled(&self) -> bool {
        self.rules.iter().any(|r| r.cancelled)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.failed_subjects() == 0
    }
}

/// One offset of a preview: what matched, what dedup kept, and which of
/// those the ledger already holds.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub shifted: ShiftedRule,
    pub matched: MatchSet,
    pub fresh: MatchSet,
    pub already_sent: MatchSet,
}

impl TimelineEntry {
    /// Subjects a run at this offset would send to.
    pub fn will_send(&self) -> MatchSet {
        self.fresh.difference(&self.already_sent).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

/// Every compiled drip together with its collaborators.
pub struct Campaign {
    rules: Vec<RuleHandle>,
    stores: Registry<dyn SubjectStore>,
    producers: Registry<dyn MessageProducer>,
    gate: Arc<SendGate>,
    settings: EvalSettings,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for Campaign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Campaign")
            .field("rules", &self.rules.iter().map(RuleHandle::name).collect::<Vec<_>>())
            .field("stores", &self.stores)
            .field("producers", &self.producers)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Campaign {
    pub fn new(
        rules: Vec<RuleHandle>,
        stores: Registry<dyn SubjectStore>,
        producers: Registry<dyn MessageProducer>,
        gate: Arc<SendGate>,
        settings: EvalSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.eval_parallelism.max(1)));
        Self {
            rules,
            stores,
            producers,
            gate,
            settings,
            permits,
        }
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleHandle> {
        self.rules.iter()
    }

    pub fn producers(&self) -> &Registry<dyn MessageProducer> {
        &self.producers
    }

    fn handle(&self, name: &str) -> RuntimeResult<&RuleHandle> {
        match self.rules.iter().find(|h| h.name() == name) {
            Some(h) => Ok(h),
            None => StructError::from(RuntimeReason::Core(CoreReason::UnknownKind))
                .with_detail(format!("unknown drip {name:?}"))
                .err(),
        }
    }

    fn walker(&self, handle: &RuleHandle, now: DateTime<Utc>, past: u32, future: u32) -> RuntimeResult<Walker> {
        walk(Arc::clone(&handle.rule), past, future, now, self.settings.unit).err_conv()
    }

    /// Field name → type tag per store, for one store or all of them.
    pub fn fields(&self, store: Option<&str>) -> RuntimeResult<BTreeMap<String, BTreeMap<String, &'static str>>> {
        let keys: Vec<String> = match store {
            Some(key) => vec![key.to_string()],
            None => self.stores.keys().map(str::to_string).collect(),
        };
        let mut out = BTreeMap::new();
        for key in keys {
            let store = self.stores.lookup(&key).err_conv()?;
            out.insert(key, store.schema().simple_fields());
        }
        Ok(out)
    }

    /// Preview a walk without sending anything.
    #[tracing::instrument(name = "campaign.timeline", skip_all, fields(rule = name))]
    pub async fn timeline(
        &self,
        name: &str,
        into_past: u32,
        into_future: u32,
        now: DateTime<Utc>,
    ) -> RuntimeResult<Vec<TimelineEntry>> {
        let handle = self.handle(name)?;
        let walker = self.walker(handle, now, into_past, into_future)?;
        let raw = evaluate_offsets(
            handle,
            walker,
            &self.permits,
            self.settings.query_timeout,
            &CancellationToken::new(),
        )
        .await?
        .unwrap_or_default();

        let mut dedup = Deduplicator::new();
        let mut entries = Vec::with_capacity(raw.len());
        for (shifted, matched) in raw {
            let fresh = dedup.push(&matched);
            let already_sent = already_sent(self.gate.ledger().as_ref(), &handle.rule, &fresh, now)
                .await
                .err_conv()?;
            entries.push(TimelineEntry {
                shifted,
                matched,
                fresh,
                already_sent,
            });
        }
        Ok(entries)
    }

    /// Render `name`'s message for one subject, without delivering it.
    pub async fn render(&self, name: &str, subject: &SubjectId) -> RuntimeResult<Message> {
        let handle = self.handle(name)?;
        let def = &handle.rule.definition;
        let record = handle
            .store
            .get(def.subject_field.as_str(), subject)
            .await
            .err_conv()?;
        let Some(record) = record else {
            return StructError::from(RuntimeReason::Core(CoreReason::Store))
                .with_detail(format!("subject {subject} not found in store {:?}", def.store))
                .err();
        };
        handle
            .producer
            .render(&RenderContext {
                rule: def,
                subject,
                record: &record,
                vars: self.gate.vars(),
            })
            .err_conv()
    }

    /// Ledger records, newest first. A named rule must exist in the campaign.
    pub async fn sent_records(&self, rule: Option<&str>) -> RuntimeResult<Vec<SendRecord>> {
        if let Some(name) = rule {
            self.handle(name)?;
        }
        self.gate.ledger().records(rule).await.err_conv()
    }

    /// Walk and send one rule. Unknown and disabled rules are refused before
    /// any store query.
    pub async fn run_rule(
        &self,
        name: &str,
        now: DateTime<Utc>,
        into_past: u32,
        into_future: u32,
        cancel: &CancellationToken,
    ) -> RuntimeResult<RuleRun> {
        let handle = self.handle(name)?;
        let walker = self.walker(handle, now, into_past, into_future)?;
        run_walk(
            handle.clone(),
            walker,
            Arc::clone(&self.gate),
            Arc::clone(&self.permits),
            self.settings.query_timeout,
            now,
            cancel.clone(),
        )
        .await
    }

    /// One scheduler tick: every enabled rule in parallel, each walked,
    /// deduplicated and sent independently.
    #[tracing::instrument(name = "campaign.run", skip_all, fields(now = %now))]
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        into_past: u32,
        into_future: u32,
        cancel: &CancellationToken,
    ) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport {
            now,
            rules: Vec::new(),
            failures: Vec::new(),
            disabled: Vec::new(),
        };

        let mut join_set = JoinSet::new();
        let mut spawned = BTreeMap::new();
        for (idx, handle) in self.rules.iter().enumerate() {
            if !handle.rule.is_enabled() {
                report.disabled.push(handle.name().to_string());
                continue;
            }
            let walker = match self.walker(handle, now, into_past, into_future) {
                Ok(w) => w,
                Err(error) => {
                    report.failures.push(RuleFailure {
                        rule: handle.name().to_string(),
                        error,
                    });
                    continue;
                }
            };
            let name = handle.name().to_string();
            let task = run_walk(
                handle.clone(),
                walker,
                Arc::clone(&self.gate),
                Arc::clone(&self.permits),
                self.settings.query_timeout,
                now,
                cancel.clone(),
            );
            spawned.insert(idx, name.clone());
            join_set.spawn(async move { (idx, name, task.await) });
        }

        let mut done = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, _, Ok(run))) => {
                    spawned.remove(&idx);
                    done.push((idx, run));
                }
                Ok((idx, rule, Err(error))) => {
                    spawned.remove(&idx);
                    drip_warn!(eval, rule = %rule, error = %error, "drip walk failed");
                    report.failures.push(RuleFailure { rule, error });
                }
                Err(e) => drip_error!(sys, error = %e, "drip task panicked"),
            }
        }
        // A panicked task loses its payload; whatever never reported panicked.
        for (_, rule) in spawned {
            report.failures.push(RuleFailure {
                error: StructError::from(RuntimeReason::Panic)
                    .with_detail(format!("drip {rule:?} task panicked")),
                rule,
            });
        }
        done.sort_by_key(|(idx, _)| *idx);
        report.rules = done.into_iter().map(|(_, run)| run).collect();

        drip_info!(
            sys,
            rules = report.rules.len(),
            failures = report.failures.len(),
            sent = report.sent(),
            failed_subjects = report.failed_subjects(),
            duration_ms = start.elapsed().as_millis() as u64,
            "run complete"
        );
        report
    }

    /// Run the configured window every `interval` until cancelled. The first
    /// run starts immediately.
    pub async fn watch(&self, interval: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        drip_info!(sys, interval = ?interval, "watching");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self
                        .run_once(Utc::now(), self.settings.into_past, self.settings.into_future, &cancel)
                        .await;
                    if report.cancelled() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        drip_info!(sys, "watch stopped");
    }
}

// ---------------------------------------------------------------------------
// Walk execution
// ---------------------------------------------------------------------------

/// Query every offset of `walker` concurrently, bounded by `permits`, and
/// return the results in walk order. `None` when cancelled before all
/// queries finished; queries have no side effects, so the rest are dropped.
async fn evaluate_offsets(
    handle: &RuleHandle,
    walker: Walker,
    permits: &Arc<Semaphore>,
    query_timeout: Duration,
    cancel: &CancellationToken,
) -> RuntimeResult<Option<Vec<(ShiftedRule, MatchSet)>>> {
    let total = walker.len();
    let mut join_set = JoinSet::new();
    for (idx, shifted) in walker.enumerate() {
        let store = Arc::clone(&handle.store);
        let permits = Arc::clone(permits);
        join_set.spawn(async move {
            let result = query_offset(store.as_ref(), &shifted, &permits, query_timeout).await;
            (idx, shifted, result)
        });
    }

    let mut slots: Vec<Option<(ShiftedRule, MatchSet)>> = vec![None; total];
    loop {
        let joined = tokio::select! {
            joined = join_set.join_next() => joined,
            _ = cancel.cancelled() => {
                join_set.abort_all();
                return Ok(None);
            }
        };
        let Some(joined) = joined else { break };
        let (idx, shifted, result) = joined.map_err(|e| {
            let reason = if e.is_panic() {
                RuntimeReason::Panic
            } else {
                RuntimeReason::Shutdown
            };
            StructError::from(reason).with_detail(format!("query task join error: {e}"))
        })?;
        slots[idx] = Some((shifted, result?));
    }

    Ok(Some(slots.into_iter().flatten().collect()))
}

async fn query_offset(
    store: &dyn SubjectStore,
    shifted: &ShiftedRule,
    permits: &Semaphore,
    query_timeout: Duration,
) -> RuntimeResult<MatchSet> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| StructError::from(RuntimeReason::Shutdown).with_detail("query permits closed"))?;
    match tokio::time::timeout(query_timeout, evaluate(store, shifted)).await {
        Ok(result) => result.err_conv(),
        Err(_) => StructError::from(RuntimeReason::Timeout)
            .with_detail(format!(
                "drip {:?} offset {} query exceeded {query_timeout:?}",
                shifted.name(),
                shifted.offset()
            ))
            .err(),
    }
}

/// Evaluate, deduplicate past to future, then send offset by offset.
/// Cancellation is honoured between offsets; an offset that started sending
/// finishes.
async fn run_walk(
    handle: RuleHandle,
    walker: Walker,
    gate: Arc<SendGate>,
    permits: Arc<Semaphore>,
    query_timeout: Duration,
    now: DateTime<Utc>,
    cancel: CancellationToken,
) -> RuntimeResult<RuleRun> {
    let name = handle.name().to_string();
    let mut run = RuleRun {
        rule: name.clone(),
        offsets: Vec::new(),
        cancelled: false,
    };

    let Some(raw) = evaluate_offsets(&handle, walker, &permits, query_timeout, &cancel).await? else {
        run.cancelled = true;
        return Ok(run);
    };
    drip_debug!(eval, rule = %name, offsets = raw.len(), "walk evaluated");

    let mut dedup = Deduplicator::new();
    for (shifted, matched) in raw {
        let fresh = dedup.push(&matched);
        if cancel.is_cancelled() {
            drip_info!(eval, rule = %name, offset = shifted.offset(), "walk cancelled between offsets");
            run.cancelled = true;
            break;
        }
        let send = gate
            .send(&shifted, &fresh, handle.store.as_ref(), handle.producer.as_ref(), now)
            .await;
        if !send.sent.is_empty() || !send.failed.is_empty() {
            drip_info!(
                send,
                rule = %name,
                offset = shifted.offset(),
                sent = send.sent.len(),
                already_sent = send.already_sent.len(),
                failed = send.failed.len(),
                "offset sent"
            );
        }
        run.offsets.push(OffsetReport {
            offset: shifted.offset(),
            bucket: shifted.bucket(),
            matched: matched.len(),
            send,
        });
    }
    Ok(run)
}
