use std::path::{Path, PathBuf};
use std::sync::Arc;

use drip_config::CampaignConfig;
use drip_core::message::builtin_producers;
use drip_core::send::{FileLedger, FileOutbox, MemoryLedger, MemoryOutbox, Outbox, SendGate, SendLedger};
use drip_core::store::MemoryStore;
use drip_core::{Registry, RuleDefinition, SubjectStore};
use orion_error::op_context;
use orion_error::prelude::*;

use crate::campaign::{Campaign, EvalSettings, RuleHandle};
use crate::error::RuntimeResult;

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Open every store, compile every drip against its store's schema and wire
/// the send gate. Any unknown store, unknown message kind or bad predicate
/// fails the whole bootstrap.
#[tracing::instrument(name = "campaign.bootstrap", skip_all, fields(base_dir = %base_dir.display()))]
pub async fn bootstrap(config: &CampaignConfig, base_dir: &Path) -> RuntimeResult<Campaign> {
    let mut op = op_context!("campaign-bootstrap").with_auto_log();
    op.record("base_dir", base_dir.display().to_string().as_str());

    // 1. Stores
    let mut stores: Registry<dyn SubjectStore> = Registry::new("store");
    for (key, cfg) in &config.stores {
        let store = MemoryStore::from_config(cfg, base_dir).err_conv()?;
        drip_debug!(conf, store = %key, records = store.len(), "store loaded");
        stores.register(key.clone(), Arc::new(store)).err_conv()?;
    }

    // 2. Message producers
    let producers = builtin_producers().err_conv()?;

    // 3. Drips
    let mut rules = Vec::with_capacity(config.drips.len());
    for drip in &config.drips {
        let def = RuleDefinition::from_config(drip).err_conv()?;
        let store = stores.lookup(&def.store).err_conv()?;
        let producer = producers.lookup(&def.message_kind).err_conv()?;
        let rule = def.compile(store.schema()).err_conv()?;
        if !rule.is_enabled() {
            drip_info!(conf, rule = %rule.name(), "drip disabled");
        }
        rules.push(RuleHandle {
            rule: Arc::new(rule),
            store,
            producer,
        });
    }

    // 4. Ledger and outbox
    let ledger: Arc<dyn SendLedger> = match &config.ledger.path {
        Some(path) => Arc::new(
            FileLedger::open(resolve(base_dir, path))
                .await
                .err_conv()?,
        ),
        None => {
            drip_warn!(conf, "no ledger path configured, send records are kept in memory");
            Arc::new(MemoryLedger::new())
        }
    };
    let outbox: Arc<dyn Outbox> = match &config.outbox.path {
        Some(path) => Arc::new(
            FileOutbox::open(resolve(base_dir, path))
                .await
                .err_conv()?,
        ),
        None => Arc::new(MemoryOutbox::new()),
    };
    let gate = Arc::new(SendGate::new(ledger, outbox, Arc::new(config.vars.clone())));

    let settings = EvalSettings::from_config(config);
    drip_info!(
        sys,
        stores = stores.len(),
        drips = rules.len(),
        "campaign bootstrap complete"
    );
    op.mark_suc();
    Ok(Campaign::new(rules, stores, producers, gate, settings))
}
