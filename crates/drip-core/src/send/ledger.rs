use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use tokio::io::AsyncWriteExt;

use super::{RecordOutcome, SendLedger, SendRecord};
use crate::error::{CoreReason, CoreResult};
use crate::store::SubjectId;

type LedgerKey = (String, SubjectId);

/// Unterminated last line found while loading a ledger file.
#[derive(Debug)]
struct Tail {
    /// Byte length of the file up to the start of that line.
    keep: u64,
    /// The line parsed and only lacked its newline: write it back terminated.
    rewrite: Option<SendRecord>,
}

/// `(rule, subject)` → send timestamps.
#[derive(Debug, Default)]
struct LedgerIndex {
    entries: HashMap<LedgerKey, Vec<DateTime<Utc>>>,
}

impl LedgerIndex {
    fn has_sent(&self, rule: &str, subject: &SubjectId, since: Option<DateTime<Utc>>) -> bool {
        self.entries
            .get(&(rule.to_string(), subject.clone()))
            .is_some_and(|times| match since {
                None => !times.is_empty(),
                Some(since) => times.iter().any(|t| *t >= since),
            })
    }

    fn insert(&mut self, record: &SendRecord) {
        self.entries
            .entry((record.rule.clone(), record.subject.clone()))
            .or_default()
            .push(record.sent_at);
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    fn records(&self, rule: Option<&str>) -> Vec<SendRecord> {
        let mut out: Vec<SendRecord> = self
            .entries
            .iter()
            .filter(|((r, _), _)| rule.is_none_or(|want| r == want))
            .flat_map(|((r, subject), times)| {
                times.iter().map(|t| SendRecord {
                    rule: r.clone(),
                    subject: subject.clone(),
                    sent_at: *t,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.sent_at
                .cmp(&a.sent_at)
                .then_with(|| a.rule.cmp(&b.rule))
                .then_with(|| a.subject.cmp(&b.subject))
        });
        out
    }

    /// Index the JSON-lines `text`. A final line without its newline is a
    /// write cut short: when it does not parse it is skipped with a warning.
    /// Any other bad line fails.
    fn load(text: &str, path: &Path) -> CoreResult<(Self, Option<Tail>)> {
        let mut index = Self::default();
        let mut offset = 0usize;
        for (lineno, line) in text.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += line.len();
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SendRecord>(line) {
                Ok(record) if line.ends_with('\n') => index.insert(&record),
                Ok(record) => {
                    index.insert(&record);
                    let tail = Tail {
                        keep: start as u64,
                        rewrite: Some(record),
                    };
                    return Ok((index, Some(tail)));
                }
                Err(e) if !line.ends_with('\n') => {
                    log::warn!(
                        "ledger {}:{}: dropping partial trailing record: {e}",
                        path.display(),
                        lineno + 1
                    );
                    let tail = Tail {
                        keep: start as u64,
                        rewrite: None,
                    };
                    return Ok((index, Some(tail)));
                }
                Err(e) => {
                    return Err(e)
                        .owe(CoreReason::Ledger)
                        .position(format!("{}:{}", path.display(), lineno + 1));
                }
            }
        }
        Ok((index, None))
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// Process-local ledger. Used when no `[ledger] path` is configured.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    index: Mutex<LedgerIndex>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = SendRecord>) -> Self {
        let mut index = LedgerIndex::default();
        for r in records {
            index.insert(&r);
        }
        Self {
            index: Mutex::new(index),
        }
    }

    pub fn len(&self) -> usize {
        self.index.lock().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SendLedger for MemoryLedger {
    async fn has_sent(
        &self,
        rule: &str,
        subject: &SubjectId,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        let index = self.index.lock().expect("ledger lock poisoned");
        Ok(index.has_sent(rule, subject, since))
    }

    async fn record_sent(
        &self,
        record: &SendRecord,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<RecordOutcome> {
        let mut index = self.index.lock().expect("ledger lock poisoned");
        if index.has_sent(&record.rule, &record.subject, since) {
            return Ok(RecordOutcome::AlreadyPresent);
        }
        index.insert(record);
        Ok(RecordOutcome::Inserted)
    }

    async fn records(&self, rule: Option<&str>) -> CoreResult<Vec<SendRecord>> {
        Ok(self.index.lock().expect("ledger lock poisoned").records(rule))
    }
}

// ---------------------------------------------------------------------------
// FileLedger
// ---------------------------------------------------------------------------

struct FileLedgerInner {
    index: LedgerIndex,
    writer: tokio::io::BufWriter<tokio::fs::File>,
}

/// JSON-lines ledger. The whole file is indexed at open; each accepted record
/// is appended and flushed before `record_sent` returns.
pub struct FileLedger {
    path: PathBuf,
    inner: tokio::sync::Mutex<FileLedgerInner>,
}

impl std::fmt::Debug for FileLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLedger").field("path", &self.path).finish()
    }
}

impl FileLedger {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .owe(CoreReason::Ledger)
                .position(parent.display().to_string())?;
        }

        let (index, tail) = match tokio::fs::read_to_string(&path).await {
            Ok(text) => LedgerIndex::load(&text, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (LedgerIndex::default(), None),
            Err(e) => {
                return Err(e)
                    .owe(CoreReason::Ledger)
                    .position(path.display().to_string());
            }
        };
        log::debug!("ledger {} opened with {} records", path.display(), index.len());

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .owe(CoreReason::Ledger)
            .position(path.display().to_string())?;
        let mut writer = tokio::io::BufWriter::new(file);

        if let Some(tail) = tail {
            writer
                .get_ref()
                .set_len(tail.keep)
                .await
                .owe(CoreReason::Ledger)
                .position(path.display().to_string())?;
            if let Some(record) = tail.rewrite {
                let mut line = serde_json::to_string(&record).owe(CoreReason::Ledger)?;
                line.push('\n');
                writer
                    .write_all(line.as_bytes())
                    .await
                    .owe(CoreReason::Ledger)
                    .position(path.display().to_string())?;
                writer
                    .flush()
                    .await
                    .owe(CoreReason::Ledger)
                    .position(path.display().to_string())?;
            }
        }

        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(FileLedgerInner { index, writer }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.index.len()
    }
}

#[async_trait]
impl SendLedger for FileLedger {
    async fn has_sent(
        &self,
        rule: &str,
        subject: &SubjectId,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        Ok(self.inner.lock().await.index.has_sent(rule, subject, since))
    }

    async fn record_sent(
        &self,
        record: &SendRecord,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<RecordOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.index.has_sent(&record.rule, &record.subject, since) {
            return Ok(RecordOutcome::AlreadyPresent);
        }

        let mut line = serde_json::to_string(record).owe(CoreReason::Ledger)?;
        line.push('\n');
        inner
            .writer
            .write_all(line.as_bytes())
            .await
            .owe(CoreReason::Ledger)
            .position(self.path.display().to_string())?;
        inner
            .writer
            .flush()
            .await
            .owe(CoreReason::Ledger)
            .position(self.path.display().to_string())?;

        inner.index.insert(record);
        Ok(RecordOutcome::Inserted)
    }

    async fn records(&self, rule: Option<&str>) -> CoreResult<Vec<SendRecord>> {
        Ok(self.inner.lock().await.index.records(rule))
    }
}
