use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{CoreReason, CoreResult};
use crate::message::Message;
use crate::store::SubjectId;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A rendered message addressed to one subject for one rule and bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub rule: String,
    pub subject: SubjectId,
    pub offset: i64,
    pub bucket_lower: DateTime<Utc>,
    pub idempotency_key: String,
    pub message: Message,
}

impl Envelope {
    pub fn new(
        rule: &str,
        subject: &SubjectId,
        offset: i64,
        bucket_lower: DateTime<Utc>,
        message: Message,
    ) -> Self {
        Self {
            rule: rule.to_string(),
            subject: subject.clone(),
            offset,
            bucket_lower,
            idempotency_key: idempotency_key(rule, subject, bucket_lower),
            message,
        }
    }
}

/// Stable key a delivery channel can use to drop replays: first 16 hex
/// chars of SHA-256 over `rule|subject|bucket_lower`.
pub fn idempotency_key(rule: &str, subject: &SubjectId, bucket_lower: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule.as_bytes());
    hasher.update(b"|");
    hasher.update(subject.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(bucket_lower.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[derive(Serialize)]
struct OutboxLine<'a> {
    idempotency_key: &'a str,
    rule: &'a str,
    subject: &'a SubjectId,
    offset: i64,
    bucket_lower: DateTime<Utc>,
    from: Option<&'a str>,
    subject_line: &'a str,
    mime_type: &'a str,
    content: std::borrow::Cow<'a, str>,
}

impl<'a> From<&'a Envelope> for OutboxLine<'a> {
    fn from(env: &'a Envelope) -> Self {
        Self {
            idempotency_key: &env.idempotency_key,
            rule: &env.rule,
            subject: &env.subject,
            offset: env.offset,
            bucket_lower: env.bucket_lower,
            from: env.message.from.as_deref(),
            subject_line: &env.message.subject,
            mime_type: &env.message.mime_type,
            content: String::from_utf8_lossy(&env.message.content),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Delivery channel for rendered messages.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> CoreResult<()>;
}

/// Appends each envelope as one JSON line; flushed per delivery.
pub struct FileOutbox {
    path: PathBuf,
    writer: tokio::sync::Mutex<tokio::io::BufWriter<tokio::fs::File>>,
}

impl std::fmt::Debug for FileOutbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOutbox").field("path", &self.path).finish()
    }
}

impl FileOutbox {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .owe(CoreReason::Delivery)
                .position(parent.display().to_string())?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .owe(CoreReason::Delivery)
            .position(path.display().to_string())?;
        Ok(Self {
            path,
            writer: tokio::sync::Mutex::new(tokio::io::BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Outbox for FileOutbox {
    async fn deliver(&self, envelope: &Envelope) -> CoreResult<()> {
        let mut line = serde_json::to_string(&OutboxLine::from(envelope)).owe(CoreReason::Delivery)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .owe(CoreReason::Delivery)
            .position(self.path.display().to_string())?;
        writer
            .flush()
            .await
            .owe(CoreReason::Delivery)
            .position(self.path.display().to_string())?;
        Ok(())
    }
}

/// Keeps delivered envelopes in memory. Dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    delivered: Mutex<Vec<Envelope>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().expect("outbox lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().expect("outbox lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn deliver(&self, envelope: &Envelope) -> CoreResult<()> {
        self.delivered
            .lock()
            .expect("outbox lock poisoned")
            .push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message() -> Message {
        Message {
            from: Some("team@example.com".into()),
            subject: "Hi".into(),
            content: b"hello".to_vec(),
            mime_type: "text/plain".into(),
        }
    }

    fn lower() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn idempotency_key_is_stable_and_distinct() {
        let a = idempotency_key("welcome", &SubjectId::from("1"), lower());
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, idempotency_key("welcome", &SubjectId::from("1"), lower()));
        assert_ne!(a, idempotency_key("welcome", &SubjectId::from("2"), lower()));
        assert_ne!(a, idempotency_key("nudge", &SubjectId::from("1"), lower()));
    }

    #[tokio::test]
    async fn file_outbox_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/outbox.jsonl");
        let outbox = FileOutbox::open(&path).await.unwrap();
        let env = Envelope::new("welcome", &SubjectId::from("1"), 0, lower(), message());
        outbox.deliver(&env).await.unwrap();
        outbox.deliver(&env).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["subject"], "1");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["idempotency_key"], env.idempotency_key.as_str());
    }

    #[tokio::test]
    async fn memory_outbox_records() {
        let outbox = MemoryOutbox::new();
        let env = Envelope::new("welcome", &SubjectId::from("1"), -1, lower(), message());
        outbox.deliver(&env).await.unwrap();
        assert_eq!(outbox.delivered(), vec![env]);
    }
}
