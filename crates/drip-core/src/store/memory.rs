use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use drip_config::StoreConfig;
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use serde_json::Value as Json;

use super::{MatchSet, Record, SubjectId, SubjectQuery, SubjectStore};
use crate::error::{CoreReason, CoreResult};
use crate::predicate::parse_time;
use crate::schema::{FieldKind, Schema, Value};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory subject store answering queries by a full scan.
///
/// Loaded from a JSON-lines file where each line is one subject object.
/// Nested objects are flattened to dotted paths (`{"profile":{"plan":"x"}}`
/// becomes `profile.plan`) and values are coerced to the declared kinds.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    records: Vec<Record>,
    find_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(schema: Schema, records: Vec<Record>) -> Self {
        Self {
            schema,
            records,
            find_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Build from a `[store.<key>]` section. Relative paths resolve against
    /// `base_dir`.
    pub fn from_config(cfg: &StoreConfig, base_dir: &Path) -> CoreResult<Self> {
        let schema = Schema::from_tags(&cfg.fields)?;
        let path = if cfg.path.is_relative() {
            base_dir.join(&cfg.path)
        } else {
            cfg.path.clone()
        };
        let text = std::fs::read_to_string(&path)
            .owe(CoreReason::Store)
            .position(path.display().to_string())?;
        Self::from_jsonl(schema, &text).position(path.display().to_string())
    }

    pub fn from_jsonl(schema: Schema, text: &str) -> CoreResult<Self> {
        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let json: Json = serde_json::from_str(line)
                .owe(CoreReason::Store)
                .position(format!("line {}", lineno + 1))?;
            let record =
                record_from_json(&schema, &json).position(format!("line {}", lineno + 1))?;
            records.push(record);
        }
        log::debug!("memory store loaded {} records", records.len());
        Ok(Self::new(schema, records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `find` calls served so far.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::Relaxed)
    }

    /// Number of `get` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn find(&self, query: &SubjectQuery) -> CoreResult<MatchSet> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .records
            .iter()
            .filter(|r| query.matches(r))
            .filter_map(|r| query.subject_of(r))
            .collect())
    }

    async fn get(&self, subject_field: &str, id: &SubjectId) -> CoreResult<Option<Record>> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .records
            .iter()
            .find(|r| {
                r.get(subject_field)
                    .and_then(SubjectId::from_value)
                    .is_some_and(|sid| &sid == id)
            })
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// JSON → Record
// ---------------------------------------------------------------------------

fn record_from_json(schema: &Schema, json: &Json) -> CoreResult<Record> {
    let Json::Object(_) = json else {
        return StructError::from(CoreReason::Store)
            .with_detail("subject line must be a JSON object")
            .err();
    };
    let mut flat = Vec::new();
    flatten("", json, &mut flat);

    let mut record = Record::default();
    for (path, raw) in flat {
        let value = match schema.kind_of(&path) {
            Some(kind) => coerce(kind, raw).ok_or_else(|| {
                StructError::from(CoreReason::Store)
                    .with_detail(format!("field {path:?}: {raw} is not a valid {kind}"))
            })?,
            None => untyped(raw),
        };
        record.insert(path, value);
    }
    Ok(record)
}

fn flatten<'a>(prefix: &str, json: &'a Json, out: &mut Vec<(String, &'a Json)>) {
    match json {
        Json::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&path, v, out);
            }
        }
        other => out.push((prefix.to_string(), other)),
    }
}

fn coerce(kind: FieldKind, raw: &Json) -> Option<Value> {
    if raw.is_null() {
        return Some(Value::Null);
    }
    match kind {
        FieldKind::String => match raw {
            Json::String(s) => Some(Value::Str(s.clone())),
            Json::Number(n) => Some(Value::Str(n.to_string())),
            _ => None,
        },
        FieldKind::Number => raw.as_f64().map(Value::Number),
        FieldKind::Bool => raw.as_bool().map(Value::Bool),
        FieldKind::Time => match raw {
            Json::String(s) => parse_time(s).map(Value::Time),
            Json::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(Value::Time),
            _ => None,
        },
        FieldKind::List => match raw {
            Json::Array(items) => Some(Value::List(items.iter().map(untyped).collect())),
            _ => None,
        },
    }
}

fn untyped(raw: &Json) -> Value {
    match raw {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(untyped).collect()),
        Json::Object(_) => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
