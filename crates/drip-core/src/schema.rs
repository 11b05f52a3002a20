use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use serde::{Serialize, Serializer};

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Scalar (or list) value carried by a subject-store record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Number(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Value::Null => None,
            Value::Str(_) => Some(FieldKind::String),
            Value::Number(_) => Some(FieldKind::Number),
            Value::Bool(_) => Some(FieldKind::Bool),
            Value::Time(_) => Some(FieldKind::Time),
            Value::List(_) => Some(FieldKind::List),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Ordering between values of the same kind. `None` for mixed kinds,
    /// nulls, bools and lists, which only support equality.
    pub fn partial_order(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Str(s) => f.write_str(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Time(t) => f.write_str(&t.to_rfc3339()),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Time(t) => serializer.serialize_str(&t.to_rfc3339()),
            Value::List(items) => items.serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldKind
// ---------------------------------------------------------------------------

/// Type tag of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Time,
    List,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::Time => "time",
            FieldKind::List => "list",
        }
    }

    /// Kinds with a total order usable by `lt`/`gt` and time buckets.
    pub fn is_ordered(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Number | FieldKind::Time)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "chars" => Ok(FieldKind::String),
            "number" | "int" | "float" | "digit" => Ok(FieldKind::Number),
            "bool" => Ok(FieldKind::Bool),
            "time" | "datetime" => Ok(FieldKind::Time),
            "list" | "array" => Ok(FieldKind::List),
            other => anyhow::bail!("unknown field type {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Dotted path to a record attribute, e.g. `"profile.plan"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty field path");
        }
        if s.split('.').any(|seg| seg.is_empty()) {
            anyhow::bail!("field path {s:?} has an empty segment");
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Field descriptor map of one subject store. Rules resolve their field paths
/// against it once, when compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldKind>,
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = (String, FieldKind)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Build from `name = "type"` pairs as written in `[store.<key>.fields]`.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = (&'a String, &'a String)>) -> CoreResult<Self> {
        let mut fields = BTreeMap::new();
        for (name, tag) in tags {
            let path: FieldPath = name.parse().owe(CoreReason::Config)?;
            let kind: FieldKind = tag
                .parse()
                .map_err(|e| {
                    StructError::from(CoreReason::Config)
                        .with_detail(format!("field {name:?}: {e}"))
                })?;
            fields.insert(path.0, kind);
        }
        Ok(Self { fields })
    }

    /// Resolve `path` to its declared kind. Unknown fields are a
    /// configuration error.
    pub fn resolve(&self, path: &FieldPath) -> CoreResult<FieldKind> {
        match self.fields.get(path.as_str()) {
            Some(kind) => Ok(*kind),
            None => StructError::from(CoreReason::Config)
                .with_detail(format!(
                    "field {:?} does not resolve against the store schema",
                    path.as_str()
                ))
                .err(),
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    /// Field name → type tag, in name order. Feeds predicate-builder UIs.
    pub fn simple_fields(&self) -> BTreeMap<String, &'static str> {
        self.fields
            .iter()
            .map(|(name, kind)| (name.clone(), kind.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new([
            ("id".to_string(), FieldKind::Number),
            ("profile.plan".to_string(), FieldKind::String),
            ("date_joined".to_string(), FieldKind::Time),
        ])
    }

    #[test]
    fn resolve_known_and_nested() {
        let s = schema();
        assert_eq!(s.resolve(&"id".parse().unwrap()).unwrap(), FieldKind::Number);
        assert_eq!(
            s.resolve(&"profile.plan".parse().unwrap()).unwrap(),
            FieldKind::String
        );
    }

    #[test]
    fn resolve_unknown_is_error() {
        assert!(schema().resolve(&"profile.tier".parse().unwrap()).is_err());
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!("".parse::<FieldPath>().is_err());
        assert!("a..b".parse::<FieldPath>().is_err());
        assert!(".a".parse::<FieldPath>().is_err());
        let p: FieldPath = "a.b.c".parse().unwrap();
        assert_eq!(p.segments().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn from_tags_parses_kinds() {
        let tags: BTreeMap<String, String> = [
            ("email".to_string(), "string".to_string()),
            ("joined".to_string(), "time".to_string()),
        ]
        .into_iter()
        .collect();
        let s = Schema::from_tags(&tags).unwrap();
        assert_eq!(s.kind_of("joined"), Some(FieldKind::Time));
        assert_eq!(
            s.simple_fields().into_iter().collect::<Vec<_>>(),
            vec![("email".to_string(), "string"), ("joined".to_string(), "time")]
        );
    }

    #[test]
    fn from_tags_rejects_unknown_type() {
        let tags: BTreeMap<String, String> =
            [("x".to_string(), "blob".to_string())].into_iter().collect();
        assert!(Schema::from_tags(&tags).is_err());
    }

    #[test]
    fn value_display_integral_numbers() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn value_ordering_only_within_kind() {
        assert_eq!(
            Value::Number(1.0).partial_order(&Value::Number(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Number(1.0).partial_order(&Value::Str("1".into())), None);
        assert_eq!(Value::Bool(true).partial_order(&Value::Bool(false)), None);
    }
}
