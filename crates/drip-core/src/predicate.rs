use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use drip_config::{LiteralValue, PredicateConfig, SignedDuration};
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use regex::{Regex, RegexBuilder};

use crate::error::{CoreReason, CoreResult};
use crate::schema::{FieldKind, FieldPath, Schema, Value};
use crate::store::Record;

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Comparison operator of a predicate. The `i`-prefixed forms compare
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Eq,
    IExact,
    Contains,
    IContains,
    Regex,
    IRegex,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
    IsNull,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Eq => "eq",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::Regex => "regex",
            Lookup::IRegex => "iregex",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::EndsWith => "endswith",
            Lookup::IEndsWith => "iendswith",
            Lookup::In => "in",
            Lookup::IsNull => "isnull",
        }
    }

    /// Whether this lookup can be applied to a field of `kind`.
    fn accepts(&self, kind: FieldKind) -> bool {
        match self {
            Lookup::Eq | Lookup::In | Lookup::IsNull => true,
            Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => kind.is_ordered(),
            Lookup::Contains => matches!(kind, FieldKind::String | FieldKind::List),
            Lookup::IExact
            | Lookup::IContains
            | Lookup::Regex
            | Lookup::IRegex
            | Lookup::StartsWith
            | Lookup::IStartsWith
            | Lookup::EndsWith
            | Lookup::IEndsWith => kind == FieldKind::String,
        }
    }
}

impl FromStr for Lookup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s.trim() {
            "eq" | "exact" => Lookup::Eq,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "regex" => Lookup::Regex,
            "iregex" => Lookup::IRegex,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            other => anyhow::bail!("unknown lookup {other:?}"),
        })
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Predicate: as configured
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: FieldPath,
    pub lookup: Lookup,
    pub value: Option<LiteralValue>,
    pub negate: bool,
}

impl Predicate {
    pub fn new(field: &str, lookup: Lookup, value: LiteralValue) -> CoreResult<Self> {
        Ok(Self {
            field: field.parse().owe(CoreReason::Config)?,
            lookup,
            value: Some(value),
            negate: false,
        })
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn from_config(cfg: &PredicateConfig) -> CoreResult<Self> {
        let field: FieldPath = cfg.field.parse().owe(CoreReason::Config)?;
        let lookup: Lookup = cfg.lookup.parse().owe(CoreReason::Config)?;
        Ok(Self {
            field,
            lookup,
            value: cfg.value.clone(),
            negate: cfg.negate,
        })
    }

    /// Resolve against `schema`, type-check the lookup and coerce the literal.
    pub fn compile(&self, schema: &Schema) -> CoreResult<CompiledPredicate> {
        let kind = schema.resolve(&self.field)?;
        if !self.lookup.accepts(kind) {
            return config_err(format!(
                "lookup {} is not supported on {} field {:?}",
                self.lookup, kind, self.field.as_str()
            ));
        }

        let operand = match self.lookup {
            Lookup::IsNull => match &self.value {
                None => Operand::Flag(true),
                Some(LiteralValue::Bool(b)) => Operand::Flag(*b),
                Some(other) => {
                    return config_err(format!(
                        "isnull on {:?} expects a bool, got {other:?}",
                        self.field.as_str()
                    ));
                }
            },
            Lookup::In => match self.required_value()? {
                LiteralValue::List(items) => Operand::Set(
                    items
                        .iter()
                        .map(|item| coerce(item, kind, &self.field))
                        .collect::<CoreResult<Vec<_>>>()?,
                ),
                other => {
                    return config_err(format!(
                        "in on {:?} expects a list, got {other:?}",
                        self.field.as_str()
                    ));
                }
            },
            Lookup::Regex | Lookup::IRegex => {
                let pattern = match self.required_value()? {
                    LiteralValue::Text(s) => s,
                    other => {
                        return config_err(format!(
                            "regex on {:?} expects a string, got {other:?}",
                            self.field.as_str()
                        ));
                    }
                };
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(self.lookup == Lookup::IRegex)
                    .build()
                    .owe(CoreReason::Config)?;
                Operand::Pattern(re)
            }
            Lookup::Contains if kind == FieldKind::List => {
                Operand::Literal(coerce_scalar(self.required_value()?, &self.field)?)
            }
            _ => coerce(self.required_value()?, kind, &self.field)?,
        };

        if operand.is_relative() && kind != FieldKind::Time {
            return config_err(format!(
                "relative time literal used on {} field {:?}",
                kind,
                self.field.as_str()
            ));
        }

        Ok(CompiledPredicate {
            field: self.field.as_str().to_string(),
            kind,
            lookup: self.lookup,
            operand,
            negate: self.negate,
        })
    }

    fn required_value(&self) -> CoreResult<&LiteralValue> {
        match &self.value {
            Some(v) => Ok(v),
            None => config_err(format!(
                "lookup {} on {:?} requires a value",
                self.lookup,
                self.field.as_str()
            )),
        }
    }
}

fn config_err<T>(detail: String) -> CoreResult<T> {
    StructError::from(CoreReason::Config).with_detail(detail).err()
}

// ---------------------------------------------------------------------------
// Relative time literals
// ---------------------------------------------------------------------------

/// `now`, `now-3d`, `today+1d`: resolved against the evaluation moment of
/// each shifted rule, so they move together with the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeTime {
    Now(SignedDuration),
    Today(SignedDuration),
}

impl RelativeTime {
    pub fn parse(s: &str) -> Option<anyhow::Result<Self>> {
        let s = s.trim();
        let (rest, ctor): (&str, fn(SignedDuration) -> Self) =
            if let Some(rest) = s.strip_prefix("now") {
                (rest, RelativeTime::Now)
            } else if let Some(rest) = s.strip_prefix("today") {
                (rest, RelativeTime::Today)
            } else {
                return None;
            };
        let rest = rest.trim();
        if rest.is_empty() {
            return Some(Ok(ctor(SignedDuration::default())));
        }
        if !rest.starts_with('-') && !rest.starts_with('+') {
            return None;
        }
        Some(rest.parse::<SignedDuration>().map(ctor))
    }

    /// `None` when the result leaves the representable time range.
    pub fn resolve(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RelativeTime::Now(offset) => at.checked_add_signed(offset.as_time_delta()),
            RelativeTime::Today(offset) => {
                let midnight = Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN));
                midnight.checked_add_signed(offset.as_time_delta())
            }
        }
    }
}

/// Parse an absolute timestamp: RFC 3339, or a bare `YYYY-MM-DD` date at UTC
/// midnight.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s.trim()) {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

// ---------------------------------------------------------------------------
// Literal coercion
// ---------------------------------------------------------------------------

fn coerce(lit: &LiteralValue, kind: FieldKind, field: &FieldPath) -> CoreResult<Operand> {
    let mismatch = || {
        config_err(format!(
            "literal {lit:?} does not fit {kind} field {:?}",
            field.as_str()
        ))
    };
    let value = match (kind, lit) {
        (FieldKind::String, LiteralValue::Text(s)) => Value::Str(s.clone()),
        (FieldKind::Number, LiteralValue::Integer(i)) => Value::Number(*i as f64),
        (FieldKind::Number, LiteralValue::Float(f)) => Value::Number(*f),
        (FieldKind::Bool, LiteralValue::Bool(b)) => Value::Bool(*b),
        (FieldKind::Time, LiteralValue::Text(s)) => {
            if let Some(rel) = RelativeTime::parse(s) {
                let rel = rel.owe(CoreReason::Config)?;
                if rel.resolve(DateTime::UNIX_EPOCH).is_none() {
                    return config_err(format!(
                        "relative literal {s:?} on {:?} is out of range",
                        field.as_str()
                    ));
                }
                return Ok(Operand::Relative(rel));
            }
            match parse_time(s) {
                Some(t) => Value::Time(t),
                None => return mismatch(),
            }
        }
        (FieldKind::Time, LiteralValue::Integer(secs)) => match Utc.timestamp_opt(*secs, 0) {
            chrono::LocalResult::Single(t) => Value::Time(t),
            _ => return mismatch(),
        },
        (FieldKind::List, LiteralValue::List(items)) => Value::List(
            items
                .iter()
                .map(|i| coerce_scalar(i, field))
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        _ => return mismatch(),
    };
    Ok(Operand::Literal(value))
}

/// Untyped coercion for list elements, whose element type the schema does not
/// declare.
fn coerce_scalar(lit: &LiteralValue, field: &FieldPath) -> CoreResult<Value> {
    match lit {
        LiteralValue::Bool(b) => Ok(Value::Bool(*b)),
        LiteralValue::Integer(i) => Ok(Value::Number(*i as f64)),
        LiteralValue::Float(f) => Ok(Value::Number(*f)),
        LiteralValue::Text(s) => Ok(Value::Str(s.clone())),
        LiteralValue::List(_) => config_err(format!(
            "nested list literal on {:?} is not supported",
            field.as_str()
        )),
    }
}

// ---------------------------------------------------------------------------
// CompiledPredicate / BoundPredicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Operand {
    Literal(Value),
    Relative(RelativeTime),
    Set(Vec<Operand>),
    Pattern(Regex),
    Flag(bool),
}

impl Operand {
    fn is_relative(&self) -> bool {
        match self {
            Operand::Relative(_) => true,
            Operand::Set(items) => items.iter().any(Operand::is_relative),
            _ => false,
        }
    }

    fn bind(&self, at: DateTime<Utc>) -> Option<BoundOperand> {
        let bound = match self {
            Operand::Literal(v) => BoundOperand::Value(v.clone()),
            Operand::Relative(rel) => BoundOperand::Value(Value::Time(rel.resolve(at)?)),
            Operand::Set(items) => BoundOperand::Set(
                items
                    .iter()
                    .map(|item| {
                        item.bind(at).map(|b| match b {
                            BoundOperand::Value(v) => v,
                            _ => Value::Null,
                        })
                    })
                    .collect::<Option<Vec<_>>>()?,
            ),
            Operand::Pattern(re) => BoundOperand::Pattern(re.clone()),
            Operand::Flag(b) => BoundOperand::Flag(*b),
        };
        Some(bound)
    }
}

/// A predicate resolved against a schema. Relative literals are still open;
/// [`bind`](Self::bind) fixes them to one evaluation moment.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    pub field: String,
    pub kind: FieldKind,
    pub lookup: Lookup,
    pub operand: Operand,
    pub negate: bool,
}

impl CompiledPredicate {
    /// Fails when a relative literal resolved at `at` leaves the
    /// representable time range.
    pub fn bind(&self, at: DateTime<Utc>) -> CoreResult<BoundPredicate> {
        let Some(operand) = self.operand.bind(at) else {
            return config_err(format!(
                "relative literal on {:?} overflows at {}",
                self.field,
                at.to_rfc3339()
            ));
        };
        Ok(BoundPredicate {
            field: self.field.clone(),
            lookup: self.lookup,
            operand,
            negate: self.negate,
        })
    }
}

#[derive(Debug, Clone)]
pub enum BoundOperand {
    Value(Value),
    Set(Vec<Value>),
    Pattern(Regex),
    Flag(bool),
}

/// A fully concrete predicate, part of a runnable [`SubjectQuery`](crate::store::SubjectQuery).
#[derive(Debug, Clone)]
pub struct BoundPredicate {
    pub field: String,
    pub lookup: Lookup,
    pub operand: BoundOperand,
    pub negate: bool,
}

impl BoundPredicate {
    pub fn matches(&self, record: &Record) -> bool {
        let value = record.get(&self.field).unwrap_or(&Value::Null);
        let hit = eval_lookup(self.lookup, value, &self.operand);
        hit != self.negate
    }
}

fn eval_lookup(lookup: Lookup, value: &Value, operand: &BoundOperand) -> bool {
    use std::cmp::Ordering::*;

    match (lookup, operand) {
        (Lookup::IsNull, BoundOperand::Flag(want)) => value.is_null() == *want,
        (Lookup::In, BoundOperand::Set(items)) => items.iter().any(|item| item == value),
        (Lookup::Regex | Lookup::IRegex, BoundOperand::Pattern(re)) => match value {
            Value::Str(s) => re.is_match(s),
            _ => false,
        },
        (_, BoundOperand::Value(rhs)) => match lookup {
            Lookup::Eq => value == rhs,
            Lookup::Gt => value.partial_order(rhs) == Some(Greater),
            Lookup::Gte => matches!(value.partial_order(rhs), Some(Greater | Equal)),
            Lookup::Lt => value.partial_order(rhs) == Some(Less),
            Lookup::Lte => matches!(value.partial_order(rhs), Some(Less | Equal)),
            Lookup::Contains => match (value, rhs) {
                (Value::Str(s), Value::Str(needle)) => s.contains(needle.as_str()),
                (Value::List(items), needle) => items.contains(needle),
                _ => false,
            },
            _ => match (value, rhs) {
                (Value::Str(s), Value::Str(t)) => eval_text(lookup, s, t),
                _ => false,
            },
        },
        _ => false,
    }
}

fn eval_text(lookup: Lookup, s: &str, t: &str) -> bool {
    match lookup {
        Lookup::StartsWith => s.starts_with(t),
        Lookup::EndsWith => s.ends_with(t),
        _ => {
            let (s, t) = (s.to_lowercase(), t.to_lowercase());
            match lookup {
                Lookup::IExact => s == t,
                Lookup::IContains => s.contains(&t),
                Lookup::IStartsWith => s.starts_with(&t),
                Lookup::IEndsWith => s.ends_with(&t),
                _ => false,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
