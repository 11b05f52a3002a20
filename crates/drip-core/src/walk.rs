use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use orion_error::prelude::*;

use crate::error::{CoreReason, CoreResult};
use crate::rule::CompiledRule;
use crate::store::SubjectQuery;

// ---------------------------------------------------------------------------
// TimeBucket
// ---------------------------------------------------------------------------

/// Half-open interval `[lower, upper)` the event time must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

impl TimeBucket {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.lower <= t && t < self.upper
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lower.to_rfc3339(), self.upper.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// ShiftedRule
// ---------------------------------------------------------------------------

/// A rule evaluated as if "now" were `offset` units away from the real now.
///
/// At the shifted moment `t = now + offset * unit`, the subjects due are
/// those whose event happened in `[t - base_offset - unit, t - base_offset)`:
/// the event became `base_offset` old during the unit leading up to `t`.
#[derive(Debug, Clone)]
pub struct ShiftedRule {
    rule: Arc<CompiledRule>,
    offset: i64,
    shifted_now: DateTime<Utc>,
    bucket: TimeBucket,
}

impl ShiftedRule {
    fn at(
        rule: &Arc<CompiledRule>,
        offset: i64,
        now: DateTime<Utc>,
        unit: TimeDelta,
    ) -> Option<Self> {
        let steps = i32::try_from(offset).ok()?;
        let shifted_now = now.checked_add_signed(unit.checked_mul(steps)?)?;
        let upper = shifted_now.checked_sub_signed(rule.definition.base_offset)?;
        let lower = upper.checked_sub_signed(unit)?;
        Some(Self {
            rule: Arc::clone(rule),
            offset,
            shifted_now,
            bucket: TimeBucket { lower, upper },
        })
    }

    pub fn rule(&self) -> &Arc<CompiledRule> {
        &self.rule
    }

    pub fn name(&self) -> &str {
        self.rule.name()
    }

    /// Δ, in units, relative to the real now.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The moment this instance pretends is "now"; relative literals bind to it.
    pub fn shifted_now(&self) -> DateTime<Utc> {
        self.shifted_now
    }

    pub fn bucket(&self) -> TimeBucket {
        self.bucket
    }

    pub fn effective_time_lower(&self) -> DateTime<Utc> {
        self.bucket.lower
    }

    pub fn effective_time_upper(&self) -> DateTime<Utc> {
        self.bucket.upper
    }

    /// The concrete query: bucket constraint AND every predicate, bound to
    /// [`shifted_now`](Self::shifted_now).
    pub fn query(&self) -> CoreResult<SubjectQuery> {
        let def = &self.rule.definition;
        Ok(SubjectQuery {
            rule: def.name.clone(),
            event_time_field: def.event_time_field.as_str().to_string(),
            subject_field: def.subject_field.as_str().to_string(),
            bucket: self.bucket,
            predicates: self
                .rule
                .predicates
                .iter()
                .map(|p| p.bind(self.shifted_now))
                .collect::<CoreResult<Vec<_>>>()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// Lazy, restartable sequence of [`ShiftedRule`]s for offsets
/// `-into_past ..= into_future`, most-past first. Cloning a walker restarts
/// nothing; it copies the cursor.
#[derive(Debug, Clone)]
pub struct Walker {
    rule: Arc<CompiledRule>,
    now: DateTime<Utc>,
    unit: TimeDelta,
    front: i64,
    back: i64,
}

/// Build the walk of `rule` around `now`. Disabled rules, a non-positive
/// `unit` and windows that leave the representable time range are refused
/// up front.
pub fn walk(
    rule: Arc<CompiledRule>,
    into_past: u32,
    into_future: u32,
    now: DateTime<Utc>,
    unit: TimeDelta,
) -> CoreResult<Walker> {
    rule.ensure_enabled()?;
    if unit <= TimeDelta::zero() {
        return StructError::from(CoreReason::Config)
            .with_detail(format!("walk unit must be positive, got {unit}"))
            .err();
    }

    let front = -i64::from(into_past);
    let back = i64::from(into_future);
    for edge in [front, back] {
        if ShiftedRule::at(&rule, edge, now, unit).is_none() {
            return StructError::from(CoreReason::Config)
                .with_detail(format!(
                    "drip {:?}: offset {edge} leaves the representable time range",
                    rule.name()
                ))
                .err();
        }
    }

    Ok(Walker {
        rule,
        now,
        unit,
        front,
        back,
    })
}

impl Walker {
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn unit(&self) -> TimeDelta {
        self.unit
    }
}

impl Iterator for Walker {
    type Item = ShiftedRule;

    fn next(&mut self) -> Option<ShiftedRule> {
        if self.front > self.back {
            return None;
        }
        let shifted = ShiftedRule::at(&self.rule, self.front, self.now, self.unit)?;
        self.front += 1;
        Some(shifted)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.back - self.front + 1).unwrap_or(0);
        (n, Some(n))
    }
}

impl DoubleEndedIterator for Walker {
    fn next_back(&mut self) -> Option<ShiftedRule> {
        if self.front > self.back {
            return None;
        }
        let shifted = ShiftedRule::at(&self.rule, self.back, self.now, self.unit)?;
        self.back -= 1;
        Some(shifted)
    }
}

impl ExactSizeIterator for Walker {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
