use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use drip_config::DripConfig;
use orion_error::prelude::*;
use orion_error::ErrorOweBase;

use crate::error::{CoreReason, CoreResult};
use crate::predicate::{CompiledPredicate, Predicate};
use crate::schema::{FieldKind, FieldPath, Schema};

// ---------------------------------------------------------------------------
// RepeatPolicy
// ---------------------------------------------------------------------------

/// How often one subject may receive a drip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatPolicy {
    /// At most once per subject, ever.
    #[default]
    Once,
    /// Again once this long has passed since the previous send.
    After(Duration),
}

impl RepeatPolicy {
    /// Lower bound for ledger lookups: only records at or after it count.
    /// `None` means every record counts.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RepeatPolicy::Once => None,
            RepeatPolicy::After(d) => Some(
                TimeDelta::from_std(*d)
                    .ok()
                    .and_then(|delta| now.checked_sub_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTemplate {
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// RuleDefinition
// ---------------------------------------------------------------------------

/// A named drip: which subjects qualify, relative to when their event
/// happened, and how the message is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub name: String,
    pub enabled: bool,
    pub event_time_field: FieldPath,
    /// Signed distance between the event and the moment the drip is due.
    pub base_offset: TimeDelta,
    pub subject_field: FieldPath,
    /// ANDed in order.
    pub predicates: Vec<Predicate>,
    /// Message producer registry key.
    pub message_kind: String,
    /// Subject store registry key.
    pub store: String,
    pub repeat: RepeatPolicy,
    pub template: MessageTemplate,
}

impl RuleDefinition {
    pub fn new(
        name: &str,
        event_time_field: &str,
        base_offset: TimeDelta,
        subject_field: &str,
    ) -> CoreResult<Self> {
        Ok(Self {
            name: name.to_string(),
            enabled: true,
            event_time_field: event_time_field.parse().owe(CoreReason::Config)?,
            base_offset,
            subject_field: subject_field.parse().owe(CoreReason::Config)?,
            predicates: Vec::new(),
            message_kind: "text".to_string(),
            store: "default".to_string(),
            repeat: RepeatPolicy::Once,
            template: MessageTemplate::default(),
        })
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn from_config(cfg: &DripConfig) -> CoreResult<Self> {
        let predicates = cfg
            .predicates
            .iter()
            .map(Predicate::from_config)
            .collect::<CoreResult<Vec<_>>>()
            .map_err(|e| e.with_detail(format!("drip {:?}", cfg.name)))?;

        Ok(Self {
            name: cfg.name.clone(),
            enabled: cfg.enabled,
            event_time_field: cfg.event_time_field.parse().owe(CoreReason::Config)?,
            base_offset: cfg.base_offset.as_time_delta(),
            subject_field: cfg.subject_field.parse().owe(CoreReason::Config)?,
            predicates,
            message_kind: cfg.message_kind.clone(),
            store: cfg.store.clone(),
            repeat: match cfg.repeat_after {
                Some(d) => RepeatPolicy::After(d.as_duration()),
                None => RepeatPolicy::Once,
            },
            template: MessageTemplate {
                from: cfg.from.clone(),
                subject: cfg.subject_template.clone(),
                body: cfg.body_template.clone(),
            },
        })
    }

    /// Resolve every field against `schema` so evaluation never meets an
    /// unknown field. Disabled rules compile too; they are refused when
    /// walked.
    pub fn compile(&self, schema: &Schema) -> CoreResult<CompiledRule> {
        let event_kind = schema.resolve(&self.event_time_field)?;
        if event_kind != FieldKind::Time {
            return StructError::from(CoreReason::Config)
                .with_detail(format!(
                    "drip {:?}: event_time_field {:?} is {}, expected time",
                    self.name, self.event_time_field.as_str(), event_kind
                ))
                .err();
        }

        let subject_kind = schema.resolve(&self.subject_field)?;
        if subject_kind == FieldKind::List {
            return StructError::from(CoreReason::Config)
                .with_detail(format!(
                    "drip {:?}: subject_field {:?} cannot be a list",
                    self.name,
                    self.subject_field.as_str()
                ))
                .err();
        }

        let predicates = self
            .predicates
            .iter()
            .map(|p| p.compile(schema))
            .collect::<CoreResult<Vec<_>>>()
            .map_err(|e| e.with_detail(format!("drip {:?}", self.name)))?;

        Ok(CompiledRule {
            definition: self.clone(),
            predicates,
        })
    }
}

// ---------------------------------------------------------------------------
// CompiledRule
// ---------------------------------------------------------------------------

/// A [`RuleDefinition`] whose fields have been resolved against its store's
/// schema. Walking starts from here.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub definition: RuleDefinition,
    pub predicates: Vec<CompiledPredicate>,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_enabled(&self) -> bool {
        self.definition.enabled
    }

    /// Refuse disabled rules before anything touches a store.
    pub fn ensure_enabled(&self) -> CoreResult<()> {
        if self.definition.enabled {
            Ok(())
        } else {
            StructError::from(CoreReason::DisabledRule)
                .with_detail(format!("drip {:?} is disabled", self.definition.name))
                .err()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Lookup;
    use chrono::TimeZone;
    use drip_config::LiteralValue;

    fn schema() -> Schema {
        Schema::new([
            ("id".to_string(), FieldKind::Number),
            ("plan".to_string(), FieldKind::String),
            ("date_joined".to_string(), FieldKind::Time),
            ("tags".to_string(), FieldKind::List),
        ])
    }

    #[test]
    fn from_config_maps_every_field() {
        let drips = drip_config::drip::parse_drips(
            r#"
[[drip]]
name = "nudge"
enabled = false
event_time_field = "date_joined"
base_offset = "-2h"
subject_field = "id"
message_kind = "html"
repeat_after = "30d"
from = "team@example.com"
subject_template = "Hi"
body_template = "<p>Hello</p>"

[[drip.predicate]]
field = "plan"
lookup = "exact"
value = "free"
negate = true
"#,
        )
        .unwrap();
        let rule = RuleDefinition::from_config(&drips[0]).unwrap();
        assert!(!rule.enabled);
        assert_eq!(rule.base_offset, TimeDelta::hours(-2));
        assert_eq!(rule.message_kind, "html");
        assert_eq!(rule.repeat, RepeatPolicy::After(Duration::from_secs(30 * 86400)));
        assert_eq!(rule.template.from.as_deref(), Some("team@example.com"));
        assert_eq!(rule.predicates.len(), 1);
        assert_eq!(rule.predicates[0].lookup, Lookup::Eq);
        assert!(rule.predicates[0].negate);
    }

    #[test]
    fn from_config_rejects_unknown_lookup() {
        let drips = drip_config::drip::parse_drips(
            r#"
[[drip]]
name = "bad"
event_time_field = "date_joined"
base_offset = "1d"
subject_field = "id"

[[drip.predicate]]
field = "plan"
lookup = "between"
value = "a"
"#,
        )
        .unwrap();
        assert!(RuleDefinition::from_config(&drips[0]).is_err());
    }

    #[test]
    fn compile_checks_event_time_kind() {
        let rule = RuleDefinition::new("r", "plan", TimeDelta::days(1), "id").unwrap();
        assert!(rule.compile(&schema()).is_err());
    }

    #[test]
    fn compile_rejects_list_subject_field() {
        let rule = RuleDefinition::new("r", "date_joined", TimeDelta::days(1), "tags").unwrap();
        assert!(rule.compile(&schema()).is_err());
    }

    #[test]
    fn compile_fails_fast_on_unresolved_predicate_field() {
        let rule = RuleDefinition::new("r", "date_joined", TimeDelta::days(1), "id")
            .unwrap()
            .with_predicate(
                Predicate::new("plan", Lookup::Eq, LiteralValue::Text("free".into())).unwrap(),
            )
            .with_predicate(
                Predicate::new("country", Lookup::Eq, LiteralValue::Text("NO".into())).unwrap(),
            );
        assert!(rule.compile(&schema()).is_err());
    }

    #[test]
    fn disabled_rule_compiles_but_is_not_enabled() {
        let mut rule = RuleDefinition::new("r", "date_joined", TimeDelta::days(1), "id").unwrap();
        rule.enabled = false;
        let compiled = rule.compile(&schema()).unwrap();
        assert!(compiled.ensure_enabled().is_err());
    }

    #[test]
    fn repeat_policy_since() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(RepeatPolicy::Once.since(now), None);
        assert_eq!(
            RepeatPolicy::After(Duration::from_secs(86400)).since(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap())
        );
    }
}
