use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::drip::{DripConfig, load_drips};
use crate::logging::LoggingConfig;
use crate::runtime::RuntimeConfig;
use crate::store::StoreConfig;
use crate::validate;
use crate::walk::WalkConfig;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CampaignConfigRaw {
    runtime: RuntimeConfig,
    #[serde(default)]
    walk: WalkConfig,
    #[serde(default)]
    store: BTreeMap<String, StoreConfig>,
    #[serde(default)]
    ledger: LedgerConfig,
    #[serde(default)]
    outbox: OutboxConfig,
    #[serde(default)]
    logging: LoggingConfig,
    /// Variables available to message templates as `{{NAME}}`.
    #[serde(default)]
    vars: HashMap<String, String>,
    /// Drips declared inline, in addition to `runtime.drips` files.
    #[serde(default)]
    drip: Vec<DripConfig>,
}

/// `[ledger]`: where send records are persisted. No path keeps them in memory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    pub path: Option<PathBuf>,
}

/// `[outbox]`: the built-in delivery channel. No path means a dry run that
/// keeps rendered messages in memory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutboxConfig {
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CampaignConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub runtime: RuntimeConfig,
    pub walk: WalkConfig,
    pub stores: BTreeMap<String, StoreConfig>,
    pub ledger: LedgerConfig,
    pub outbox: OutboxConfig,
    pub logging: LoggingConfig,
    pub vars: HashMap<String, String>,
    /// Inline drips first, then drips from `runtime.drips` files.
    pub drips: Vec<DripConfig>,
}

impl CampaignConfig {
    /// Read `drip.toml`, pull in the rule files named by `runtime.drips`
    /// (resolved against the config file's directory), and validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_raw(toml::from_str(&content)?, Some(base_dir))
    }

    fn from_raw(raw: CampaignConfigRaw, base_dir: Option<&Path>) -> anyhow::Result<Self> {
        let mut drips = raw.drip;
        if let (Some(pattern), Some(dir)) = (raw.runtime.drips.as_deref(), base_dir) {
            drips.append(&mut load_drips(pattern, dir)?);
        }

        let config = CampaignConfig {
            runtime: raw.runtime,
            walk: raw.walk,
            stores: raw.store,
            ledger: raw.ledger,
            outbox: raw.outbox,
            logging: raw.logging,
            vars: raw.vars,
            drips,
        };

        validate::validate(&config)?;

        Ok(config)
    }

    pub fn drip(&self, name: &str) -> Option<&DripConfig> {
        self.drips.iter().find(|d| d.name == name)
    }
}

impl FromStr for CampaignConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a validated [`CampaignConfig`]. Only inline
    /// `[[drip]]` tables are considered; `runtime.drips` needs a base
    /// directory and is honoured by [`CampaignConfig::load`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        Self::from_raw(toml::from_str(toml_str)?, None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FULL_TOML: &str = r#"
[runtime]
eval_parallelism = 4
query_timeout = "30s"

[walk]
unit = "1d"
into_past = 2
into_future = 1

[store.default]
path = "users.jsonl"
fields = { id = "number", email = "string", date_joined = "time" }

[ledger]
path = "sent.jsonl"

[outbox]
path = "outbox.jsonl"

[vars]
SITE = "example.com"

[[drip]]
name = "welcome"
event_time_field = "date_joined"
base_offset = "3d"
subject_field = "id"
"#;

    #[test]
    fn load_full_toml() {
        let cfg: CampaignConfig = FULL_TOML.parse().unwrap();

        assert_eq!(cfg.runtime.eval_parallelism, 4);
        assert_eq!(
            cfg.runtime.query_timeout.as_duration(),
            Duration::from_secs(30)
        );
        assert_eq!(cfg.walk.unit.as_duration(), Duration::from_secs(86400));
        assert_eq!(cfg.walk.into_past, 2);
        assert_eq!(cfg.walk.into_future, 1);
        assert_eq!(cfg.stores["default"].fields["date_joined"], "time");
        assert_eq!(cfg.ledger.path, Some(PathBuf::from("sent.jsonl")));
        assert_eq!(cfg.outbox.path, Some(PathBuf::from("outbox.jsonl")));
        assert_eq!(cfg.vars["SITE"], "example.com");
        assert_eq!(cfg.drips.len(), 1);
        assert!(cfg.drip("welcome").is_some());
        assert!(cfg.drip("missing").is_none());
    }

    #[test]
    fn walk_section_defaults() {
        let toml = FULL_TOML.replace("[walk]\nunit = \"1d\"\ninto_past = 2\ninto_future = 1\n", "");
        let cfg: CampaignConfig = toml.parse().unwrap();
        assert_eq!(cfg.walk.into_past, 0);
        assert_eq!(cfg.walk.into_future, 0);
        assert_eq!(cfg.walk.unit.as_duration(), Duration::from_secs(86400));
    }

    #[test]
    fn reject_zero_parallelism() {
        let toml = FULL_TOML.replace("eval_parallelism = 4", "eval_parallelism = 0");
        assert!(toml.parse::<CampaignConfig>().is_err());
    }

    #[test]
    fn reject_zero_unit() {
        let toml = FULL_TOML.replace("unit = \"1d\"", "unit = \"0s\"");
        assert!(toml.parse::<CampaignConfig>().is_err());
    }

    #[test]
    fn reject_duplicate_drip_names() {
        let toml = format!(
            r#"{FULL_TOML}
[[drip]]
name = "welcome"
event_time_field = "date_joined"
base_offset = "1d"
subject_field = "id"
"#
        );
        let err = toml.parse::<CampaignConfig>().unwrap_err();
        assert!(err.to_string().contains("welcome"), "{err}");
    }

    #[test]
    fn reject_unknown_store_reference() {
        let toml = format!(
            r#"{FULL_TOML}
[[drip]]
name = "orders"
event_time_field = "placed_at"
base_offset = "1d"
subject_field = "user_id"
store = "orders"
"#
        );
        let err = toml.parse::<CampaignConfig>().unwrap_err();
        assert!(err.to_string().contains("orders"), "{err}");
    }

    #[test]
    fn reject_invalid_var_name() {
        let toml = FULL_TOML.replace("SITE = ", "my-site = ");
        let err = toml.parse::<CampaignConfig>().unwrap_err();
        assert!(err.to_string().contains("my-site"), "{err}");
    }

    #[test]
    fn missing_runtime_fails() {
        let toml = FULL_TOML.replace("[runtime]\neval_parallelism = 4\nquery_timeout = \"30s\"\n", "");
        assert!(toml.parse::<CampaignConfig>().is_err());
    }

    #[test]
    fn load_merges_drip_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("drips")).unwrap();
        std::fs::write(
            dir.path().join("drips/nudge.toml"),
            r#"
[[drip]]
name = "nudge"
event_time_field = "date_joined"
base_offset = "7d"
subject_field = "id"
"#,
        )
        .unwrap();
        let main = FULL_TOML.replace(
            "query_timeout = \"30s\"",
            "query_timeout = \"30s\"\ndrips = \"drips/*.toml\"",
        );
        let path = dir.path().join("drip.toml");
        std::fs::write(&path, main).unwrap();

        let cfg = CampaignConfig::load(&path).unwrap();
        let names: Vec<_> = cfg.drips.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["welcome", "nudge"]);
    }
}
