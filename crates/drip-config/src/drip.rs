use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::types::{HumanDuration, SignedDuration};

// ---------------------------------------------------------------------------
// DripConfig: one [[drip]] table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DripConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Field holding the qualifying event time (e.g. `"date_joined"`).
    pub event_time_field: String,
    /// How long after the event the message is due (`"3d"`, `"-1h"`).
    pub base_offset: SignedDuration,
    /// Field identifying the subject (e.g. `"user_id"`).
    pub subject_field: String,
    /// Message producer registry key.
    #[serde(default = "default_message_kind")]
    pub message_kind: String,
    /// Subject store registry key.
    #[serde(default = "default_store")]
    pub store: String,
    /// Allow another send once this long has passed since the last one.
    /// Absent means at most once per subject, ever.
    #[serde(default)]
    pub repeat_after: Option<HumanDuration>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub subject_template: String,
    #[serde(default)]
    pub body_template: String,
    #[serde(default, rename = "predicate")]
    pub predicates: Vec<PredicateConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_message_kind() -> String {
    "text".to_string()
}

fn default_store() -> String {
    "default".to_string()
}

/// One `[[drip.predicate]]` entry: `field <lookup> value`, optionally negated.
#[derive(Debug, Clone, Deserialize)]
pub struct PredicateConfig {
    pub field: String,
    pub lookup: String,
    #[serde(default)]
    pub value: Option<LiteralValue>,
    #[serde(default)]
    pub negate: bool,
}

/// A literal as written in TOML. Typing against the store schema happens
/// when the rule is compiled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<LiteralValue>),
}

// ---------------------------------------------------------------------------
// Loading rule files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DripFile {
    #[serde(default)]
    drip: Vec<DripConfig>,
}

/// Parse the `[[drip]]` tables of a single TOML document.
pub fn parse_drips(toml_str: &str) -> anyhow::Result<Vec<DripConfig>> {
    let file: DripFile = toml::from_str(toml_str)?;
    Ok(file.drip)
}

/// Load every drip defined in files matching `pattern` (relative to
/// `base_dir`). Files are read in sorted path order so rule ordering is
/// deterministic.
pub fn load_drips(pattern: &str, base_dir: &Path) -> anyhow::Result<Vec<DripConfig>> {
    let mut drips = Vec::new();
    for path in resolve_pattern(pattern, base_dir)? {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut parsed = parse_drips(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        drips.append(&mut parsed);
    }
    Ok(drips)
}

/// Glob patterns expand (possibly to nothing); a literal path must exist.
/// A directory the glob cannot read is an error, not an empty match.
fn resolve_pattern(pattern: &str, base_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let full = base_dir.join(pattern);
    if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
        let mut entries = glob::glob(&full.to_string_lossy())?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("expanding drip pattern {pattern:?}"))?;
        entries.sort();
        Ok(entries)
    } else if full.exists() {
        Ok(vec![full])
    } else {
        anyhow::bail!("drip file not found: {}", full.display());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WELCOME: &str = r#"
[[drip]]
name = "welcome_day_3"
event_time_field = "date_joined"
base_offset = "3d"
subject_field = "id"
subject_template = "Hi {{first_name}}"
body_template = "Welcome aboard."

[[drip.predicate]]
field = "plan"
lookup = "eq"
value = "free"

[[drip.predicate]]
field = "email"
lookup = "endswith"
value = "@example.com"
negate = true
"#;

    #[test]
    fn parse_defaults_and_predicates() {
        let drips = parse_drips(WELCOME).unwrap();
        assert_eq!(drips.len(), 1);
        let d = &drips[0];
        assert!(d.enabled);
        assert_eq!(d.message_kind, "text");
        assert_eq!(d.store, "default");
        assert!(d.repeat_after.is_none());
        assert_eq!(d.base_offset.as_secs(), 3 * 86400);
        assert_eq!(d.predicates.len(), 2);
        assert_eq!(
            d.predicates[0].value,
            Some(LiteralValue::Text("free".into()))
        );
        assert!(!d.predicates[0].negate);
        assert!(d.predicates[1].negate);
    }

    #[test]
    fn literal_kinds() {
        let toml = r#"
[[drip]]
name = "x"
event_time_field = "t"
base_offset = "1d"
subject_field = "id"

[[drip.predicate]]
field = "a"
lookup = "gt"
value = 3

[[drip.predicate]]
field = "b"
lookup = "lt"
value = 2.5

[[drip.predicate]]
field = "c"
lookup = "eq"
value = true

[[drip.predicate]]
field = "d"
lookup = "in"
value = ["x", "y"]

[[drip.predicate]]
field = "e"
lookup = "isnull"
"#;
        let drips = parse_drips(toml).unwrap();
        let values: Vec<_> = drips[0].predicates.iter().map(|p| p.value.clone()).collect();
        assert_eq!(values[0], Some(LiteralValue::Integer(3)));
        assert_eq!(values[1], Some(LiteralValue::Float(2.5)));
        assert_eq!(values[2], Some(LiteralValue::Bool(true)));
        assert_eq!(
            values[3],
            Some(LiteralValue::List(vec![
                LiteralValue::Text("x".into()),
                LiteralValue::Text("y".into()),
            ]))
        );
        assert_eq!(values[4], None);
    }

    #[test]
    fn missing_required_field_fails() {
        let toml = r#"
[[drip]]
name = "x"
base_offset = "1d"
subject_field = "id"
"#;
        assert!(parse_drips(toml).is_err());
    }

    #[test]
    fn load_drips_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let drips_dir = dir.path().join("drips");
        std::fs::create_dir_all(&drips_dir).unwrap();
        std::fs::write(drips_dir.join("b.toml"), WELCOME.replace("welcome_day_3", "b")).unwrap();
        std::fs::write(drips_dir.join("a.toml"), WELCOME.replace("welcome_day_3", "a")).unwrap();

        let drips = load_drips("drips/*.toml", dir.path()).unwrap();
        let names: Vec<_> = drips.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[cfg(unix)]
    #[test]
    fn load_drips_unreadable_dir_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let open = dir.path().join("open");
        let locked = dir.path().join("locked");
        std::fs::create_dir_all(&open).unwrap();
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(open.join("a.toml"), WELCOME.replace("welcome_day_3", "a")).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind a privileged user.
        let readable = std::fs::read_dir(&locked).is_ok();
        let result = load_drips("*/*.toml", dir.path());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        if readable {
            return;
        }
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("*/*.toml"), "{err:#}");
    }

    #[test]
    fn load_drips_missing_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_drips("nope.toml", dir.path()).is_err());
    }
}
