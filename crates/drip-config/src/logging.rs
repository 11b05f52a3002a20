use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Logging configuration. Every field has a default, so `[logging]` may be
/// left out of `drip.toml` entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level filter (`"info"`, `"debug"`, ...).
    pub level: String,
    /// Per-module overrides, e.g. `{ "drip_runtime::campaign" = "debug" }`.
    pub modules: HashMap<String, String>,
    /// Optional log file. Relative paths resolve against the config file's
    /// directory.
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: HashMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    /// Render `level` plus module overrides as an `EnvFilter` directive string.
    pub fn directives(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        let mut directives = self.level.clone();
        for (module, level) in modules {
            directives.push(',');
            directives.push_str(module);
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_are_sorted_by_module() {
        let mut cfg = LoggingConfig::default();
        cfg.modules.insert("drip_core".into(), "debug".into());
        cfg.modules.insert("drip_config".into(), "warn".into());
        assert_eq!(cfg.directives(), "info,drip_config=warn,drip_core=debug");
    }
}
