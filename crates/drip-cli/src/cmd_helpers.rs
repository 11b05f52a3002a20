use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use drip_config::CampaignConfig;
use drip_runtime::Campaign;
use drip_runtime::tracing_init::init_tracing;
use tracing_appender::non_blocking::WorkerGuard;

pub(crate) const BOLD: &str = "\x1b[1m";
pub(crate) const GREEN: &str = "\x1b[1;32m";
pub(crate) const RED: &str = "\x1b[1;31m";
pub(crate) const CYAN: &str = "\x1b[36m";
pub(crate) const DIM: &str = "\x1b[2m";
pub(crate) const RESET: &str = "\x1b[0m";

/// A loaded campaign plus the log writer guard that must outlive it.
pub(crate) struct Loaded {
    pub config: CampaignConfig,
    pub campaign: Campaign,
    _guard: Option<WorkerGuard>,
}

/// Load `drip.toml`, install logging and bootstrap the campaign. Relative
/// paths in the config resolve against its directory.
pub(crate) async fn load(config: &Path) -> anyhow::Result<Loaded> {
    let config_path = config
        .canonicalize()
        .with_context(|| format!("config path '{}'", config.display()))?;
    let campaign_config = CampaignConfig::load(&config_path)?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let guard = init_tracing(&campaign_config.logging, &base_dir)?;
    let campaign = drip_runtime::bootstrap(&campaign_config, &base_dir)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(Loaded {
        config: campaign_config,
        campaign,
        _guard: guard,
    })
}

pub(crate) fn parse_now(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}
