use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use drip_core::send::SendRecord;

use crate::cmd_helpers::{CYAN, DIM, RESET, load};

pub async fn run(config: PathBuf, rule: Option<String>) -> Result<()> {
    let loaded = load(&config).await?;
    let records = loaded
        .campaign
        .sent_records(rule.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let color = std::io::stdout().is_terminal();
    if records.is_empty() {
        println!("no sends recorded");
        return Ok(());
    }
    for line in format_records(&records, color) {
        println!("{line}");
    }
    Ok(())
}

fn format_records(records: &[SendRecord], color: bool) -> Vec<String> {
    let (cyan, dim, reset) = if color { (CYAN, DIM, RESET) } else { ("", "", "") };
    let width = records.iter().map(|r| r.rule.len()).max().unwrap_or(0);
    records
        .iter()
        .map(|r| {
            format!(
                "{dim}{}{reset}  {cyan}{:<width$}{reset}  {}",
                r.sent_at.to_rfc3339(),
                r.rule,
                r.subject
            )
        })
        .collect()
}
