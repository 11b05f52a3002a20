use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use drip_core::MatchSet;

use crate::cmd_helpers::{BOLD, CYAN, DIM, GREEN, RESET, load};

pub async fn run(
    config: PathBuf,
    rule: String,
    past: u32,
    future: u32,
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let loaded = load(&config).await?;
    let now = now.unwrap_or_else(Utc::now);
    let entries = loaded
        .campaign
        .timeline(&rule, past, future, now)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let color = std::io::stdout().is_terminal();
    let (bold, green, cyan, dim, reset) = if color {
        (BOLD, GREEN, CYAN, DIM, RESET)
    } else {
        ("", "", "", "", "")
    };

    println!("{bold}Drip:{reset} {green}{rule}{reset}  {dim}now={}{reset}", now.to_rfc3339());
    for entry in &entries {
        let will_send = entry.will_send();
        println!(
            "  {cyan}Δ={:+}{reset} {}  {dim}matched={} new={} already_sent={}{reset}",
            entry.shifted.offset(),
            entry.shifted.bucket(),
            entry.matched.len(),
            entry.fresh.len(),
            entry.already_sent.len(),
        );
        if !will_send.is_empty() {
            println!("    would send: {}", join(&will_send));
        }
        if !entry.already_sent.is_empty() {
            println!("    {dim}already sent: {}{reset}", join(&entry.already_sent));
        }
    }
    Ok(())
}

fn join(set: &MatchSet) -> String {
    set.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}
