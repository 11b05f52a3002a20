use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;

use crate::cmd_helpers::{BOLD, CYAN, RESET, load};

pub async fn run(config: PathBuf, store: Option<String>) -> Result<()> {
    let loaded = load(&config).await?;
    let stores = loaded
        .campaign
        .fields(store.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let color = std::io::stdout().is_terminal();
    for (key, fields) in &stores {
        if color {
            println!("{BOLD}{key}{RESET}");
        } else {
            println!("{key}");
        }
        let width = fields.keys().map(String::len).max().unwrap_or(0);
        for (name, kind) in fields {
            if color {
                println!("  {name:<width$}  {CYAN}{kind}{RESET}");
            } else {
                println!("  {name:<width$}  {kind}");
            }
        }
    }
    Ok(())
}
