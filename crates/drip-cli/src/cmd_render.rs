use std::path::PathBuf;

use anyhow::Result;
use drip_core::SubjectId;

use crate::cmd_helpers::load;

pub async fn run(config: PathBuf, rule: String, subject: String) -> Result<()> {
    let loaded = load(&config).await?;
    let message = loaded
        .campaign
        .render(&rule, &SubjectId::new(subject))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if let Some(from) = &message.from {
        println!("From: {from}");
    }
    println!("Subject: {}", message.subject);
    println!("Content-Type: {}", message.mime_type);
    println!();
    println!("{}", String::from_utf8_lossy(&message.content));
    Ok(())
}
