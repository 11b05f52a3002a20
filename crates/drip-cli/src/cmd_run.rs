use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use drip_runtime::RunReport;
use drip_runtime::signal::wait_for_signal;
use tokio_util::sync::CancellationToken;

use crate::cmd_helpers::{BOLD, DIM, GREEN, RED, RESET, load};

pub async fn run(
    config: PathBuf,
    past: Option<u32>,
    future: Option<u32>,
    watch: bool,
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let loaded = load(&config).await?;
    let walk = &loaded.config.walk;
    let past = past.unwrap_or(walk.into_past);
    let future = future.unwrap_or(walk.into_future);

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(wait_for_signal(cancel.clone()));

    if watch {
        let settings = *loaded.campaign.settings();
        if past != settings.into_past || future != settings.into_future {
            tracing::warn!(
                domain = "sys",
                "--past/--future are ignored with --watch, walk.into_past/into_future apply"
            );
        }
        loaded.campaign.watch(settings.interval, cancel.clone()).await;
        signals.abort();
        return Ok(());
    }

    let report = loaded
        .campaign
        .run_once(now.unwrap_or_else(Utc::now), past, future, &cancel)
        .await;
    cancel.cancel();
    let _ = signals.await;

    print_report(&report, std::io::stdout().is_terminal());
    if !report.is_clean() {
        anyhow::bail!(
            "{} drip(s) failed, {} subject(s) not sent",
            report.failures.len(),
            report.failed_subjects()
        );
    }
    Ok(())
}

fn print_report(report: &RunReport, color: bool) {
    let (bold, green, red, dim, reset) = if color {
        (BOLD, GREEN, RED, DIM, RESET)
    } else {
        ("", "", "", "", "")
    };

    println!("{bold}Run at{reset} {}", report.now.to_rfc3339());
    for run in &report.rules {
        println!("  {green}{}{reset}", run.rule);
        for o in &run.offsets {
            println!(
                "    Δ={:+} {dim}{}{reset}  matched={} sent={} already_sent={} in_flight={} failed={}",
                o.offset,
                o.bucket,
                o.matched,
                o.send.sent.len(),
                o.send.already_sent.len(),
                o.send.in_flight.len(),
                o.send.failed.len(),
            );
            for f in &o.send.failed {
                println!("      {red}failed{reset} {} at {}: {}", f.subject, f.stage, f.error);
            }
        }
        if run.cancelled {
            println!("    {dim}cancelled{reset}");
        }
    }
    for f in &report.failures {
        println!("  {red}{}{reset} failed: {}", f.rule, f.error);
    }
    for name in &report.disabled {
        println!("  {dim}{name} (disabled){reset}");
    }
    println!("{bold}Sent{reset} {}", report.sent());
}
