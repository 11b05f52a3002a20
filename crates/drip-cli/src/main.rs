use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

mod cmd_fields;
mod cmd_helpers;
mod cmd_render;
mod cmd_run;
mod cmd_sent;
mod cmd_timeline;

#[derive(Parser)]
#[command(name = "drip", about = "Time-relative drip campaign engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every enabled drip and send what is due
    Run {
        /// Path to drip.toml config file
        #[arg(short, long)]
        config: PathBuf,

        /// Offsets to walk into the past (default: walk.into_past)
        #[arg(long)]
        past: Option<u32>,

        /// Offsets to walk into the future (default: walk.into_future)
        #[arg(long)]
        future: Option<u32>,

        /// Keep running every walk.interval until SIGINT/SIGTERM
        #[arg(long, conflicts_with = "now")]
        watch: bool,

        /// Evaluate as of this RFC 3339 instant instead of the current time
        #[arg(long, value_parser = cmd_helpers::parse_now)]
        now: Option<DateTime<Utc>>,
    },
    /// Preview which subjects a drip would reach at each offset, without sending
    Timeline {
        #[arg(short, long)]
        config: PathBuf,

        /// Drip name
        #[arg(long)]
        rule: String,

        #[arg(long, default_value_t = 0)]
        past: u32,

        #[arg(long, default_value_t = 0)]
        future: u32,

        #[arg(long, value_parser = cmd_helpers::parse_now)]
        now: Option<DateTime<Utc>>,
    },
    /// List the fields of the configured subject stores
    Fields {
        #[arg(short, long)]
        config: PathBuf,

        /// Only this store
        #[arg(long)]
        store: Option<String>,
    },
    /// Render a drip's message for one subject, without sending it
    Render {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        rule: String,

        /// Subject id as stored in the drip's subject field
        #[arg(long)]
        subject: String,
    },
    /// List recorded sends, newest first
    Sent {
        #[arg(short, long)]
        config: PathBuf,

        /// Only this drip
        #[arg(long)]
        rule: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            past,
            future,
            watch,
            now,
        } => cmd_run::run(config, past, future, watch, now).await,
        Commands::Timeline {
            config,
            rule,
            past,
            future,
            now,
        } => cmd_timeline::run(config, rule, past, future, now).await,
        Commands::Fields { config, store } => cmd_fields::run(config, store).await,
        Commands::Render {
            config,
            rule,
            subject,
        } => cmd_render::run(config, rule, subject).await,
        Commands::Sent { config, rule } => cmd_sent::run(config, rule).await,
    }
}
