use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cirrus_log::{LogEntry, LogManager, LogQuery};

/// Inspect the cirrus audit log.
#[derive(Parser, Debug)]
#[command(name = "cirrus-log", version, about, long_about = None)]
struct Args {
    /// Directory holding audit.redb
    #[arg(short, long, default_value = "/var/lib/cirrus/log")]
    data_dir: PathBuf,

    /// Print entries as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query entries by object and/or correlation id
    Query {
        /// Related object id (region, zone, host, guest, ...)
        #[arg(long)]
        object: Option<String>,

        /// Correlation id, e.g. a sync job id
        #[arg(long)]
        correlation: Option<String>,

        /// Only entries at or after this time (ns since epoch)
        #[arg(long)]
        since_ns: Option<i64>,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Show the most recent entries
    Tail {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cirrus_log=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!("Opening log storage at {:?}", args.data_dir);
    let manager = LogManager::new(&args.data_dir)
        .with_context(|| format!("Failed to open audit log in {}", args.data_dir.display()))?;

    let entries = match args.command {
        Command::Query {
            object,
            correlation,
            since_ns,
            limit,
        } => manager.query(&LogQuery {
            object_id: object.filter(|o| !o.is_empty()),
            correlation_id: correlation.filter(|c| !c.is_empty()),
            start_ns: since_ns,
            end_ns: None,
            limit,
        })?,
        Command::Tail { limit } => manager.tail(limit)?,
    };

    for entry in &entries {
        if args.json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("{}", format_entry(entry));
        }
    }

    Ok(())
}

fn format_entry(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {:<5} [{}] {}",
        entry.id,
        entry.level.as_str(),
        entry.component,
        entry.message
    );
    if let Some(action) = &entry.action {
        let outcome = match entry.success {
            Some(true) => "ok",
            Some(false) => "failed",
            None => "-",
        };
        line.push_str(&format!(" action={action}({outcome})"));
    }
    if let Some(corr) = &entry.correlation_id {
        line.push_str(&format!(" job={corr}"));
    }
    if !entry.related_object_ids.is_empty() {
        line.push_str(&format!(" objects={}", entry.related_object_ids.join(",")));
    }
    line
}
