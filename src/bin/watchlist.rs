#![forbid(unsafe_code)]

//! Command-line access to the local watch state: the same continue-watching
//! and watch-later documents the browsing views read, kept under the state
//! directory.

use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use reelfront::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    logging::init_tracing,
    media::normalize_single,
    sync::{ChangeOrigin, StateChange, WatchKey, spawn_foreign_poller},
    upstream::{UpstreamClient, UpstreamConfig},
    watch_state::{FileStore, WatchProgressRecord, WatchStateStore},
};
use tokio::{signal, sync::broadcast::error::RecvError};

#[derive(Debug, Parser)]
#[command(name = "watchlist", about = "Inspect and edit local watch state")]
struct Cli {
    /// Directory holding the watch-state documents (overrides REELFRONT_STATE_DIR).
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,
    /// Alternate `.env` file to read settings from.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List continue-watching entries, most recent first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Fetch a video and record how far it was watched.
    Record {
        id: u64,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        progress: u8,
    },
    /// Drop one entry from continue watching.
    Remove { id: u64 },
    /// Drop every continue-watching entry.
    Clear,
    /// Toggle a video on the watch-later list.
    Later { id: u64 },
    /// Print the watch-later ids.
    LaterList,
    /// Print changes as they happen, including writes from other processes.
    Follow {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();
    let settings = resolve_runtime_settings(RuntimeOverrides {
        state_dir: cli.state_dir,
        env_path: cli.env_file,
        ..RuntimeOverrides::default()
    })?;
    let store = WatchStateStore::new(Arc::new(FileStore::new(&settings.state_dir)));

    let mut stdout = std::io::stdout();
    match cli.command {
        Command::Follow { interval_ms } => follow(&store, interval_ms, &mut stdout).await,
        command => execute(command, &store, &settings, &mut stdout).await,
    }
}

async fn execute(
    command: Command,
    store: &WatchStateStore,
    settings: &RuntimeSettings,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::List { json } => {
            let records = store.continue_watching_recent();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            } else if records.is_empty() {
                writeln!(out, "Nothing to continue watching.")?;
            } else {
                for record in &records {
                    writeln!(out, "{}", describe_record(record))?;
                }
            }
        }
        Command::Record { id, progress } => {
            let client = UpstreamClient::new(UpstreamConfig::from_settings(settings)?);
            let payload = tokio::task::spawn_blocking(move || client.fetch_video(id))
                .await
                .context("upstream task aborted")?
                .with_context(|| format!("fetching video {id}"))?;
            let item = normalize_single(&payload).ok_or_else(|| anyhow!("video {id} not found"))?;
            let record = store.record_progress(&item, progress)?;
            writeln!(out, "Recorded {}", describe_record(&record))?;
        }
        Command::Remove { id } => {
            if store.remove_from_continue_watching(id)? {
                writeln!(out, "Removed {id}")?;
            } else {
                writeln!(out, "{id} was not in continue watching")?;
            }
        }
        Command::Clear => {
            store.clear_continue_watching()?;
            writeln!(out, "Cleared continue watching")?;
        }
        Command::Later { id } => {
            if store.toggle_watch_later(id)? {
                writeln!(out, "Added {id} to watch later")?;
            } else {
                writeln!(out, "Removed {id} from watch later")?;
            }
        }
        Command::LaterList => {
            for id in store.watch_later_ids() {
                writeln!(out, "{id}")?;
            }
        }
        Command::Follow { interval_ms } => follow(store, interval_ms, out).await?,
    }
    Ok(())
}

async fn follow(store: &WatchStateStore, interval_ms: u64, out: &mut dyn Write) -> Result<()> {
    let mut changes = store.subscribe();
    let poller = spawn_foreign_poller(store.clone(), Duration::from_millis(interval_ms.max(50)));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    writeln!(out, "{}", describe_change(change))?;
                    out.flush()?;
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    poller.abort();
    Ok(())
}

fn describe_record(record: &WatchProgressRecord) -> String {
    let title = if record.item.title.is_empty() {
        "(untitled)"
    } else {
        record.item.title.as_str()
    };
    format!(
        "{}\t{}%\t{}\t{}\t{}",
        record.item.id,
        record.progress_percent,
        record.item.duration_display,
        title,
        record.last_watched_at.format("%Y-%m-%d %H:%M"),
    )
}

fn describe_change(change: StateChange) -> String {
    let key = match change.key {
        WatchKey::ContinueWatching => "continue watching",
        WatchKey::WatchLater => "watch later",
    };
    let origin = match change.origin {
        ChangeOrigin::Local => "here",
        ChangeOrigin::Foreign => "elsewhere",
    };
    format!("{key} changed {origin}")
}
