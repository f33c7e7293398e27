//! Operator CLI for inspecting and nudging a device's sync queue.
//!
//! This is the support-facing surface for the dead-letter path: when a
//! mutation is stuck (for example a type shipped ahead of its route), an
//! operator can see it, requeue it after an app update, or purge it.

use crate::config::{default_store_path, SyncConfig};
use crate::manager::{RouteTable, SyncManager};
use crate::queue::MutationQueue;
use crate::store::Store;
use crate::transport::HttpTransport;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "tourbase-sync", version, about = "Inspect and drain the guide app's offline sync queue")]
pub struct Cli {
    /// Path to the store file (defaults to the app data dir).
    #[arg(long)]
    store: Option<PathBuf>,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pending and dead-letter counts plus the device id.
    Status,
    /// List pending mutations in replay order.
    Pending,
    /// List dead-lettered mutations.
    DeadLetters,
    /// Move a dead letter back onto the queue.
    Requeue { id: i64 },
    /// Drop all dead letters.
    PurgeDeadLetters,
    /// Run one drain cycle against the server.
    Drain {
        /// Server origin; overrides the config file.
        #[arg(long)]
        server: Option<String>,
    },
    /// Delete synced mutations past the retention window.
    Prune,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let store_path = cli
        .store
        .clone()
        .or_else(default_store_path)
        .context("No store path given and no default data dir available")?;
    let store = Arc::new(Store::open(&store_path)?);
    let queue = MutationQueue::new(store.clone());

    match cli.command {
        Command::Status => {
            println!("store:        {}", store_path.display());
            println!("device id:    {}", store.device_id()?);
            println!("pending:      {}", queue.pending_count()?);
            println!("dead letters: {}", queue.list_dead_letters()?.len());
        }
        Command::Pending => {
            for mutation in queue.list_pending()? {
                println!(
                    "{:>6}  {:<24} {}  skips={}",
                    mutation.id,
                    mutation.mutation_type,
                    mutation.enqueued_at.to_rfc3339(),
                    mutation.skip_cycles
                );
            }
        }
        Command::DeadLetters => {
            for letter in queue.list_dead_letters()? {
                println!(
                    "{:>6}  {:<24} {}  {}",
                    letter.id,
                    letter.mutation_type,
                    letter.dead_lettered_at.to_rfc3339(),
                    letter.reason
                );
            }
        }
        Command::Requeue { id } => match queue.requeue_dead_letter(id)? {
            Some(new_id) => println!("requeued {} as mutation {}", id, new_id),
            None => bail!("no dead letter with id {}", id),
        },
        Command::PurgeDeadLetters => {
            let purged = queue.purge_dead_letters()?;
            println!("purged {} dead letters", purged);
        }
        Command::Drain { server } => {
            let server_url = server.unwrap_or_else(|| config.server_url.clone());
            let transport = Arc::new(HttpTransport::new(
                &server_url,
                &store.device_id()?,
                config.request_timeout(),
            )?);
            let manager = SyncManager::new(queue, transport, RouteTable::guide_defaults())
                .with_dead_letter_after(config.dead_letter_after);
            match manager.drain().await? {
                Some(summary) => println!(
                    "synced={} failed={} skipped={}",
                    summary.synced_count(),
                    summary.failed_count(),
                    summary.skipped_count()
                ),
                None => println!("drain already in progress"),
            }
        }
        Command::Prune => match config.prune_synced_after_days {
            Some(days) => {
                let pruned = queue.prune_synced(chrono::Duration::days(days as i64))?;
                println!("pruned {} synced mutations", pruned);
            }
            None => println!("retention pruning disabled in config"),
        },
    }
    Ok(())
}
