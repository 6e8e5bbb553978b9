//! Show replica status.

use anyhow::{Context, Result};
use std::path::Path;
use sync_store::{CheckpointStore, SqliteReplica};
use sync_types::time::format_timestamp;

use crate::config::Config;

/// Run the status command.
pub async fn run(config: &Config, database: &Path) -> Result<()> {
    if !database.exists() {
        println!("Replica: NOT CREATED ({})", database.display());
        println!();
        println!("Run 'revmirror sync' to create it.");
        return Ok(());
    }

    let replica = SqliteReplica::new(database)
        .await
        .with_context(|| format!("Failed to open replica {}", database.display()))?;
    let key = config.sync.checkpoint_key.as_str();
    let checkpoint = replica
        .read_checkpoint(key)
        .await
        .context("Failed to read checkpoint")?;
    let stats = replica.stats().await.context("Failed to count rows")?;
    replica.close().await;

    println!("Replica: {}", database.display());
    match checkpoint {
        Some(at) => println!("Checkpoint ({key}): {}", format_timestamp(&at)),
        None => println!("Checkpoint ({key}): never synced"),
    }
    println!();
    println!("Rows:");
    println!("  pages:              {}", stats.pages);
    println!("  revisions:          {}", stats.revisions);
    println!("  archived revisions: {}", stats.archived_revisions);
    println!("  texts:              {}", stats.texts);
    println!("  tag links:          {}", stats.tag_links);
    println!("  archived tag links: {}", stats.archived_tag_links);
    if stats.duplicated > 0 {
        println!();
        println!(
            "Warning: {} revisions are both live and archived",
            stats.duplicated
        );
    }

    Ok(())
}
