//! Run one synchronization.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{HttpSource, SyncCoordinator};
use sync_store::SqliteReplica;

use crate::config::Config;

/// Run the sync command.
pub async fn run(config: &Config, database: &Path, with_content: bool) -> Result<()> {
    let api_url = config.api_url()?;
    let source = HttpSource::new(api_url, &config.source.user_agent, config.request_timeout())
        .context("Failed to build HTTP client")?;

    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create database directory")?;
    }
    let replica = SqliteReplica::new(database)
        .await
        .with_context(|| format!("Failed to open replica {}", database.display()))?;

    let coordinator = SyncCoordinator::new(source, replica, config.sync_options(with_content));
    let result = coordinator.run().await;
    coordinator.replica().close().await;

    match result {
        Ok(report) => {
            println!("{report}");
            Ok(())
        }
        Err(err) => {
            let category = err.category();
            Err(anyhow::Error::new(err).context(format!("Sync failed ({category})")))
        }
    }
}
