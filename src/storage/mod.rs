pub mod sqlite;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

#[cfg(test)]
use mockall::automock;

use std::sync::Arc;

use crate::{
    config::{StorageConfig, resolve_path, verbose},
    models::Conversation,
};
use async_trait::async_trait;
use eyre::{Context, Result};
use sqlite::Sqlite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Storage {
    async fn load_conversations(&self) -> Result<Vec<Conversation>>;
    /// Replace the stored collection, conversations missing from
    /// `conversations` are removed.
    async fn save_conversations(&self, conversations: Vec<Conversation>) -> Result<()>;
    async fn load_selected_ids(&self) -> Result<Vec<String>>;
    async fn save_selected_ids(&self, ids: Vec<String>) -> Result<()>;
}

pub type ArcStorage = Arc<dyn Storage + Send + Sync>;

pub async fn new_storage(config: &StorageConfig) -> Result<ArcStorage> {
    let storage = match config {
        StorageConfig::Sqlite(sqlite_config) => {
            let path = sqlite_config
                .path()
                .map(resolve_path)
                .transpose()
                .wrap_err("resolving storage path")?;
            verbose!(
                "  [+] Storage: sqlite {}",
                path.as_deref().unwrap_or("(in-memory)")
            );
            Arc::new(Sqlite::new(path.as_deref()).await?)
        }
    };
    Ok(storage)
}

/// Full state handed over after every store mutation
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub selected_ids: Vec<String>,
}

/// Writes snapshots to the storage one at a time. Snapshots that queue up
/// while a write is in progress are collapsed into the newest one.
pub struct PersistenceService {
    storage: ArcStorage,
    snapshot_rx: mpsc::UnboundedReceiver<Snapshot>,
    cancel_token: CancellationToken,
}

impl PersistenceService {
    pub fn new(
        storage: ArcStorage,
        snapshot_rx: mpsc::UnboundedReceiver<Snapshot>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            storage,
            snapshot_rx,
            cancel_token,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    log::debug!("Persistence service cancelled");
                    return self.flush().await;
                }

                snapshot = self.snapshot_rx.recv() => {
                    let Some(snapshot) = snapshot else {
                        log::debug!("Snapshot channel closed");
                        return Ok(());
                    };
                    let snapshot = self.newest(snapshot);
                    if let Err(err) = self.write(snapshot).await {
                        log::error!("Failed to persist conversations: {:?}", err);
                    }
                }
            }
        }
    }

    fn newest(&mut self, mut snapshot: Snapshot) -> Snapshot {
        let mut skipped = 0;
        while let Ok(next) = self.snapshot_rx.try_recv() {
            snapshot = next;
            skipped += 1;
        }
        if skipped > 0 {
            log::trace!("Coalesced {} snapshots", skipped);
        }
        snapshot
    }

    /// Write whatever is still queued.
    async fn flush(&mut self) -> Result<()> {
        let Ok(snapshot) = self.snapshot_rx.try_recv() else {
            return Ok(());
        };
        let snapshot = self.newest(snapshot);
        self.write(snapshot).await
    }

    async fn write(&self, snapshot: Snapshot) -> Result<()> {
        log::debug!(
            "Persisting {} conversations",
            snapshot.conversations.len()
        );
        self.storage
            .save_conversations(snapshot.conversations)
            .await
            .wrap_err("saving conversations")?;
        self.storage
            .save_selected_ids(snapshot.selected_ids)
            .await
            .wrap_err("saving selection")?;
        Ok(())
    }
}
