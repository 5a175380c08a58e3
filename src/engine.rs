//! Wires configuration into a ready-to-run [`SyncCoordinator`].

use std::sync::Arc;

use thiserror::Error;

use crate::reminder::{Notifier, ReminderScheduler};
use crate::storage::cache::{CacheError, LocalCache, SqliteBlobStore};
use crate::storage::config::{Config, ConfigError};
use crate::sync::{FirestoreStore, Session, SyncCoordinator};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Opens the SQLite cache and the Firestore client named by `config` and
/// builds a coordinator around them. Nothing is loaded until the
/// coordinator is first pumped.
pub fn open(config: &Config, session: Session, notifier: Box<dyn Notifier>) -> Result<SyncCoordinator, SetupError> {
    let zone = config.timezone()?;
    let lead = config.reminder_lead()?;
    let blobs = SqliteBlobStore::open(&config.storage.database)?;
    let remote = FirestoreStore::from_config(&config.remote);
    let reminders = ReminderScheduler::new(notifier).with_lead(lead);

    tracing::info!(
        "Opened household cache at {} (zone {})",
        config.storage.database.display(),
        zone
    );
    Ok(SyncCoordinator::new(
        session,
        Arc::new(remote),
        LocalCache::new(Box::new(blobs)),
        reminders,
        zone,
    ))
}
