use std::sync::Arc;

use crate::config::{ServerConfig, StorageConfig};
use crate::error::StoreError;
use crate::relay::{spawn_relay, RelayHandle};
use crate::storage::{FileStore, S3Store, SnapshotStore};

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub store: Arc<dyn SnapshotStore>,
    pub outbound_capacity: usize,
    pub csrf_token: Option<Arc<str>>,
}

impl AppState {
    /// Opens the configured store and starts the relay task.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn SnapshotStore> = match &config.storage {
            StorageConfig::File { snapshot_dir } => {
                Arc::new(FileStore::open(snapshot_dir.clone()).await?)
            }
            StorageConfig::S3(s3) => Arc::new(S3Store::new(s3.clone()).await),
        };
        Ok(Self::new(store, config))
    }

    pub fn new(store: Arc<dyn SnapshotStore>, config: &ServerConfig) -> Self {
        Self {
            relay: spawn_relay(config.relay_capacity),
            store,
            outbound_capacity: config.outbound_capacity,
            csrf_token: config.csrf_token.as_deref().map(Arc::from),
        }
    }
}
