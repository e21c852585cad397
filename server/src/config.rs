use std::net::SocketAddr;
use std::path::PathBuf;

use crate::connection::DEFAULT_OUTBOUND_CAPACITY;
use crate::relay::DEFAULT_COMMAND_CAPACITY;
use crate::storage::S3StoreConfig;

#[derive(Clone, Debug)]
pub enum StorageConfig {
    File { snapshot_dir: PathBuf },
    S3(S3StoreConfig),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub storage: StorageConfig,
    /// Per-connection outbound queue length before new frames are dropped.
    pub outbound_capacity: usize,
    pub relay_capacity: usize,
    /// When set, mutating snapshot requests must present exactly this token.
    /// When unset, any non-empty token is accepted.
    pub csrf_token: Option<String>,
}

impl ServerConfig {
    pub fn with_file_storage(addr: SocketAddr, snapshot_dir: PathBuf) -> Self {
        Self {
            addr,
            storage: StorageConfig::File { snapshot_dir },
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            relay_capacity: DEFAULT_COMMAND_CAPACITY,
            csrf_token: None,
        }
    }
}
