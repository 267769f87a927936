//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How many coordinated writes may pass between durable state flushes.
pub const DEFAULT_UPDATE_LIMIT: u64 = 100;

/// Default number of replicas per key.
pub const DEFAULT_REPLICATION: usize = 3;

/// Default number of ring partitions.
pub const DEFAULT_PARTITIONS: u64 = 64;

/// Which object storage backend a vnode uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-memory ordered map; state is lost on restart.
    #[default]
    Memory,
    /// Persistent `redb` database under `data_dir`.
    Disk,
}

/// Static configuration for the engine. Loading from files or flags is the
/// embedder's concern; this is only the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Object storage backend.
    pub backend: Backend,
    /// Writes between durable state flushes.
    pub update_limit: u64,
    /// Replicas per key.
    pub replication: usize,
    /// Number of ring partitions.
    pub partitions: u64,
    /// Root for `objects/<index>` and `vnode_state/<index>` databases.
    pub data_dir: PathBuf,
    /// Name of the physical node hosting this engine.
    pub node: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            update_limit: DEFAULT_UPDATE_LIMIT,
            replication: DEFAULT_REPLICATION,
            partitions: DEFAULT_PARTITIONS,
            data_dir: PathBuf::from("data"),
            node: "local".into(),
        }
    }
}

impl Config {
    /// Path of the object database for partition `index`.
    pub fn objects_path(&self, index: u64) -> PathBuf {
        self.data_dir.join("objects").join(index.to_string())
    }

    /// Path of the vnode-state database for partition `index`.
    pub fn state_path(&self, index: u64) -> PathBuf {
        self.data_dir.join("vnode_state").join(index.to_string())
    }
}
