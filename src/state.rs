//! Durable vnode state.
//!
//! A vnode's causal metadata — node clock, keylog, replicated vector — is
//! persisted as a single postcard-encoded record per vnode, flushed every
//! [`Config::update_limit`](crate::Config) coordinated writes and on
//! shutdown. Object storage is durable on its own; this record is what makes
//! the metadata survive a restart (up to the documented flush boundary).

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    clock::{NodeClock, NodeId, VersionVector},
    keylog::KeyLog,
};

const STATE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vnode-state");

/// Errors from the durable state store.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    /// The backing database failed.
    #[error("state backend: {0}")]
    Db(#[from] redb::Error),
    /// A state record failed to encode or decode.
    #[error("state record codec: {0}")]
    Codec(#[from] postcard::Error),
    /// Filesystem failure while opening the backend.
    #[error("state io: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! redb_error_from {
    ($($err:ty),*) => {
        $(impl From<$err> for StateError {
            fn from(value: $err) -> Self {
                Self::Db(value.into())
            }
        })*
    };
}

redb_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// The persisted tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// The node clock at flush time.
    pub clock: NodeClock,
    /// The keylog at flush time.
    pub keylog: KeyLog,
    /// The replicated vector at flush time.
    pub replicated: VersionVector,
}

/// Single-record persistence for vnode state, one database file per
/// partition (conventionally `data/vnode_state/<index>`).
#[derive(Debug)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Create or open the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Self::new_impl(db)
    }

    /// Create a state store that lives in memory only. Restarting loses it,
    /// which is exactly the contract an in-memory deployment wants.
    pub fn memory() -> Result<Self, StateError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::new_impl(db)
    }

    fn new_impl(db: Database) -> Result<Self, StateError> {
        let tx = db.begin_write()?;
        tx.open_table(STATE_TABLE)?;
        tx.commit()?;
        Ok(Self { db })
    }

    /// Load the record for `id`, if one was ever flushed.
    pub fn load(&self, id: NodeId) -> Result<Option<StateRecord>, StateError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(STATE_TABLE)?;
        let Some(value) = table.get(id)? else {
            return Ok(None);
        };
        Ok(Some(postcard::from_bytes(value.value())?))
    }

    /// Persist the record for `id`, replacing any previous one.
    pub fn save(&mut self, id: NodeId, record: &StateRecord) -> Result<(), StateError> {
        let encoded = postcard::to_stdvec(record)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(STATE_TABLE)?;
            table.insert(id, encoded.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Release the backend.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::BitmappedVersion;

    #[test]
    fn record_roundtrips_across_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vnode_state").join("3");

        let mut clock = NodeClock::new();
        clock.insert_entry(3, BitmappedVersion::new(5, 0));
        clock.add(1, 7);
        let mut keylog = KeyLog::new();
        keylog.push(bytes::Bytes::from_static(b"k"));
        let record = StateRecord {
            clock,
            keylog,
            replicated: [(1, 2), (2, 0)].into_iter().collect(),
        };

        {
            let mut store = StateStore::open(&path)?;
            store.save(3, &record)?;
        }
        let store = StateStore::open(&path)?;
        assert_eq!(store.load(3)?, Some(record));
        assert_eq!(store.load(4)?, None);
        Ok(())
    }
}
