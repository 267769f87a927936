//! Object storage for a vnode's key-to-container map.
//!
//! The engine treats storage as an opaque ordered map from key to
//! [`DottedCausalContainer`]. Two backends are provided: the in-memory
//! default ([`memory::MemStore`]) and a persistent one backed by `redb`
//! ([`fs::DiskStore`]).

use bytes::Bytes;

use crate::dcc::DottedCausalContainer;

pub mod fs;
pub mod memory;

/// Errors from the object storage backends.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backing database failed.
    #[error("storage backend: {0}")]
    Db(#[from] redb::Error),
    /// A stored container failed to encode or decode.
    #[error("value codec: {0}")]
    Codec(#[from] postcard::Error),
    /// Filesystem failure while opening the backend.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! redb_error_from {
    ($($err:ty),*) => {
        $(impl From<$err> for StoreError {
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

/// Abstraction over the per-vnode object storage backends.
pub trait Store: Send + 'static {
    /// Fetch the container stored for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<DottedCausalContainer>, StoreError>;

    /// Store a container for `key`.
    fn put(&mut self, key: Bytes, dcc: &DottedCausalContainer) -> Result<(), StoreError>;

    /// Remove `key` entirely.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Fold over every `(key, container)` pair in key order.
    fn fold<T>(
        &self,
        acc: T,
        f: impl FnMut(T, Bytes, DottedCausalContainer) -> T,
    ) -> Result<T, StoreError>;

    /// Whether the store holds no keys.
    fn is_empty(&self) -> Result<bool, StoreError>;

    /// Release the backend. Further calls are invalid.
    fn close(&mut self) -> Result<(), StoreError>;
}
