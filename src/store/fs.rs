//! On-disk object storage backed by `redb`.

use std::path::Path;

use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};

use crate::dcc::DottedCausalContainer;

use super::{Store, StoreError};

const OBJECTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("objects");

/// Persistent object storage: a single `redb` table of postcard-encoded
/// containers, one database file per partition
/// (conventionally `data/objects/<index>`).
#[derive(Debug)]
pub struct DiskStore {
    db: Database,
}

impl DiskStore {
    /// Create or open the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        // Create the table up front so reads never race an absent table.
        let tx = db.begin_write()?;
        tx.open_table(OBJECTS_TABLE)?;
        tx.commit()?;
        Ok(Self { db })
    }
}

impl Store for DiskStore {
    fn get(&self, key: &[u8]) -> Result<Option<DottedCausalContainer>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(OBJECTS_TABLE)?;
        let Some(value) = table.get(key)? else {
            return Ok(None);
        };
        Ok(Some(postcard::from_bytes(value.value())?))
    }

    fn put(&mut self, key: Bytes, dcc: &DottedCausalContainer) -> Result<(), StoreError> {
        let encoded = postcard::to_stdvec(dcc)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(OBJECTS_TABLE)?;
            table.insert(key.as_ref(), encoded.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(OBJECTS_TABLE)?;
            table.remove(key)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fold<T>(
        &self,
        mut acc: T,
        mut f: impl FnMut(T, Bytes, DottedCausalContainer) -> T,
    ) -> Result<T, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(OBJECTS_TABLE)?;
        for item in table.iter()? {
            let (key, value) = item?;
            let dcc = postcard::from_bytes(value.value())?;
            acc = f(acc, Bytes::copy_from_slice(key.value()), dcc);
        }
        Ok(acc)
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(OBJECTS_TABLE)?;
        let is_empty = table.iter()?.next().is_none();
        Ok(is_empty)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        // redb flushes committed transactions; dropping the handle is enough.
        Ok(())
    }
}
