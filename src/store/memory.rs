//! In-memory object storage.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::dcc::DottedCausalContainer;

use super::{Store, StoreError};

/// The default backend: an ordered map behind a shared handle.
///
/// Clones share the same map, which lets tests keep a handle to inspect
/// storage after handing the store to a vnode.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    records: Arc<RwLock<BTreeMap<Bytes, DottedCausalContainer>>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<DottedCausalContainer>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&mut self, key: Bytes, dcc: &DottedCausalContainer) -> Result<(), StoreError> {
        self.records.write().insert(key, dcc.clone());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.records.write().remove(key);
        Ok(())
    }

    fn fold<T>(
        &self,
        mut acc: T,
        mut f: impl FnMut(T, Bytes, DottedCausalContainer) -> T,
    ) -> Result<T, StoreError> {
        for (key, dcc) in self.records.read().iter() {
            acc = f(acc, key.clone(), dcc.clone());
        }
        Ok(acc)
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.records.read().is_empty())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() -> Result<(), StoreError> {
        let mut store = MemStore::new();
        assert!(store.is_empty()?);
        let mut dcc = DottedCausalContainer::new();
        dcc.add((1, 1), Bytes::from_static(b"v"));
        store.put(Bytes::from_static(b"k"), &dcc)?;
        assert_eq!(store.get(b"k")?, Some(dcc));
        store.delete(b"k")?;
        assert_eq!(store.get(b"k")?, None);
        Ok(())
    }

    #[test]
    fn fold_visits_in_key_order() -> Result<(), StoreError> {
        let mut store = MemStore::new();
        for k in ["b", "a", "c"] {
            store.put(Bytes::copy_from_slice(k.as_bytes()), &DottedCausalContainer::new())?;
        }
        let keys = store.fold(Vec::new(), |mut acc, key, _| {
            acc.push(key);
            acc
        })?;
        assert_eq!(keys, vec!["a", "b", "c"]);
        Ok(())
    }
}
