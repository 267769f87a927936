//! Log of the keys a vnode coordinated, addressed by dot counter.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::Counter;

/// Per-vnode log of coordinated writes.
///
/// The key at index `i` was written at counter `base + i + 1`, so the log
/// represents the dot range `base + 1 ..= base + len`. It is appended at the
/// tail on every coordinated write and truncated at the head once every sync
/// peer has acknowledged the corresponding counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLog {
    base: Counter,
    keys: Vec<Bytes>,
}

impl KeyLog {
    /// Create an empty log starting at counter 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter below which all slots have been truncated.
    pub fn base(&self) -> Counter {
        self.base
    }

    /// Number of keys still in the log.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the log holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Append the key written at the next counter.
    pub fn push(&mut self, key: Bytes) {
        self.keys.push(key);
    }

    /// The key written at `counter`, if the slot is still in the log.
    pub fn get(&self, counter: Counter) -> Option<&Bytes> {
        if counter <= self.base {
            return None;
        }
        self.keys.get((counter - self.base - 1) as usize)
    }

    /// Drop every slot up to and including `new_base`, returning the removed
    /// keys. A `new_base` at or below the current base is a no-op.
    pub fn truncate_to(&mut self, new_base: Counter) -> Vec<Bytes> {
        if new_base <= self.base {
            return Vec::new();
        }
        let n = ((new_base - self.base) as usize).min(self.keys.len());
        self.base += n as Counter;
        self.keys.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn slots_map_to_counters() {
        let mut log = KeyLog::new();
        log.push(key("a"));
        log.push(key("b"));
        assert_eq!(log.get(1), Some(&key("a")));
        assert_eq!(log.get(2), Some(&key("b")));
        assert_eq!(log.get(0), None);
        assert_eq!(log.get(3), None);
    }

    #[test]
    fn truncate_drops_prefix() {
        let mut log = KeyLog::new();
        for k in ["a", "b", "c", "d"] {
            log.push(Bytes::copy_from_slice(k.as_bytes()));
        }
        let removed = log.truncate_to(2);
        assert_eq!(removed, vec![key("a"), key("b")]);
        assert_eq!(log.base(), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(2), None);
        assert_eq!(log.get(3), Some(&key("c")));
        assert!(log.truncate_to(1).is_empty());
    }

    #[test]
    fn truncate_is_clamped_to_len() {
        let mut log = KeyLog::new();
        log.push(key("a"));
        let removed = log.truncate_to(10);
        assert_eq!(removed.len(), 1);
        assert_eq!(log.base(), 1);
    }
}
