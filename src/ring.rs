//! Static ring geometry.
//!
//! The engine does not manage ring membership; it only needs to answer two
//! questions about a fixed ring layout: which vnodes replicate a key, and
//! which vnodes share any replica set with a given vnode (its sync peers).

use crate::clock::NodeId;

/// A fixed consistent-hash ring of `partitions` vnodes with `replication`
/// replicas per key, placed on consecutive ring positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    partitions: u64,
    replication: usize,
}

impl Ring {
    /// Create a ring. `partitions` must be non-zero and `replication` must
    /// fit in the ring.
    pub fn new(partitions: u64, replication: usize) -> Self {
        assert!(partitions > 0, "ring must have at least one partition");
        assert!(
            replication as u64 <= partitions,
            "replication factor exceeds ring size"
        );
        Self {
            partitions,
            replication,
        }
    }

    /// Number of partitions on the ring.
    pub fn partitions(&self) -> u64 {
        self.partitions
    }

    /// Replication factor.
    pub fn replication(&self) -> usize {
        self.replication
    }

    /// The partition a key hashes to.
    pub fn partition(&self, key: &[u8]) -> NodeId {
        let digest = blake3::hash(key);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(buf) % self.partitions
    }

    /// The vnodes that replicate `key`: its partition and the next
    /// `replication - 1` positions on the ring.
    pub fn replica_set(&self, key: &[u8]) -> impl Iterator<Item = NodeId> + '_ {
        let primary = self.partition(key);
        (0..self.replication as u64).map(move |i| (primary + i) % self.partitions)
    }

    /// Whether `id` is in the replica set of `key`.
    pub fn replicates(&self, id: NodeId, key: &[u8]) -> bool {
        self.replica_set(key).any(|r| r == id)
    }

    /// The sync peers of `id`: every vnode that shares at least one key's
    /// replica set with it, i.e. the `replication - 1` predecessors and
    /// successors on the ring.
    pub fn peers(&self, id: NodeId) -> Vec<NodeId> {
        let mut peers = Vec::new();
        let span = self.replication as u64 - 1;
        for i in 1..=span {
            peers.push((id + self.partitions - i) % self.partitions);
        }
        for i in 1..=span {
            peers.push((id + i) % self.partitions);
        }
        peers.sort_unstable();
        peers.dedup();
        peers.retain(|&p| p != id);
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_count_is_twice_rf_minus_one() {
        let ring = Ring::new(64, 3);
        let peers = ring.peers(0);
        assert_eq!(peers, vec![1, 2, 62, 63]);
        assert_eq!(ring.peers(63), vec![0, 1, 61, 62]);
    }

    #[test]
    fn peers_collapse_on_tiny_rings() {
        let ring = Ring::new(3, 3);
        assert_eq!(ring.peers(0), vec![1, 2]);
    }

    #[test]
    fn replica_set_is_consecutive() {
        let ring = Ring::new(8, 3);
        let primary = ring.partition(b"some-key");
        let set: Vec<_> = ring.replica_set(b"some-key").collect();
        assert_eq!(set.len(), 3);
        assert_eq!(set[0], primary);
        assert_eq!(set[1], (primary + 1) % 8);
        assert!(ring.replicates(primary, b"some-key"));
    }

    #[test]
    fn placement_is_stable() {
        let ring = Ring::new(8, 3);
        assert_eq!(ring.partition(b"k"), ring.partition(b"k"));
    }

    #[test]
    fn replicas_of_any_key_are_peers_of_each_other() {
        let ring = Ring::new(16, 3);
        for key in [&b"a"[..], b"b", b"c", b"dddd"] {
            let set: Vec<_> = ring.replica_set(key).collect();
            for &a in &set {
                for &b in &set {
                    if a != b {
                        assert!(ring.peers(a).contains(&b), "{a} missing peer {b}");
                    }
                }
            }
        }
    }
}
