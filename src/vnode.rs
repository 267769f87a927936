//! The per-partition replica engine.
//!
//! A [`Vnode`] owns one partition's causal metadata and object storage and
//! processes the full command surface: coordinated writes, replicated
//! writes, reads, read repair, the three anti-entropy messages, and handoff.
//! Handlers are plain methods over `&mut self`; the mailbox serialization
//! that makes them safe to drive concurrently lives in [`crate::actor`].

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    clock::{BitmappedVersion, Counter, NodeClock, NodeId, VersionVector},
    config::Config,
    dcc::DottedCausalContainer,
    keylog::KeyLog,
    ring::Ring,
    state::{StateRecord, StateStore},
    stats::Stats,
    store::{Store, StoreError},
};

/// A coordinated write: store a new value or delete the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store `value` as a new version.
    Put(Bytes),
    /// Remove the versions covered by the client context.
    Delete,
}

/// Identity of the replica that served a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Ring position of the vnode.
    pub index: NodeId,
    /// Physical node hosting it.
    pub node: String,
}

/// Reply to a read: the serving replica plus the filled container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReply {
    /// Who served the read.
    pub from: ReplicaInfo,
    /// The key's container, filled against the serving node's clock. Empty
    /// dots with a non-trivial context means "known deleted or never
    /// written, as of this causal point".
    pub dcc: DottedCausalContainer,
}

/// Reply to `sync_start`: the initiator's current knowledge of the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    /// The initiator's id.
    pub from: NodeId,
    /// The initiator's clock entry for the peer.
    pub entry: BitmappedVersion,
}

/// Reply to `sync_request`: everything the initiator is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingObjects {
    /// The responding peer's id.
    pub from: NodeId,
    /// The responder's clock, projected to contiguous bases.
    pub clock_base: NodeClock,
    /// The keys the initiator has not seen, with stripped containers.
    pub objects: Vec<(Bytes, DottedCausalContainer)>,
    /// Keylog slots garbage-collected while serving this request.
    pub truncated: usize,
}

/// Errors produced by the anti-entropy handlers.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// A peer asked for a dot that was already garbage collected. Peers
    /// acknowledge before the keylog truncates, so this means a corrupted
    /// or impersonated view.
    #[error("dot {counter} is below the keylog base {base}")]
    TruncatedDot {
        /// The requested counter.
        counter: Counter,
        /// The keylog base it fell below.
        base: Counter,
    },
    /// A sync payload did not carry the sender's own clock entry.
    #[error("sync payload carries no clock entry for its sender {0}")]
    MissingPeerEntry(NodeId),
    /// The sender's own clock entry must be contiguous; a bitmapped entry
    /// would be silently truncated if absorbed, so it is rejected.
    #[error("clock base entry for node {0} is not contiguous")]
    NonContiguousBase(NodeId),
    /// A handoff item failed to decode.
    #[error("malformed handoff item: {0}")]
    Codec(#[from] postcard::Error),
    /// Object storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One partition's replica engine.
#[derive(derive_more::Debug)]
pub struct Vnode<S> {
    id: NodeId,
    node: String,
    ring: Ring,
    clock: NodeClock,
    #[debug(skip)]
    storage: S,
    replicated: VersionVector,
    keylog: KeyLog,
    updates_since_flush: u64,
    update_limit: u64,
    #[debug(skip)]
    state: StateStore,
    #[debug(skip)]
    stats: Arc<dyn Stats>,
}

impl<S: Store> Vnode<S> {
    /// Open the vnode for partition `index`, restoring durable state if a
    /// prior flush exists.
    ///
    /// A missing record yields a fresh clock with every sync peer's
    /// acknowledgement initialized to zero. A corrupt record is logged and
    /// treated as missing; anti-entropy re-converges whatever was lost.
    pub fn init(
        index: NodeId,
        config: &Config,
        storage: S,
        state: StateStore,
        stats: Arc<dyn Stats>,
    ) -> Self {
        let ring = Ring::new(config.partitions, config.replication);
        let restored = match state.load(index) {
            Ok(record) => record,
            Err(err) => {
                warn!(%index, %err, "failed to restore vnode state, starting fresh");
                None
            }
        };
        let (clock, keylog, replicated) = match restored {
            Some(record) => {
                debug!(%index, base = record.clock.base_of(index), "restored vnode state");
                (record.clock, record.keylog, record.replicated)
            }
            None => {
                if !matches!(storage.is_empty(), Ok(true)) {
                    warn!(
                        %index,
                        "no durable state but object storage is non-empty; \
                         writes since the last flush boundary are lost"
                    );
                }
                let replicated = ring.peers(index).into_iter().map(|p| (p, 0)).collect();
                (NodeClock::new(), KeyLog::new(), replicated)
            }
        };
        Self {
            id: index,
            node: config.node.clone(),
            ring,
            clock,
            storage,
            replicated,
            keylog,
            updates_since_flush: 0,
            update_limit: config.update_limit,
            state,
            stats,
        }
    }

    /// The vnode's ring position.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The replica identity used in read replies.
    pub fn info(&self) -> ReplicaInfo {
        ReplicaInfo {
            index: self.id,
            node: self.node.clone(),
        }
    }

    /// Serve a read.
    ///
    /// A missing key is not an error: the reply is an empty container filled
    /// with this node's causal knowledge, so the coordinator can tell "never
    /// seen" apart from "deleted after the writes the requester knew about".
    pub fn read(&self, key: &[u8]) -> Result<ReadReply, StoreError> {
        let mut dcc = self.storage.get(key)?.unwrap_or_default();
        dcc.fill(&self.clock);
        self.stats.read();
        Ok(ReadReply {
            from: self.info(),
            dcc,
        })
    }

    /// Apply a read repair. Repairs are not coordinated writes: the keylog
    /// and the flush counter stay untouched.
    pub fn repair(&mut self, key: Bytes, dcc: DottedCausalContainer) -> Result<(), StoreError> {
        trace!(id = self.id, ?key, "repair");
        self.absorb(key, dcc)?;
        self.stats.repair();
        Ok(())
    }

    /// Apply a write replicated from the coordinating vnode. The dot was
    /// generated there, so the keylog stays untouched here.
    pub fn replicate(&mut self, key: Bytes, dcc: DottedCausalContainer) -> Result<(), StoreError> {
        trace!(id = self.id, ?key, "replicate");
        self.absorb(key, dcc)?;
        self.stats.replicate();
        Ok(())
    }

    fn absorb(&mut self, key: Bytes, mut dcc: DottedCausalContainer) -> Result<(), StoreError> {
        // Fill the local container with the clock as it was before this
        // event: filling after the absorb would make the incoming dots look
        // already-seen and sync would drop them.
        let local = self.guaranteed_get(&key);
        dcc.add_to_clock(&mut self.clock);
        dcc.sync(local);
        self.store_stripped(key, &dcc)
    }

    /// Coordinate a write.
    ///
    /// Generates a dot with this vnode's id, applies it on top of whatever
    /// the client had observed, and returns the **unstripped** container the
    /// caller must forward to the other replicas via [`replicate`]
    /// (stripping is a local optimization; replicas need the full context).
    ///
    /// [`replicate`]: Vnode::replicate
    pub fn write(
        &mut self,
        op: WriteOp,
        key: Bytes,
        client_ctx: &VersionVector,
    ) -> Result<DottedCausalContainer, StoreError> {
        let mut dcc = self.guaranteed_get(&key);
        dcc.discard(client_ctx);
        let counter = self.clock.event(self.id);
        if let WriteOp::Put(value) = op {
            dcc.add((self.id, counter), value);
        }
        trace!(id = self.id, ?key, counter, "write");
        self.store_stripped(key.clone(), &dcc)?;
        self.keylog.push(key);
        self.updates_since_flush += 1;
        if self.updates_since_flush >= self.update_limit {
            self.flush();
        }
        self.stats.write();
        Ok(dcc)
    }

    /// Anti-entropy step 1, at the initiator: report our current knowledge
    /// of `peer`'s dots, to be forwarded to the peer as a `sync_request`.
    pub fn sync_start(&self, peer: NodeId) -> PeerView {
        PeerView {
            from: self.id,
            entry: self.clock.entry(peer),
        }
    }

    /// Anti-entropy step 2, at the peer: given the initiator's view of our
    /// own counters, ship every key it is missing, record its
    /// acknowledgement, and garbage-collect the keylog.
    pub fn sync_request(
        &mut self,
        remote_id: NodeId,
        remote_entry: BitmappedVersion,
    ) -> Result<MissingObjects, SyncError> {
        let local_entry = self.clock.entry(self.id);
        let missing: Vec<Counter> = local_entry.delta(&remote_entry).collect();
        trace!(id = self.id, remote_id, missing = missing.len(), "sync_request");

        // Resolve dots to keys before mutating anything, so a malformed
        // request leaves the state untouched.
        let mut keys = std::collections::BTreeSet::new();
        for counter in missing {
            match self.keylog.get(counter) {
                Some(key) => {
                    keys.insert(key.clone());
                }
                None => {
                    return Err(SyncError::TruncatedDot {
                        counter,
                        base: self.keylog.base(),
                    })
                }
            }
        }

        let mut objects = Vec::new();
        for key in keys {
            if !self.ring.replicates(remote_id, &key) {
                continue;
            }
            let mut dcc = self.storage.get(&key)?.unwrap_or_default();
            dcc.strip(&self.clock);
            objects.push((key, dcc));
        }

        // The initiator has now observed our dots up to its contiguous base.
        // Only known peers count toward keylog truncation.
        if self.replicated.contains(remote_id) {
            self.replicated.insert(remote_id, remote_entry.base());
        } else {
            warn!(id = self.id, remote_id, "sync from a non-peer, not recording ack");
        }
        let truncated = self.truncate_keylog();

        self.stats.sync_keys_sent(objects.len() as u64);
        Ok(MissingObjects {
            from: self.id,
            clock_base: self.clock.base(),
            objects,
            truncated,
        })
    }

    /// Drop every keylog slot all peers have acknowledged, then re-strip the
    /// removed keys: with the clock base grown, their stored containers can
    /// shed context entries (and deleted keys can finally disappear).
    /// Returns how many slots were dropped.
    fn truncate_keylog(&mut self) -> usize {
        let Some(min) = self.replicated.min() else {
            return 0;
        };
        if min <= self.keylog.base() {
            return 0;
        }
        let removed = self.keylog.truncate_to(min);
        let count = removed.len();
        debug!(id = self.id, min, removed = count, "keylog truncated");
        self.stats.keylog_truncated(count as u64);
        for key in removed {
            let dcc = match self.storage.get(&key) {
                Ok(Some(dcc)) => dcc,
                Ok(None) => continue,
                Err(err) => {
                    warn!(id = self.id, ?key, %err, "re-strip read failed, leaving as is");
                    continue;
                }
            };
            if let Err(err) = self.store_stripped(key.clone(), &dcc) {
                warn!(id = self.id, ?key, %err, "re-strip write failed, leaving as is");
            }
        }
        count
    }

    /// Anti-entropy step 3, back at the initiator: absorb the peer's
    /// authoritative view of itself and merge in the shipped containers.
    /// Returns how many keys actually changed.
    pub fn sync_response(
        &mut self,
        remote_id: NodeId,
        remote_clock_base: NodeClock,
        objects: Vec<(Bytes, DottedCausalContainer)>,
    ) -> Result<usize, SyncError> {
        let Some(&entry) = remote_clock_base.get(remote_id) else {
            return Err(SyncError::MissingPeerEntry(remote_id));
        };
        if entry.bitmap() != 0 {
            return Err(SyncError::NonContiguousBase(remote_id));
        }
        // The peer is the sole generator of its dots: replace wholesale
        // rather than join. Local containers are filled against the clock as
        // it was before the replacement (see `absorb`); stripping below uses
        // the advanced clock.
        let old_clock = self.clock.clone();
        self.clock.insert_entry(remote_id, entry);

        let mut applied = 0;
        for (key, mut remote) in objects {
            remote.fill(&remote_clock_base);
            let local = self.fetch_filled(&key, &old_clock);
            let mut merged = remote;
            merged.sync(local.clone());
            if merged != local {
                self.store_stripped(key, &merged)?;
                applied += 1;
            }
        }
        trace!(id = self.id, remote_id, applied, "sync_response");
        self.stats.sync_keys_applied(applied as u64);
        Ok(applied)
    }

    /// Emit the partition's entire key set as encoded handoff items.
    pub fn handoff_items(&self) -> Result<Vec<Bytes>, StoreError> {
        let pairs = self.storage.fold(Vec::new(), |mut acc, key, dcc| {
            acc.push((key, dcc));
            acc
        })?;
        pairs
            .into_iter()
            .map(|pair| Ok(Bytes::from(postcard::to_stdvec(&pair)?)))
            .collect()
    }

    /// Apply one handoff item on the receiving side.
    ///
    /// Handoff applies count toward the flush boundary: a long migration
    /// stream must not bypass periodic durability.
    pub fn handoff_recv(&mut self, item: &[u8]) -> Result<(), SyncError> {
        let (key, dcc): (Bytes, DottedCausalContainer) = postcard::from_bytes(item)?;
        let local = self.guaranteed_get(&key);
        let mut merged = dcc;
        merged.sync(local);
        self.store_stripped(key, &merged)?;
        self.updates_since_flush += 1;
        if self.updates_since_flush >= self.update_limit {
            self.flush();
        }
        Ok(())
    }

    /// Persist `(clock, keylog, replicated)` now and reset the flush
    /// counter. Durable failures are logged, not surfaced: losing a flush
    /// narrows the durability window but anti-entropy re-converges the rest.
    pub fn flush(&mut self) {
        let record = StateRecord {
            clock: self.clock.clone(),
            keylog: self.keylog.clone(),
            replicated: self.replicated.clone(),
        };
        if let Err(err) = self.state.save(self.id, &record) {
            warn!(id = self.id, %err, "state flush failed");
        } else {
            self.updates_since_flush = 0;
            self.stats.flush();
        }
    }

    /// Flush and release storage and the durable handle.
    pub fn terminate(mut self) {
        self.flush();
        if let Err(err) = self.storage.close() {
            warn!(id = self.id, %err, "closing object storage failed");
        }
        self.state.close();
    }

    /// Fetch and fill a key's container, treating storage failures as
    /// not-found so writes never stall on a transient read error.
    fn guaranteed_get(&self, key: &[u8]) -> DottedCausalContainer {
        self.fetch_filled(key, &self.clock)
    }

    fn fetch_filled(&self, key: &[u8], clock: &NodeClock) -> DottedCausalContainer {
        let mut dcc = match self.storage.get(key) {
            Ok(Some(dcc)) => dcc,
            Ok(None) => DottedCausalContainer::new(),
            Err(err) => {
                warn!(id = self.id, %err, "storage read failed, treating as not-found");
                DottedCausalContainer::new()
            }
        };
        dcc.fill(clock);
        dcc
    }

    /// Strip `dcc` against the clock and store it, deleting the key when
    /// nothing survives (the causally clean delete path).
    fn store_stripped(&mut self, key: Bytes, dcc: &DottedCausalContainer) -> Result<(), StoreError> {
        let mut stripped = dcc.clone();
        stripped.strip(&self.clock);
        if stripped.is_empty() {
            self.storage.delete(&key)
        } else {
            self.storage.put(key, &stripped)
        }
    }
}
