//! Per-partition replica engine for a Dynamo-style, eventually consistent
//! key-value store.
//!
//! The consistent-hash ring is split into partitions ("vnodes"); each vnode
//! runs one [`Vnode`] engine that coordinates client writes, applies writes
//! replicated from its peers, serves reads, and periodically reconciles with
//! its peers through a pairwise anti-entropy protocol.
//!
//! Causality is tracked per key with **dotted causal containers**
//! ([`DottedCausalContainer`]): each surviving value carries the unique dot
//! of the write that produced it, next to a version-vector context of
//! everything the container knows about. The per-vnode **node clock**
//! ([`NodeClock`]) is a bitmapped version vector — a contiguous base plus an
//! out-of-order bitmap per node — compact enough to compare in one message.
//! Anti-entropy ships exactly the keys whose dots a peer is missing, then
//! garbage-collects the [`KeyLog`] and strips per-key contexts the clock now
//! covers, so causal metadata shrinks as knowledge converges.
//!
//! Each vnode is a single-threaded actor: spawn it with
//! [`VnodeHandle::spawn`] and drive it through the async handle, or call the
//! [`Vnode`] handlers directly when you own the serialization. Object
//! storage is pluggable through [`store::Store`], with an in-memory default
//! and a persistent `redb` backend; vnode causal state is flushed to a
//! [`state::StateStore`] every [`Config::update_limit`] writes and on
//! shutdown.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod actor;
pub mod clock;
pub mod config;
pub mod dcc;
pub mod keylog;
pub mod ring;
pub mod state;
pub mod stats;
pub mod store;
pub mod sync;
pub mod vnode;

pub use self::actor::VnodeHandle;
pub use self::clock::{BitmappedVersion, Counter, Dot, NodeClock, NodeId, VersionVector};
pub use self::config::{Backend, Config};
pub use self::dcc::DottedCausalContainer;
pub use self::keylog::KeyLog;
pub use self::ring::Ring;
pub use self::stats::{NoopStats, Stats};
pub use self::sync::{sync_pair, SyncOutcome};
pub use self::vnode::{
    MissingObjects, PeerView, ReadReply, ReplicaInfo, SyncError, Vnode, WriteOp,
};
