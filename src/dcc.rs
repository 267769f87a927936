//! Dotted causal containers: the per-key value type.
//!
//! A [`DottedCausalContainer`] carries the currently live, possibly
//! concurrent values of one key, each tagged with the [`Dot`] of the write
//! that produced it, together with a causal context summarizing every write
//! event the container knows about (surviving or not). Merging two containers
//! with [`sync`](DottedCausalContainer::sync) is a join: a dot survives
//! unless the other side's context proves it obsolete.
//!
//! [`strip`](DottedCausalContainer::strip) and
//! [`fill`](DottedCausalContainer::fill) are duals against the node clock:
//! strip drops context entries the clock already covers before a container
//! is stored, fill saturates the context back on read so downstream code
//! always sees the complete causal view.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::{Dot, NodeClock, VersionVector};
#[cfg(test)]
use crate::clock::{Counter, NodeId};

/// A set of concurrent dotted values plus their causal context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DottedCausalContainer {
    dots: BTreeMap<Dot, Bytes>,
    ctx: VersionVector,
}

impl DottedCausalContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the container holds no values and no context.
    ///
    /// An empty container after [`strip`](Self::strip) is the signal to
    /// delete the key from storage.
    pub fn is_empty(&self) -> bool {
        self.dots.is_empty() && self.ctx.is_empty()
    }

    /// The causal context.
    pub fn context(&self) -> &VersionVector {
        &self.ctx
    }

    /// The live values.
    pub fn values(&self) -> impl Iterator<Item = &Bytes> {
        self.dots.values()
    }

    /// The live `(dot, value)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&Dot, &Bytes)> {
        self.dots.iter()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.dots.len()
    }

    /// Add a new dotted value and record its event in the context.
    pub fn add(&mut self, dot: Dot, value: Bytes) {
        self.dots.insert(dot, value);
        self.ctx.insert(dot.0, dot.1);
    }

    /// Merge with another container.
    ///
    /// A dot survives if both sides hold it, or if only one side holds it
    /// and the other side's context does not dominate it (the other side
    /// never saw the write, rather than saw and superseded it). The context
    /// becomes the pointwise maximum. Commutative, associative, idempotent.
    pub fn sync(&mut self, mut other: Self) {
        let ours = std::mem::take(&mut self.dots);
        for (dot @ (id, counter), value) in ours {
            if other.dots.remove(&dot).is_some() || counter > other.ctx.get(id) {
                self.dots.insert(dot, value);
            }
        }
        for (dot @ (id, counter), value) in other.dots {
            if counter > self.ctx.get(id) {
                self.dots.insert(dot, value);
            }
        }
        self.ctx.merge(&other.ctx);
    }

    /// Drop every value the client context has already observed, and absorb
    /// that context. Applied at write time so a delete or overwrite is
    /// causally meaningful.
    pub fn discard(&mut self, ctx: &VersionVector) {
        self.dots.retain(|&(id, counter), _| counter > ctx.get(id));
        self.ctx.merge(ctx);
    }

    /// Remove context entries the node clock's contiguous base already
    /// covers. Values are untouched.
    pub fn strip(&mut self, clock: &NodeClock) {
        self.ctx
            .retain(|&id, counter| *counter > clock.base_of(id));
    }

    /// Saturate the context with the node clock's contiguous base.
    pub fn fill(&mut self, clock: &NodeClock) {
        for (&id, entry) in clock.iter() {
            self.ctx.insert(id, entry.base());
        }
    }

    /// Record every event this container knows about into `clock`: the live
    /// dots and the context entries (each context entry is itself the dot of
    /// a superseded write to this key).
    pub fn add_to_clock(&self, clock: &mut NodeClock) {
        for &(id, counter) in self.dots.keys() {
            clock.add(id, counter);
        }
        for (&id, &counter) in self.ctx.iter() {
            clock.add(id, counter);
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts<const N: usize, const M: usize>(
        dots: [(Dot, &'static str); N],
        ctx: [(NodeId, Counter); M],
    ) -> Self {
        Self {
            dots: dots
                .into_iter()
                .map(|(d, v)| (d, Bytes::from_static(v.as_bytes())))
                .collect(),
            ctx: ctx.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::clock::BitmappedVersion;

    #[test]
    fn add_records_dot_and_context() {
        let mut dcc = DottedCausalContainer::new();
        dcc.add((1, 8), Bytes::from_static(b"red"));
        dcc.add((2, 2), Bytes::from_static(b"green"));
        assert_eq!(dcc.len(), 2);
        assert_eq!(dcc.context().get(1), 8);
        assert_eq!(dcc.context().get(2), 2);
    }

    #[test]
    fn sync_keeps_concurrent_drops_superseded() {
        let a = DottedCausalContainer::from_parts(
            [((1, 1), "black"), ((1, 3), "red"), ((2, 1), "green"), ((2, 2), "green")],
            [(1, 4), (2, 7)],
        );
        let b = DottedCausalContainer::from_parts(
            [((1, 2), "gray"), ((1, 3), "red"), ((1, 5), "red"), ((2, 2), "green")],
            [(1, 5), (2, 5)],
        );
        let expected = DottedCausalContainer::from_parts(
            [((1, 3), "red"), ((1, 5), "red"), ((2, 2), "green")],
            [(1, 5), (2, 7)],
        );

        let mut ab = a.clone();
        ab.sync(b.clone());
        assert_eq!(ab, expected);
        let mut ba = b;
        ba.sync(a);
        assert_eq!(ba, expected);
    }

    #[test]
    fn discard_drops_observed_values() {
        let mut dcc = DottedCausalContainer::from_parts(
            [((1, 1), "black"), ((1, 3), "red"), ((2, 1), "green"), ((2, 2), "green")],
            [(1, 4), (2, 7)],
        );
        let ctx: VersionVector = [(1, 2), (2, 15), (3, 15)].into_iter().collect();
        dcc.discard(&ctx);
        assert_eq!(
            dcc,
            DottedCausalContainer::from_parts([((1, 3), "red")], [(1, 4), (2, 15), (3, 15)])
        );
    }

    #[test]
    fn discard_everything_leaves_context_only() {
        let mut dcc = DottedCausalContainer::from_parts([((1, 1), "v")], [(1, 1)]);
        let ctx: VersionVector = [(1, 1)].into_iter().collect();
        dcc.discard(&ctx);
        assert_eq!(dcc.len(), 0);
        assert!(!dcc.is_empty());
    }

    fn clock_with_bases(bases: &[(NodeId, Counter)]) -> NodeClock {
        let mut clock = NodeClock::new();
        for &(id, base) in bases {
            clock.insert_entry(id, BitmappedVersion::new(base, 0));
        }
        clock
    }

    #[test]
    fn strip_removes_covered_context() {
        let mut dcc = DottedCausalContainer::from_parts([((1, 5), "v")], [(1, 5), (2, 3)]);
        dcc.strip(&clock_with_bases(&[(1, 5), (2, 2)]));
        assert_eq!(dcc.context().get(1), 0);
        assert_eq!(dcc.context().get(2), 3);
        assert_eq!(dcc.len(), 1);
    }

    #[test]
    fn stripped_empty_container_signals_delete() {
        let mut dcc = DottedCausalContainer::from_parts([], [(1, 2)]);
        dcc.strip(&clock_with_bases(&[(1, 2)]));
        assert!(dcc.is_empty());
    }

    #[test]
    fn fill_saturates_with_bases() {
        let mut dcc = DottedCausalContainer::from_parts([((1, 5), "v")], [(2, 9)]);
        dcc.fill(&clock_with_bases(&[(1, 3), (2, 4), (3, 7)]));
        // Bases only raise the context, never lower it.
        assert_eq!(dcc.context().get(1), 3);
        assert_eq!(dcc.context().get(2), 9);
        assert_eq!(dcc.context().get(3), 7);
    }

    prop_compose! {
        fn arb_dcc()(
            dots in prop::collection::btree_map((1u64..4, 1u64..8), "[a-z]{1,4}", 0..4),
            ctx in prop::collection::btree_map(1u64..4, 1u64..8, 0..4),
        ) -> DottedCausalContainer {
            let mut dcc = DottedCausalContainer {
                dots: dots
                    .into_iter()
                    .map(|(d, v)| (d, Bytes::from(v.into_bytes())))
                    .collect(),
                ctx: ctx.into_iter().collect(),
            };
            // A container always knows about its own live dots.
            let dots: Vec<Dot> = dcc.dots.keys().copied().collect();
            for (id, counter) in dots {
                dcc.ctx.insert(id, counter);
            }
            dcc
        }
    }

    proptest! {
        #[test]
        fn sync_is_commutative(a in arb_dcc(), b in arb_dcc()) {
            let mut ab = a.clone();
            ab.sync(b.clone());
            let mut ba = b;
            ba.sync(a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn sync_is_associative(a in arb_dcc(), b in arb_dcc(), c in arb_dcc()) {
            let mut left = a.clone();
            left.sync(b.clone());
            left.sync(c.clone());
            let mut right = b;
            right.sync(c);
            let mut outer = a;
            outer.sync(right);
            prop_assert_eq!(left, outer);
        }

        #[test]
        fn sync_is_idempotent(a in arb_dcc()) {
            let mut aa = a.clone();
            aa.sync(a.clone());
            prop_assert_eq!(aa, a);
        }

        #[test]
        fn discard_leaves_no_dominated_dots(a in arb_dcc(), ctx in prop::collection::btree_map(1u64..4, 1u64..8, 0..4)) {
            let ctx: VersionVector = ctx.into_iter().collect();
            let mut d = a;
            d.discard(&ctx);
            for (&(id, counter), _) in d.entries() {
                prop_assert!(counter > ctx.get(id));
            }
        }

        #[test]
        fn strip_after_fill_equals_strip(a in arb_dcc(), bases in prop::collection::vec((1u64..4, 0u64..8), 0..4)) {
            let clock = clock_with_bases(&bases);
            let mut filled = a.clone();
            filled.fill(&clock);
            filled.strip(&clock);
            let mut stripped = a.clone();
            stripped.strip(&clock);
            prop_assert_eq!(&filled, &stripped);

            // And fill after strip restores the same live dots.
            let mut refilled = stripped;
            refilled.fill(&clock);
            let live: Vec<_> = refilled.entries().collect();
            let orig: Vec<_> = a.entries().collect();
            prop_assert_eq!(live, orig);
        }
    }
}
