//! Driving a pairwise anti-entropy round.
//!
//! The engine is strictly reactive; something has to chain the three
//! protocol messages. [`sync_pair`] is that driver for in-process vnodes:
//! ask the initiator for its view of the peer, forward it to the peer, and
//! apply the reply back at the initiator. Timeouts and scheduling are the
//! caller's concern — an abandoned round is harmless, because a partially
//! applied `sync_response` is still a valid merge and the next round
//! retries.

use anyhow::Result;

use crate::actor::VnodeHandle;

/// Outcome of one sync round, from the initiator's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Keys the peer shipped.
    pub keys_received: usize,
    /// Keys that actually changed locally after merging.
    pub keys_applied: usize,
    /// Keylog slots the peer garbage-collected once this round's
    /// acknowledgement came in.
    pub truncated: usize,
}

/// Run one anti-entropy round: `initiator` pulls what it is missing from
/// `peer`.
pub async fn sync_pair(initiator: &VnodeHandle, peer: &VnodeHandle) -> Result<SyncOutcome> {
    let view = initiator.sync_start(peer.id()).await?;
    let missing = peer.sync_request(view.from, view.entry).await?;
    let keys_received = missing.objects.len();
    let truncated = missing.truncated;
    let keys_applied = initiator
        .sync_response(missing.from, missing.clock_base, missing.objects)
        .await?;
    Ok(SyncOutcome {
        keys_received,
        keys_applied,
        truncated,
    })
}
