//! A vnode served from its own thread.
//!
//! Every command is serialized through one mailbox and processed to
//! completion before the next, so the engine mutates freely with no locks.
//! [`VnodeHandle`] is the cheap, cloneable sender side; replies travel back
//! over per-command oneshot channels.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{error_span, trace, warn};

use crate::{
    clock::{BitmappedVersion, NodeClock, NodeId, VersionVector},
    dcc::DottedCausalContainer,
    store::Store,
    vnode::{MissingObjects, PeerView, ReadReply, Vnode, WriteOp},
};

#[derive(derive_more::Debug, strum::Display)]
enum Command {
    Read {
        key: Bytes,
        #[debug("reply")]
        reply: oneshot::Sender<Result<ReadReply>>,
    },
    Repair {
        key: Bytes,
        dcc: DottedCausalContainer,
    },
    Write {
        op: WriteOp,
        key: Bytes,
        ctx: VersionVector,
        #[debug("reply")]
        reply: oneshot::Sender<Result<DottedCausalContainer>>,
    },
    Replicate {
        key: Bytes,
        dcc: DottedCausalContainer,
        #[debug("reply")]
        reply: oneshot::Sender<Result<()>>,
    },
    SyncStart {
        peer: NodeId,
        #[debug("reply")]
        reply: oneshot::Sender<Result<PeerView>>,
    },
    SyncRequest {
        remote_id: NodeId,
        remote_entry: BitmappedVersion,
        #[debug("reply")]
        reply: oneshot::Sender<Result<MissingObjects>>,
    },
    SyncResponse {
        remote_id: NodeId,
        clock_base: NodeClock,
        objects: Vec<(Bytes, DottedCausalContainer)>,
        #[debug("reply")]
        reply: oneshot::Sender<Result<usize>>,
    },
    HandoffItems {
        #[debug("reply")]
        reply: oneshot::Sender<Result<Vec<Bytes>>>,
    },
    HandoffRecv {
        item: Bytes,
        #[debug("reply")]
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        #[debug("reply")]
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Handle to a vnode running on its own thread.
///
/// Dropping every handle shuts the vnode down cleanly (terminal flush and
/// storage close), same as an explicit [`shutdown`](VnodeHandle::shutdown).
#[derive(Debug, Clone)]
pub struct VnodeHandle {
    id: NodeId,
    tx: flume::Sender<Command>,
}

impl VnodeHandle {
    /// Spawn the actor thread for `vnode` and return its handle.
    pub fn spawn<S: Store>(vnode: Vnode<S>) -> VnodeHandle {
        const MAILBOX_CAP: usize = 128;
        let (tx, rx) = flume::bounded(MAILBOX_CAP);
        let id = vnode.id();
        std::thread::spawn(move || {
            let span = error_span!("vnode", id);
            let _enter = span.enter();
            run(vnode, rx);
        });
        VnodeHandle { id, tx }
    }

    /// The vnode's ring position.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Serve a read for `key`.
    pub async fn read(&self, key: Bytes) -> Result<ReadReply> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Read { key, reply }).await?;
        rx.await?
    }

    /// Fire-and-forget a read repair.
    pub async fn repair(&self, key: Bytes, dcc: DottedCausalContainer) -> Result<()> {
        self.send(Command::Repair { key, dcc }).await
    }

    /// Coordinate a write; returns the container to forward to replicas.
    pub async fn write(
        &self,
        op: WriteOp,
        key: Bytes,
        ctx: VersionVector,
    ) -> Result<DottedCausalContainer> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Write {
            op,
            key,
            ctx,
            reply,
        })
        .await?;
        rx.await?
    }

    /// Apply a write coordinated elsewhere.
    pub async fn replicate(&self, key: Bytes, dcc: DottedCausalContainer) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Replicate { key, dcc, reply }).await?;
        rx.await?
    }

    /// Anti-entropy step 1: our view of `peer`.
    pub async fn sync_start(&self, peer: NodeId) -> Result<PeerView> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SyncStart { peer, reply }).await?;
        rx.await?
    }

    /// Anti-entropy step 2: serve a peer's view of us.
    pub async fn sync_request(
        &self,
        remote_id: NodeId,
        remote_entry: BitmappedVersion,
    ) -> Result<MissingObjects> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SyncRequest {
            remote_id,
            remote_entry,
            reply,
        })
        .await?;
        rx.await?
    }

    /// Anti-entropy step 3: apply the peer's missing objects. Returns how
    /// many keys changed.
    pub async fn sync_response(
        &self,
        remote_id: NodeId,
        clock_base: NodeClock,
        objects: Vec<(Bytes, DottedCausalContainer)>,
    ) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SyncResponse {
            remote_id,
            clock_base,
            objects,
            reply,
        })
        .await?;
        rx.await?
    }

    /// Emit the partition's keys as encoded handoff items.
    pub async fn handoff_items(&self) -> Result<Vec<Bytes>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HandoffItems { reply }).await?;
        rx.await?
    }

    /// Apply one handoff item.
    pub async fn handoff_recv(&self, item: Bytes) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HandoffRecv { item, reply }).await?;
        rx.await?
    }

    /// Flush durable state now.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply }).await?;
        rx.await.context("vnode terminated")
    }

    /// Shut the vnode down: terminal flush, close storage, stop the thread.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await.ok();
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send_async(command)
            .await
            .map_err(|_| anyhow!("vnode terminated"))
    }
}

fn run<S: Store>(mut vnode: Vnode<S>, rx: flume::Receiver<Command>) {
    loop {
        let Ok(command) = rx.recv() else {
            // All handles dropped: same cleanup as an explicit shutdown.
            break;
        };
        trace!(%command, "tick");
        if matches!(command, Command::Shutdown) {
            break;
        }
        if let Err(err) = on_command(&mut vnode, command) {
            warn!("failed to send reply: {err}");
        }
    }
    trace!("shutdown");
    vnode.terminate();
}

fn on_command<S: Store>(vnode: &mut Vnode<S>, command: Command) -> Result<()> {
    match command {
        Command::Read { key, reply } => {
            send_reply(reply, vnode.read(&key).map_err(Into::into))
        }
        Command::Repair { key, dcc } => {
            // No reply channel; failures are logged and left to anti-entropy.
            if let Err(err) = vnode.repair(key, dcc) {
                warn!(%err, "repair failed");
            }
            Ok(())
        }
        Command::Write {
            op,
            key,
            ctx,
            reply,
        } => send_reply(reply, vnode.write(op, key, &ctx).map_err(Into::into)),
        Command::Replicate { key, dcc, reply } => {
            send_reply(reply, vnode.replicate(key, dcc).map_err(Into::into))
        }
        Command::SyncStart { peer, reply } => send_reply(reply, Ok(vnode.sync_start(peer))),
        Command::SyncRequest {
            remote_id,
            remote_entry,
            reply,
        } => send_reply(
            reply,
            vnode.sync_request(remote_id, remote_entry).map_err(Into::into),
        ),
        Command::SyncResponse {
            remote_id,
            clock_base,
            objects,
            reply,
        } => send_reply(
            reply,
            vnode
                .sync_response(remote_id, clock_base, objects)
                .map_err(Into::into),
        ),
        Command::HandoffItems { reply } => {
            send_reply(reply, vnode.handoff_items().map_err(Into::into))
        }
        Command::HandoffRecv { item, reply } => {
            send_reply(reply, vnode.handoff_recv(&item).map_err(Into::into))
        }
        Command::Flush { reply } => {
            vnode.flush();
            send_reply(reply, ())
        }
        Command::Shutdown => unreachable!("handled by the run loop"),
    }
}

fn send_reply<T>(sender: oneshot::Sender<T>, value: T) -> Result<()> {
    sender.send(value).map_err(|_| anyhow!("receiver dropped"))
}
