//! Write-only statistics sink.
//!
//! The engine reports events fire-and-forget through a [`Stats`]
//! implementation injected at construction; the default [`NoopStats`]
//! discards everything, which is what tests want.

/// Sink for engine events. All methods default to no-ops so implementations
/// pick only what they care about.
pub trait Stats: Send + Sync + std::fmt::Debug {
    /// A coordinated write finished.
    fn write(&self) {}
    /// A read was served.
    fn read(&self) {}
    /// A read repair was applied.
    fn repair(&self) {}
    /// A replicated write was applied.
    fn replicate(&self) {}
    /// A `sync_request` shipped this many missing keys.
    fn sync_keys_sent(&self, _count: u64) {}
    /// A `sync_response` applied this many remote containers.
    fn sync_keys_applied(&self, _count: u64) {}
    /// The keylog dropped this many acknowledged slots.
    fn keylog_truncated(&self, _count: u64) {}
    /// Vnode state was flushed to the durable store.
    fn flush(&self) {}
}

/// The default sink: discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl Stats for NoopStats {}
