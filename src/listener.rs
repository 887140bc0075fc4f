use {
    auto_impl::auto_impl,
    std::{
        fmt,
        sync::atomic::{AtomicU64, Ordering},
    },
};

/// Receives a signal whenever a replica slot of a record changes.
///
/// The notification carries no payload: a listener that needs to know what
/// changed re-reads the partition table. It is invoked synchronously on the
/// mutating thread, so implementations should only record or enqueue work.
#[auto_impl(&, Arc)]
pub trait ReplicaChangeListener: Send + Sync {
    /// Called once per replica slot whose value actually changed.
    fn on_replica_table_changed(&self);
}

/// Listener that counts received notifications.
#[derive(Debug, Default)]
pub struct ChangeCounter(AtomicU64);

impl ChangeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications received so far.
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

impl ReplicaChangeListener for ChangeCounter {
    fn on_replica_table_changed(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Adapts a closure into a [`ReplicaChangeListener`].
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ReplicaChangeListener for FnListener<F>
where
    F: Fn() + Send + Sync,
{
    fn on_replica_table_changed(&self) {
        (self.0)()
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnListener")
    }
}
