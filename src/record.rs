use {
    super::{Address, ClusterAddress, ReplicaChangeListener},
    parking_lot::RwLock,
    std::{
        array::from_fn,
        fmt,
        hash::{Hash, Hasher},
        sync::Arc,
    },
    tracing::{debug, trace},
};

/// Number of replica slots held for every partition.
///
/// Rank 0 is the owner, ranks `1..MAX_REPLICA_COUNT` are backups.
pub const MAX_REPLICA_COUNT: usize = 7;

/// Highest number of backups a partition can have.
pub const MAX_BACKUP_COUNT: usize = MAX_REPLICA_COUNT - 1;

/// Identifier of a keyspace partition.
pub type PartitionId = u32;

/// Shared, optional change listener of a record.
pub(crate) type SharedListener = Arc<dyn ReplicaChangeListener>;

/// Replica assignment of a single partition.
///
/// Holds the ordered list of members that store the partition: the owner at
/// rank 0, followed by backups in replication priority order. Ranks are kept
/// dense, i.e. an empty slot is never followed by an occupied one once a
/// mutation sequence has completed.
///
/// Every slot is guarded by its own lock, so readers and writers of different
/// ranks never contend. Consistency across slots is best-effort: a reader that
/// races with [`on_dead_address()`](Self::on_dead_address) can observe the
/// assignment mid-shift. Use [`copy()`](Self::copy) or
/// [`replicas()`](Self::replicas) to obtain a point-in-time view.
pub struct PartitionReplicaRecord<A: Address = ClusterAddress> {
    partition_id: PartitionId,
    replicas: [RwLock<Option<A>>; MAX_REPLICA_COUNT],
    listener: Option<SharedListener>,
}

impl<A: Address> PartitionReplicaRecord<A> {
    /// Creates a record with all replica slots empty.
    ///
    /// When `listener` is present, it is notified about every slot change.
    pub fn new(
        partition_id: PartitionId,
        listener: Option<Arc<dyn ReplicaChangeListener>>,
    ) -> Self {
        Self {
            partition_id,
            replicas: from_fn(|_| RwLock::new(None)),
            listener,
        }
    }

    /// Creates a record that does not report changes.
    pub fn unobserved(partition_id: PartitionId) -> Self {
        Self::new(partition_id, None)
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Whether changes of this record are reported to a listener.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns the owner (primary replica) of the partition.
    ///
    /// `None` means the partition is currently unassigned, which is a valid
    /// transient state during startup or right after the owner failed.
    pub fn owner(&self) -> Option<A> {
        self.replica_address(0)
    }

    /// Sets the owner of the partition.
    ///
    /// Equivalent to `set_replica_address(0, address)`.
    pub fn set_owner(&self, address: Option<A>) {
        self.set_replica_address(0, address)
    }

    /// Returns the member at the given rank.
    ///
    /// Ranks beyond the slot capacity are reported as empty, callers probe
    /// ranks without checking the configured replication factor first.
    pub fn replica_address(&self, index: usize) -> Option<A> {
        self.replicas.get(index)?.read().clone()
    }

    /// Replaces the member at the given rank.
    ///
    /// This is the only mutation primitive of the record, everything else is
    /// expressed as a sequence of calls to it. The listener is notified iff
    /// the stored value actually changed. Notification happens after the slot
    /// lock is released, so the listener observes the new value.
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_REPLICA_COUNT`.
    pub fn set_replica_address(&self, index: usize, address: Option<A>) {
        assert!(
            index < MAX_REPLICA_COUNT,
            "replica index {index} out of range [0, {MAX_REPLICA_COUNT})"
        );

        let previous = {
            let mut slot = self.replicas[index].write();
            std::mem::replace(&mut *slot, address.clone())
        };

        if previous != address {
            trace!(
                partition_id = self.partition_id,
                index,
                ?previous,
                current = ?address,
                "replica changed"
            );
            if let Some(listener) = &self.listener {
                listener.on_replica_table_changed();
            }
        }
    }

    /// Returns a point-in-time copy of all replica slots, in rank order.
    pub fn replicas(&self) -> [Option<A>; MAX_REPLICA_COUNT] {
        from_fn(|i| self.replicas[i].read().clone())
    }

    /// Number of occupied replica slots.
    pub fn replica_count(&self) -> usize {
        self.replicas.iter().filter(|slot| slot.read().is_some()).count()
    }

    /// Creates an independent copy of this record.
    ///
    /// The copy shares the listener with the original, but owns its slots:
    /// later changes to either record are not visible through the other.
    /// The copy is filled rank by rank through
    /// [`set_replica_address()`](Self::set_replica_address), so the shared
    /// listener is notified once per occupied slot.
    pub fn copy(&self) -> Self {
        let copy = Self::new(self.partition_id, self.listener.clone());
        for (index, replica) in self.replicas().into_iter().enumerate() {
            copy.set_replica_address(index, replica);
        }
        copy
    }

    /// Overwrites all replica slots with the ones of `other`.
    ///
    /// Slots are written one by one in rank order, so the listener is notified
    /// once per slot that actually changed.
    pub fn apply_from(&self, other: &PartitionReplicaRecord<A>) {
        for index in 0..MAX_REPLICA_COUNT {
            self.set_replica_address(index, other.replica_address(index));
        }
    }

    /// Whether `address` is one of the first `backup_count` backups.
    ///
    /// The owner rank is not considered. Backup count beyond the slot capacity
    /// is clamped to [`MAX_BACKUP_COUNT`].
    pub fn is_backup(&self, address: &A, backup_count: usize) -> bool {
        self.holds_within(address, 1, backup_count)
    }

    /// Whether `address` is the owner or one of the first `backup_count`
    /// backups.
    pub fn is_owner_or_backup(&self, address: &A, backup_count: usize) -> bool {
        self.holds_within(address, 0, backup_count)
    }

    /// Returns the rank occupied by `address`, if any.
    pub fn replica_index_of(&self, address: &A) -> Option<usize> {
        self.replicas
            .iter()
            .position(|slot| (*slot.read()).as_ref() == Some(address))
    }

    /// Removes a dead member from the replica list.
    ///
    /// Members ranked below the dead one move up by one rank, preserving
    /// their relative order, and the last rank is cleared. Only the first
    /// occurrence is removed. If the record does not hold `dead`, nothing
    /// happens.
    ///
    /// Returns the rank the dead member was removed from.
    pub fn on_dead_address(&self, dead: &A) -> Option<usize> {
        let rank = self.replica_index_of(dead)?;
        debug!(
            partition_id = self.partition_id,
            rank,
            address = %dead,
            "removing dead replica"
        );

        for index in rank..MAX_REPLICA_COUNT - 1 {
            let next = self.replica_address(index + 1);
            self.set_replica_address(index, next);
        }
        self.set_replica_address(MAX_REPLICA_COUNT - 1, None);
        Some(rank)
    }

    /// Scans ranks `[from, min(backup_count, MAX_BACKUP_COUNT)]`.
    fn holds_within(&self, address: &A, from: usize, backup_count: usize) -> bool {
        let upto = backup_count.saturating_add(1).min(MAX_REPLICA_COUNT);
        (from..upto).any(|index| (*self.replicas[index].read()).as_ref() == Some(address))
    }
}

impl<A: Address> Clone for PartitionReplicaRecord<A> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<A: Address> PartialEq for PartitionReplicaRecord<A> {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.partition_id == other.partition_id && self.replicas() == other.replicas()
    }
}

impl<A: Address> Eq for PartitionReplicaRecord<A> {}

impl<A: Address> Hash for PartitionReplicaRecord<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition_id.hash(state);
        for replica in self.replicas() {
            match replica {
                Some(address) => address.hash(state),
                None => 0u8.hash(state),
            }
        }
    }
}

impl<A: Address> fmt::Display for PartitionReplicaRecord<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partition [{}]{{", self.partition_id)?;
        for (index, replica) in self.replicas().iter().enumerate() {
            if let Some(address) = replica {
                writeln!(f, "{index}:{address}")?;
            }
        }
        write!(f, "}}")
    }
}

impl<A: Address> fmt::Debug for PartitionReplicaRecord<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionReplicaRecord")
            .field("partition_id", &self.partition_id)
            .field("replicas", &self.replicas())
            .field("has_listener", &self.has_listener())
            .finish()
    }
}
