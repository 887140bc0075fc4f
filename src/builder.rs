use {
    super::{
        Address,
        LedgerError,
        LedgerResult,
        MAX_BACKUP_COUNT,
        PartitionTable,
        ReplicaChangeListener,
        record::SharedListener,
    },
    rapidhash::RapidBuildHasher,
    std::{hash::BuildHasher, marker::PhantomData, sync::Arc},
};

/// Number of partitions when not configured otherwise.
pub const DEFAULT_PARTITION_COUNT: u32 = 271;

/// Number of backups per partition when not configured otherwise.
pub const DEFAULT_BACKUP_COUNT: usize = 1;

/// Partition table builder.
pub struct PartitionTableBuilder<A: Address, H: BuildHasher = RapidBuildHasher> {
    partition_count: u32,
    backup_count: usize,
    listener: Option<SharedListener>,
    build_hasher: H,
    _address: PhantomData<A>,
}

impl<A: Address> Default for PartitionTableBuilder<A> {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_COUNT)
    }
}

impl<A: Address> PartitionTableBuilder<A> {
    /// Create new builder for a table with the given number of partitions.
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count,
            backup_count: DEFAULT_BACKUP_COUNT,
            listener: None,
            build_hasher: RapidBuildHasher::default(),
            _address: PhantomData,
        }
    }
}

impl<A: Address, H: BuildHasher> PartitionTableBuilder<A, H> {
    /// Set the number of backups each partition is expected to have.
    pub fn with_backup_count(mut self, backup_count: usize) -> Self {
        self.backup_count = backup_count;
        self
    }

    /// Set the listener notified about every replica change in the table.
    ///
    /// Notifications caused by a table mutation are delivered once the
    /// mutation has released the table, so the listener may call back into
    /// the table. They are delivered on the mutating thread.
    pub fn with_listener<L: ReplicaChangeListener + 'static>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Transform the builder into one routing keys with a different hasher.
    pub fn with_build_hasher<CustomH: BuildHasher>(
        self,
        build_hasher: CustomH,
    ) -> PartitionTableBuilder<A, CustomH> {
        PartitionTableBuilder {
            partition_count: self.partition_count,
            backup_count: self.backup_count,
            listener: self.listener,
            build_hasher,
            _address: PhantomData,
        }
    }

    /// Build the partition table.
    pub fn build(self) -> LedgerResult<PartitionTable<A, H>> {
        if self.partition_count == 0 {
            return Err(LedgerError::ZeroPartitions);
        }
        if self.backup_count > MAX_BACKUP_COUNT {
            return Err(LedgerError::BackupCountTooHigh(self.backup_count));
        }

        Ok(PartitionTable::with_build_hasher(
            self.partition_count,
            self.backup_count,
            self.listener,
            self.build_hasher,
        ))
    }
}
