use {
    super::{
        Address,
        ChangeCounter,
        ClusterAddress,
        LedgerError,
        LedgerResult,
        MAX_REPLICA_COUNT,
        PartitionId,
        PartitionReplicaRecord,
        ReplicaChangeListener,
        record::SharedListener,
    },
    parking_lot::{Mutex, MutexGuard},
    rapidhash::RapidBuildHasher,
    std::{
        hash::{BuildHasher, Hash},
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
    },
    tracing::{debug, warn},
};

/// Partition lost all of its replicas.
///
/// Emitted when a dead member was the last one holding the partition, so
/// neither an owner nor a backup that could be promoted remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLostEvent<A: Address = ClusterAddress> {
    partition_id: PartitionId,
    event_source: A,
}

impl<A: Address> PartitionLostEvent<A> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Member whose death caused the loss.
    pub fn event_source(&self) -> &A {
        &self.event_source
    }
}

/// Listener installed on every record of a table.
///
/// Counts changes to version the table, and forwards to the user listener.
/// While a table mutation holds the lock, forwarding is deferred until the
/// lock is released, so the user listener may call back into the table.
struct TableListener {
    version: ChangeCounter,
    forward: Option<SharedListener>,
    deferring: AtomicBool,
    deferred: AtomicU64,
}

impl TableListener {
    fn new(forward: Option<SharedListener>) -> Self {
        Self {
            version: ChangeCounter::new(),
            forward,
            deferring: AtomicBool::new(false),
            deferred: AtomicU64::new(0),
        }
    }

    /// Delivers the notifications held back so far.
    fn flush(&self) {
        let Some(listener) = &self.forward else {
            return;
        };
        for _ in 0..self.deferred.swap(0, Ordering::SeqCst) {
            listener.on_replica_table_changed();
        }
    }
}

impl ReplicaChangeListener for TableListener {
    fn on_replica_table_changed(&self) {
        self.version.on_replica_table_changed();
        if self.forward.is_none() {
            return;
        }
        self.deferred.fetch_add(1, Ordering::SeqCst);
        if !self.deferring.load(Ordering::SeqCst) {
            self.flush();
        }
    }
}

/// Exclusive access to the records of a table.
///
/// Held back notifications are delivered after the lock is released.
struct Mutation<'a> {
    lock: Option<MutexGuard<'a, ()>>,
    listener: &'a TableListener,
}

impl Drop for Mutation<'_> {
    fn drop(&mut self) {
        self.listener.deferring.store(false, Ordering::SeqCst);
        self.lock.take();
        self.listener.flush();
    }
}

/// Replica assignment of the whole keyspace.
///
/// Owns one [`PartitionReplicaRecord`] per partition. The number of
/// partitions is fixed at construction. Keys are routed to partitions by
/// hashing them with the table's hasher.
///
/// Mutations issued through the table are serialized, so multi-slot updates
/// of a record never interleave. They also keep every record densely ranked
/// and free of duplicate members. Reads go straight to the records and are
/// never blocked by a mutation in progress.
pub struct PartitionTable<A: Address = ClusterAddress, H: BuildHasher = RapidBuildHasher> {
    partitions: Vec<PartitionReplicaRecord<A>>,
    backup_count: usize,
    listener: Arc<TableListener>,
    build_hasher: H,
    mutation: Mutex<()>,
}

impl<A: Address, H: BuildHasher> PartitionTable<A, H> {
    /// Creates a table with every partition unassigned.
    ///
    /// Arguments are expected to be validated by the builder.
    pub(crate) fn with_build_hasher(
        partition_count: u32,
        backup_count: usize,
        forward: Option<SharedListener>,
        build_hasher: H,
    ) -> Self {
        let listener = Arc::new(TableListener::new(forward));
        let partitions = (0..partition_count)
            .map(|id| {
                let listener: SharedListener = listener.clone();
                PartitionReplicaRecord::new(id, Some(listener))
            })
            .collect();

        Self {
            partitions,
            backup_count,
            listener,
            build_hasher,
            mutation: Mutex::new(()),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Configured number of backups per partition.
    pub fn backup_count(&self) -> usize {
        self.backup_count
    }

    /// Number of replica slot changes applied to the table so far.
    pub fn version(&self) -> u64 {
        self.listener.version.count()
    }

    /// Returns the record of the given partition.
    pub fn partition(&self, id: PartitionId) -> Option<&PartitionReplicaRecord<A>> {
        self.partitions.get(id as usize)
    }

    /// Iterator over all records, in partition id order.
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionReplicaRecord<A>> {
        self.partitions.iter()
    }

    /// Returns the partition the given key belongs to.
    pub fn partition_id<K: Hash + ?Sized>(&self, key: &K) -> PartitionId {
        let hash = self.build_hasher.hash_one(key);
        (hash % self.partitions.len() as u64) as PartitionId
    }

    /// Returns the current owner of the partition the key belongs to.
    pub fn owner_of<K: Hash + ?Sized>(&self, key: &K) -> Option<A> {
        self.partitions[self.partition_id(key) as usize].owner()
    }

    pub fn set_owner(&self, id: PartitionId, address: Option<A>) -> LedgerResult<()> {
        self.set_replica_address(id, 0, address)
    }

    /// Assigns a member to the given rank of the given partition.
    ///
    /// Unlike the record level primitive, out of range arguments are reported
    /// as errors. The assignment is rejected if the member already holds
    /// another rank of the partition, if it would be placed above an empty
    /// rank, or if clearing the rank would leave an occupied rank behind it.
    pub fn set_replica_address(
        &self,
        id: PartitionId,
        index: usize,
        address: Option<A>,
    ) -> LedgerResult<()> {
        if index >= MAX_REPLICA_COUNT {
            return Err(LedgerError::ReplicaIndexOutOfRange(index));
        }
        let record = self
            .partition(id)
            .ok_or(LedgerError::PartitionOutOfRange(id))?;

        let _mutation = self.lock();
        check_assignment(record, index, address.as_ref())?;
        record.set_replica_address(index, address);
        Ok(())
    }

    /// Removes a dead member from every partition it holds.
    ///
    /// Returns the partitions that were left without any replica.
    pub fn on_dead_address(&self, dead: &A) -> Vec<PartitionLostEvent<A>> {
        let _mutation = self.lock();
        let mut lost = Vec::new();
        for record in &self.partitions {
            // Records written directly, bypassing the table, may hold the
            // member more than once.
            let mut removed = false;
            while record.on_dead_address(dead).is_some() {
                removed = true;
            }
            if !removed {
                continue;
            }

            if record.owner().is_none() {
                warn!(
                    partition_id = record.partition_id(),
                    address = %dead,
                    "partition lost all replicas"
                );
                lost.push(PartitionLostEvent {
                    partition_id: record.partition_id(),
                    event_source: dead.clone(),
                });
            }
        }
        lost
    }

    /// Partitions owned by the given member.
    pub fn owned_partitions(&self, address: &A) -> Vec<PartitionId> {
        self.filter_ids(|record| record.owner().as_ref() == Some(address))
    }

    /// Partitions for which the given member is one of the configured backups.
    pub fn backup_partitions(&self, address: &A) -> Vec<PartitionId> {
        self.filter_ids(|record| record.is_backup(address, self.backup_count))
    }

    /// Point-in-time copy of every record.
    ///
    /// The copies are detached from the table's listener: changing them does
    /// not affect the table's version or notify anybody.
    pub fn snapshot(&self) -> Vec<PartitionReplicaRecord<A>> {
        self.partitions
            .iter()
            .map(|record| {
                let copy = PartitionReplicaRecord::unobserved(record.partition_id());
                copy.apply_from(record);
                copy
            })
            .collect()
    }

    /// Adopts an authoritative assignment for the whole table.
    ///
    /// The snapshot is validated before any record is touched: it must cover
    /// every partition in id order, with densely ranked, distinct members.
    /// Each record then absorbs its counterpart slot by slot.
    pub fn apply_snapshot(&self, snapshot: &[PartitionReplicaRecord<A>]) -> LedgerResult<()> {
        if snapshot.len() != self.partitions.len() {
            return Err(LedgerError::PartitionCountMismatch {
                expected: self.partitions.len(),
                actual: snapshot.len(),
            });
        }
        if let Some((record, other)) = self
            .partitions
            .iter()
            .zip(snapshot)
            .find(|(record, other)| record.partition_id() != other.partition_id())
        {
            return Err(LedgerError::PartitionIdMismatch {
                expected: record.partition_id(),
                actual: other.partition_id(),
            });
        }
        snapshot.iter().try_for_each(check_dense)?;

        let _mutation = self.lock();
        let version = self.version();
        for (record, other) in self.partitions.iter().zip(snapshot) {
            record.apply_from(other);
        }
        debug!(changes = self.version() - version, "applied partition table snapshot");

        Ok(())
    }

    /// Partitions whose assignment differs from the given snapshot.
    ///
    /// Partitions missing from either side are reported as different.
    pub fn diff(&self, snapshot: &[PartitionReplicaRecord<A>]) -> Vec<PartitionId> {
        let mut changed: Vec<PartitionId> = self
            .partitions
            .iter()
            .zip(snapshot)
            .filter(|(record, other)| record != other)
            .map(|(record, _)| record.partition_id())
            .collect();
        let common = self.partitions.len().min(snapshot.len());
        changed.extend(self.partitions.iter().skip(common).map(|r| r.partition_id()));
        changed.extend(snapshot.iter().skip(common).map(|r| r.partition_id()));
        changed
    }

    fn lock(&self) -> Mutation<'_> {
        let lock = self.mutation.lock();
        self.listener.deferring.store(true, Ordering::SeqCst);
        Mutation {
            lock: Some(lock),
            listener: &self.listener,
        }
    }

    fn filter_ids<F>(&self, predicate: F) -> Vec<PartitionId>
    where
        F: Fn(&PartitionReplicaRecord<A>) -> bool,
    {
        self.partitions
            .iter()
            .filter(|record| predicate(record))
            .map(|record| record.partition_id())
            .collect()
    }
}

/// Checks that writing `address` at `index` keeps the record dense and free of
/// duplicates.
fn check_assignment<A: Address>(
    record: &PartitionReplicaRecord<A>,
    index: usize,
    address: Option<&A>,
) -> LedgerResult<()> {
    let partition_id = record.partition_id();
    match address {
        Some(address) => {
            if let Some(held) = record.replica_index_of(address).filter(|held| *held != index) {
                return Err(LedgerError::DuplicateReplica {
                    partition_id,
                    index: held,
                });
            }
            if index > 0 && record.replica_address(index - 1).is_none() {
                return Err(LedgerError::ReplicaGap {
                    partition_id,
                    index: index - 1,
                });
            }
        }
        None => {
            if record.replica_address(index + 1).is_some() {
                return Err(LedgerError::ReplicaGap {
                    partition_id,
                    index,
                });
            }
        }
    }
    Ok(())
}

/// Checks that a record is densely ranked and free of duplicates.
fn check_dense<A: Address>(record: &PartitionReplicaRecord<A>) -> LedgerResult<()> {
    let partition_id = record.partition_id();
    let replicas = record.replicas();
    let occupied = replicas.iter().take_while(|replica| replica.is_some()).count();

    if replicas[occupied..].iter().any(Option::is_some) {
        return Err(LedgerError::ReplicaGap {
            partition_id,
            index: occupied,
        });
    }
    for (index, replica) in replicas[..occupied].iter().enumerate() {
        if let Some(held) = replicas[..index].iter().position(|other| other == replica) {
            return Err(LedgerError::DuplicateReplica {
                partition_id,
                index: held,
            });
        }
    }
    Ok(())
}
