//! Partition ownership ledger.
//!
//! The keyspace of a partitioned data store is divided into a fixed number of
//! partitions. Each partition is held by an owner and up to six backups, in
//! replication priority order. This crate records who holds which partition
//! at which rank, reports every change of that assignment, and repairs the
//! assignment when a member dies.
//!
//! ```
//! use partition_ledger::{ChangeCounter, ClusterAddress, PartitionReplicaRecord};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(ChangeCounter::new());
//! let record = PartitionReplicaRecord::new(0, Some(counter.clone()));
//!
//! let n1: ClusterAddress = "10.0.0.1:5701".parse().unwrap();
//! let n2: ClusterAddress = "10.0.0.2:5701".parse().unwrap();
//! record.set_owner(Some(n1));
//! record.set_replica_address(1, Some(n2));
//!
//! record.on_dead_address(&n1);
//! assert_eq!(record.owner(), Some(n2));
//! assert_eq!(counter.count(), 4);
//! ```

mod address;
mod builder;
mod error;
mod listener;
mod record;
mod table;


pub use {
    address::{Address, ClusterAddress},
    builder::{DEFAULT_BACKUP_COUNT, DEFAULT_PARTITION_COUNT, PartitionTableBuilder},
    error::{LedgerError, LedgerResult},
    listener::{ChangeCounter, FnListener, ReplicaChangeListener},
    record::{MAX_BACKUP_COUNT, MAX_REPLICA_COUNT, PartitionId, PartitionReplicaRecord},
    table::{PartitionLostEvent, PartitionTable},
};
