use crate::record::PartitionId;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// Partition table must have at least one partition
    #[error("Partition count must be positive")]
    ZeroPartitions,

    /// Configured backup count exceeds the replica slot capacity
    #[error("Backup count {0} exceeds the maximum of 6")]
    BackupCountTooHigh(usize),

    /// No partition with the given id
    #[error("Partition {0} is out of range")]
    PartitionOutOfRange(PartitionId),

    /// Replica rank outside of `[0, MAX_REPLICA_COUNT)`
    #[error("Replica index {0} is out of range")]
    ReplicaIndexOutOfRange(usize),

    /// Member already holds another rank of the partition
    #[error("Partition {partition_id} already holds the member at rank {index}")]
    DuplicateReplica {
        partition_id: PartitionId,
        index: usize,
    },

    /// Assignment would leave an empty rank below an occupied one
    #[error("Partition {partition_id} would have a gap at rank {index}")]
    ReplicaGap {
        partition_id: PartitionId,
        index: usize,
    },

    /// Snapshot does not cover the same number of partitions
    #[error("Partition count mismatch: expected {expected}, got {actual}")]
    PartitionCountMismatch { expected: usize, actual: usize },

    /// Snapshot record is not aligned with the table's partition id
    #[error("Partition id mismatch: expected {expected}, got {actual}")]
    PartitionIdMismatch {
        expected: PartitionId,
        actual: PartitionId,
    },

    /// Address could not be parsed
    #[error("Invalid cluster address: {0}")]
    InvalidAddress(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
