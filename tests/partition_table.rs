use {
    partition_ledger::{
        ChangeCounter,
        ClusterAddress,
        DEFAULT_BACKUP_COUNT,
        DEFAULT_PARTITION_COUNT,
        FnListener,
        LedgerError,
        PartitionReplicaRecord,
        PartitionTable,
        PartitionTableBuilder,
    },
    std::{
        collections::HashMap,
        hash::{BuildHasherDefault, DefaultHasher},
        net::Ipv4Addr,
        sync::{
            Arc,
            OnceLock,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    },
};

fn node(i: u8) -> ClusterAddress {
    ClusterAddress::new(Ipv4Addr::new(192, 168, 1, i), 5701)
}

/// Round-robin assignment: partition `p` is owned by `nodes[p % n]`, backups
/// are the following nodes.
fn round_robin(table: &PartitionTable, nodes: &[ClusterAddress], backups: usize) {
    for record in table.partitions() {
        let start = record.partition_id() as usize;
        for rank in 0..=backups.min(nodes.len() - 1) {
            let address = nodes[(start + rank) % nodes.len()];
            table
                .set_replica_address(record.partition_id(), rank, Some(address))
                .expect("valid rank");
        }
    }
}

#[test]
fn table_builder() {
    {
        // Defaults
        let table = PartitionTableBuilder::<ClusterAddress>::default()
            .build()
            .expect("default table");
        assert_eq!(table.partition_count(), DEFAULT_PARTITION_COUNT as usize);
        assert_eq!(table.backup_count(), DEFAULT_BACKUP_COUNT);
        assert_eq!(table.version(), 0);
        assert!(table.partitions().all(|record| record.owner().is_none()));
    }

    {
        // Invalid configuration
        let table = PartitionTableBuilder::<ClusterAddress>::new(0).build();
        assert_eq!(table.err(), Some(LedgerError::ZeroPartitions));

        let table = PartitionTableBuilder::<ClusterAddress>::new(16)
            .with_backup_count(7)
            .build();
        assert_eq!(table.err(), Some(LedgerError::BackupCountTooHigh(7)));
    }

    {
        // Custom hasher, max backups
        let table = PartitionTableBuilder::<ClusterAddress>::new(16)
            .with_backup_count(6)
            .with_build_hasher(BuildHasherDefault::<DefaultHasher>::default())
            .build()
            .expect("custom table");
        assert_eq!(table.backup_count(), 6);
        assert!(table.partition_id("key") < 16);
    }
}

#[test]
fn records_are_numbered() {
    let table = PartitionTableBuilder::<ClusterAddress>::new(8).build().unwrap();
    let ids: Vec<_> = table.partitions().map(|record| record.partition_id()).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert_eq!(table.partition(7).map(|r| r.partition_id()), Some(7));
    assert!(table.partition(8).is_none());
}

#[test]
fn checked_mutations() {
    let table = PartitionTableBuilder::new(4).build().unwrap();

    assert_eq!(
        table.set_owner(4, Some(node(1))),
        Err(LedgerError::PartitionOutOfRange(4))
    );
    assert_eq!(
        table.set_replica_address(0, 7, Some(node(1))),
        Err(LedgerError::ReplicaIndexOutOfRange(7))
    );
    assert_eq!(table.version(), 0);

    table.set_owner(2, Some(node(1))).unwrap();
    assert_eq!(table.partition(2).unwrap().owner(), Some(node(1)));
    assert_eq!(table.version(), 1);
}

#[test]
fn duplicate_members_are_rejected() {
    let table = PartitionTableBuilder::new(2)
        .with_backup_count(2)
        .build()
        .unwrap();
    table.set_owner(0, Some(node(1))).unwrap();

    assert_eq!(
        table.set_replica_address(0, 1, Some(node(1))),
        Err(LedgerError::DuplicateReplica {
            partition_id: 0,
            index: 0
        })
    );
    assert_eq!(table.partition(0).unwrap().replica_address(1), None);
    assert_eq!(table.version(), 1);

    // Re-asserting a member at its own rank is fine.
    table.set_owner(0, Some(node(1))).unwrap();

    table.set_replica_address(0, 1, Some(node(2))).unwrap();
    assert_eq!(
        table.set_owner(0, Some(node(2))),
        Err(LedgerError::DuplicateReplica {
            partition_id: 0,
            index: 1
        })
    );

    // The same member may hold other partitions.
    table.set_owner(1, Some(node(1))).unwrap();
    table.set_replica_address(1, 1, Some(node(2))).unwrap();
}

#[test]
fn gaps_are_rejected() {
    let table = PartitionTableBuilder::new(2)
        .with_backup_count(2)
        .build()
        .unwrap();

    // Backup without an owner.
    assert_eq!(
        table.set_replica_address(1, 3, Some(node(2))),
        Err(LedgerError::ReplicaGap {
            partition_id: 1,
            index: 2
        })
    );
    assert!(table.partition(1).unwrap().replicas().iter().all(Option::is_none));
    assert!(table.backup_partitions(&node(2)).is_empty());

    table.set_owner(0, Some(node(1))).unwrap();
    table.set_replica_address(0, 1, Some(node(2))).unwrap();
    table.set_replica_address(0, 2, Some(node(3))).unwrap();

    // Clearing a rank with an occupied rank behind it.
    assert_eq!(
        table.set_replica_address(0, 1, None),
        Err(LedgerError::ReplicaGap {
            partition_id: 0,
            index: 1
        })
    );
    assert_eq!(
        table.set_owner(0, None),
        Err(LedgerError::ReplicaGap {
            partition_id: 0,
            index: 0
        })
    );

    // Clearing from the top down keeps ranks dense.
    table.set_replica_address(0, 2, None).unwrap();
    table.set_replica_address(0, 1, None).unwrap();
    table.set_owner(0, None).unwrap();
    assert_eq!(table.partition(0).unwrap().replica_count(), 0);
}

#[test]
fn member_holding_several_ranks_dies() {
    let table = PartitionTableBuilder::new(2)
        .with_backup_count(2)
        .build()
        .unwrap();
    table.set_owner(0, Some(node(1))).unwrap();
    table.set_owner(1, Some(node(2))).unwrap();
    table.set_replica_address(1, 1, Some(node(1))).unwrap();

    // Writing the record directly bypasses the table's checks.
    table.partition(0).unwrap().set_replica_address(1, Some(node(1)));

    let lost = table.on_dead_address(&node(1));
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].partition_id(), 0);
    assert_eq!(*lost[0].event_source(), node(1));

    assert_eq!(table.partition(0).unwrap().replica_count(), 0);
    assert!(table.owned_partitions(&node(1)).is_empty());
    assert_eq!(table.partition(1).unwrap().replicas()[..2], [Some(node(2)), None]);
}

#[test]
fn listener_may_call_back_into_table() {
    let table_cell: Arc<OnceLock<Arc<PartitionTable>>> = Arc::new(OnceLock::new());
    let fired = Arc::new(AtomicBool::new(false));
    let listener = FnListener::new({
        let table_cell = table_cell.clone();
        let fired = fired.clone();
        move || {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(table) = table_cell.get() {
                table.set_owner(1, Some(node(2))).expect("nested assignment");
            }
        }
    });
    let table = Arc::new(PartitionTableBuilder::new(4).with_listener(listener).build().unwrap());
    let _ = table_cell.set(table.clone());

    table.set_owner(0, Some(node(1))).unwrap();

    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(table.partition(0).unwrap().owner(), Some(node(1)));
    assert_eq!(table.partition(1).unwrap().owner(), Some(node(2)));
    assert_eq!(table.version(), 2);
}

#[test]
fn user_listener_sees_every_change() {
    let counter = Arc::new(ChangeCounter::new());
    let table = PartitionTableBuilder::new(10)
        .with_backup_count(2)
        .with_listener(counter.clone())
        .build()
        .unwrap();

    round_robin(&table, &[node(1), node(2), node(3)], 2);
    assert_eq!(counter.count(), 30);
    assert_eq!(table.version(), 30);

    // Re-asserting the same assignment changes nothing.
    round_robin(&table, &[node(1), node(2), node(3)], 2);
    assert_eq!(counter.count(), 30);
}

#[test]
fn key_routing() {
    let table = PartitionTableBuilder::new(32).build().unwrap();
    let nodes = [node(1), node(2)];
    round_robin(&table, &nodes, 1);

    let mut per_partition = HashMap::new();
    for key in 0..1_000u64 {
        let id = table.partition_id(&key);
        assert!(id < 32);
        assert_eq!(id, table.partition_id(&key));
        assert_eq!(table.owner_of(&key), table.partition(id).unwrap().owner());
        *per_partition.entry(id).or_insert(0usize) += 1;
    }
    // Keys spread over more than a handful of partitions.
    assert!(per_partition.len() > 16);

    assert_eq!(table.partition_id("user:42"), table.partition_id("user:42"));
}

#[test]
fn dead_member_is_removed_everywhere() {
    let table = PartitionTableBuilder::new(12)
        .with_backup_count(2)
        .build()
        .unwrap();
    let nodes = [node(1), node(2), node(3)];
    round_robin(&table, &nodes, 2);

    let owned = table.owned_partitions(&node(1));
    assert_eq!(owned, vec![0, 3, 6, 9]);
    assert!(!table.backup_partitions(&node(1)).is_empty());

    let lost = table.on_dead_address(&node(1));
    assert!(lost.is_empty());

    for record in table.partitions() {
        assert_eq!(record.replica_index_of(&node(1)), None);
        assert_eq!(record.replica_count(), 2);
        assert!(record.owner().is_some());
    }
    // Former first backups took over.
    for id in owned {
        assert_eq!(table.partition(id).unwrap().owner(), Some(node(2)));
    }
    assert!(table.owned_partitions(&node(1)).is_empty());
    assert!(table.backup_partitions(&node(1)).is_empty());
}

#[test]
fn partition_lost_without_backups() {
    let table = PartitionTableBuilder::new(6)
        .with_backup_count(0)
        .build()
        .unwrap();
    round_robin(&table, &[node(1), node(2)], 0);

    let lost = table.on_dead_address(&node(2));
    let ids: Vec<_> = lost.iter().map(|event| event.partition_id()).collect();
    assert_eq!(ids, vec![1, 3, 5]);
    assert!(lost.iter().all(|event| *event.event_source() == node(2)));

    for id in [1, 3, 5] {
        assert_eq!(table.partition(id).unwrap().owner(), None);
    }

    // Already gone: nothing else to lose.
    assert!(table.on_dead_address(&node(2)).is_empty());
}

#[test]
fn snapshot_and_apply() {
    let table = PartitionTableBuilder::new(8).with_backup_count(1).build().unwrap();
    round_robin(&table, &[node(1), node(2)], 1);

    let snapshot = table.snapshot();
    assert_eq!(snapshot.len(), 8);
    assert!(snapshot.iter().all(|record| !record.has_listener()));
    assert!(table.diff(&snapshot).is_empty());

    // Snapshot is detached from the table.
    let version = table.version();
    snapshot[0].set_owner(Some(node(9)));
    assert_eq!(table.version(), version);
    assert_eq!(table.partition(0).unwrap().owner(), Some(node(1)));
    assert_eq!(table.diff(&snapshot), vec![0]);

    // Another view adopts the authoritative assignment.
    let calls = Arc::new(AtomicUsize::new(0));
    let replica = PartitionTableBuilder::new(8)
        .with_listener(FnListener::new({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .build()
        .unwrap();
    replica.apply_snapshot(&table.snapshot()).unwrap();
    assert!(replica.diff(&table.snapshot()).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 16);
    assert_eq!(replica.version(), 16);
}

#[test]
fn apply_snapshot_validation() {
    let table = PartitionTableBuilder::<ClusterAddress>::new(4).build().unwrap();

    let short: Vec<_> = (0..3).map(PartitionReplicaRecord::unobserved).collect();
    assert_eq!(
        table.apply_snapshot(&short),
        Err(LedgerError::PartitionCountMismatch {
            expected: 4,
            actual: 3
        })
    );
    assert_eq!(table.diff(&short), vec![3]);

    let shuffled: Vec<_> = [0, 1, 3, 2]
        .into_iter()
        .map(|id| {
            let record = PartitionReplicaRecord::unobserved(id);
            record.set_owner(Some(node(1)));
            record
        })
        .collect();
    assert_eq!(
        table.apply_snapshot(&shuffled),
        Err(LedgerError::PartitionIdMismatch {
            expected: 2,
            actual: 3
        })
    );
    // Nothing was applied.
    assert_eq!(table.version(), 0);

    let snapshot: Vec<_> = (0..4).map(PartitionReplicaRecord::unobserved).collect();
    snapshot[0].set_owner(Some(node(1)));
    snapshot[3].set_replica_address(2, Some(node(2)));
    assert_eq!(
        table.apply_snapshot(&snapshot),
        Err(LedgerError::ReplicaGap {
            partition_id: 3,
            index: 0
        })
    );

    snapshot[3].set_replica_address(2, None);
    snapshot[2].set_owner(Some(node(3)));
    snapshot[2].set_replica_address(1, Some(node(3)));
    assert_eq!(
        table.apply_snapshot(&snapshot),
        Err(LedgerError::DuplicateReplica {
            partition_id: 2,
            index: 0
        })
    );
    assert_eq!(table.version(), 0);
    assert!(table.partitions().all(|record| record.owner().is_none()));
}

#[test]
fn concurrent_failure_handling() {
    let table = PartitionTableBuilder::new(64)
        .with_backup_count(3)
        .build()
        .unwrap();
    let nodes: Vec<_> = (1..=4).map(node).collect();
    round_robin(&table, &nodes, 3);

    // Readers route keys while two members die.
    std::thread::scope(|s| {
        s.spawn(|| table.on_dead_address(&node(1)));
        s.spawn(|| table.on_dead_address(&node(4)));
        for _ in 0..2 {
            s.spawn(|| {
                for key in 0..500u32 {
                    if let Some(owner) = table.owner_of(&key) {
                        assert!(nodes.contains(&owner));
                    }
                }
            });
        }
    });

    for record in table.partitions() {
        assert_eq!(record.replica_index_of(&node(1)), None);
        assert_eq!(record.replica_index_of(&node(4)), None);
        assert_eq!(record.replica_count(), 2);
        let replicas = record.replicas();
        assert!(replicas[..2].iter().all(Option::is_some));
        assert!(replicas[2..].iter().all(Option::is_none));
    }
}
