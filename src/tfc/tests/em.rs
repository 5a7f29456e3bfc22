mod common;

use tfc::{Dir, Error, FlowHandle, MpcStatus, ScopeConfig, TableType};

fn key(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn insert_and_delete() {
    let mut rig = common::open();
    let k = key(1, 40);
    let flow = rig.tfc.em_insert(None, Dir::Rx, &k).unwrap().done().unwrap();
    assert_eq!(flow.records, 2);
    assert_eq!(flow.tsid, 3);
    assert!(flow.bucket < common::BUCKETS);
    assert_eq!(FlowHandle::from_raw(flow.to_raw()).unwrap().offset, flow.offset);
    assert_eq!(rig.model.em_entries(Dir::Rx), 1);
    assert_eq!(rig.model.em_entries(Dir::Tx), 0);
    assert_eq!(rig.tfc.scope().used(Dir::Rx, TableType::Lookup), 2);

    rig.tfc.em_delete(None, Dir::Rx, flow).unwrap();
    assert_eq!(rig.model.em_entries(Dir::Rx), 0);
    assert_eq!(rig.tfc.scope().used(Dir::Rx, TableType::Lookup), 0);
}

#[test]
fn same_key_hashes_alike() {
    let mut rig = common::open();
    let a = rig.tfc.em_insert(None, Dir::Tx, &key(9, 16)).unwrap().done().unwrap();
    let b = rig.tfc.em_insert(None, Dir::Rx, &key(9, 16)).unwrap().done().unwrap();
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.bucket, b.bucket);
}

#[test]
fn duplicate_insert_gives_records_back() {
    let mut rig = common::open();
    let k = key(7, 64);
    rig.tfc.em_insert(None, Dir::Tx, &k).unwrap();
    let before = rig.tfc.scope().pools(Dir::Tx, TableType::Lookup);

    assert!(matches!(
        rig.tfc.em_insert(None, Dir::Tx, &k),
        Err(Error::Status {
            status: MpcStatus::EmDuplicate,
            ..
        })
    ));
    assert_eq!(rig.tfc.scope().pools(Dir::Tx, TableType::Lookup), before);
    assert_eq!(rig.model.em_entries(Dir::Tx), 1);
}

#[test]
fn timeout_leaves_pools_unchanged() {
    let mut rig = common::open();
    let kept = rig.tfc.em_insert(None, Dir::Rx, &key(1, 8)).unwrap().done().unwrap();
    let before = rig.tfc.scope().pools(Dir::Rx, TableType::Lookup);

    rig.model.set_silent(true);
    assert!(matches!(
        rig.tfc.em_insert(None, Dir::Rx, &key(2, 8)),
        Err(Error::Mpc(mpc::Error::Timeout(..)))
    ));
    assert_eq!(rig.tfc.scope().pools(Dir::Rx, TableType::Lookup), before);

    // a failed delete keeps the records too
    assert!(rig.tfc.em_delete(None, Dir::Rx, kept).is_err());
    assert_eq!(rig.tfc.scope().pools(Dir::Rx, TableType::Lookup), before);
}

#[test]
fn missing_entry_is_a_miss() {
    let mut rig = common::open();
    let flow = rig.tfc.em_insert(None, Dir::Tx, &key(3, 8)).unwrap().done().unwrap();
    rig.tfc.em_delete(None, Dir::Tx, flow).unwrap();
    assert!(matches!(
        rig.tfc.em_delete(None, Dir::Tx, flow),
        Err(Error::Status {
            status: MpcStatus::EmMiss,
            ..
        })
    ));
}

#[test]
fn lookup_records_run_out() {
    let mut rig = common::open_with(ScopeConfig {
        max_pools: 1,
        lkup_pool_size_exp: 2,
        lkup_max_contig: 4,
        ..common::small_scope()
    });
    rig.tfc.em_insert(None, Dir::Rx, &key(0, 128)).unwrap();
    assert!(matches!(
        rig.tfc.em_insert(None, Dir::Rx, &key(1, 1)),
        Err(Error::NoRecords {
            dir: Dir::Rx,
            table: TableType::Lookup
        })
    ));
    assert!(matches!(
        rig.tfc.em_insert(None, Dir::Rx, &[]),
        Err(Error::InvalidArgument(_))
    ));
    // the tx direction has pools of its own
    rig.tfc.em_insert(None, Dir::Tx, &key(1, 1)).unwrap();
}
