mod common;

use mpc::EntryError;
use tfc::{BatchOutput, Dir, Error, MpcStatus, Submitted, TableType, TfcBatch};

#[test]
fn mixed_batch_reports_in_order() {
    let mut rig = common::open();
    let tx = rig.tfc.act_alloc(Dir::Tx, 1).unwrap();
    let rx = rig.tfc.act_alloc(Dir::Rx, 1).unwrap();
    let mut batch = TfcBatch::new();

    rig.tfc.batch_start(&mut batch).unwrap();
    assert_eq!(
        rig.tfc.act_set(Some(&mut batch), Dir::Tx, tx, &[0x11; 32]).unwrap(),
        Submitted::Queued(0)
    );
    assert_eq!(
        rig.tfc.act_set(Some(&mut batch), Dir::Rx, rx, &[0x22; 32]).unwrap(),
        Submitted::Queued(1)
    );
    assert_eq!(
        rig.tfc.em_insert(Some(&mut batch), Dir::Rx, b"flow-key").unwrap(),
        Submitted::Queued(2)
    );
    assert_eq!(
        rig.tfc.act_get(Some(&mut batch), Dir::Tx, tx, 1, false).unwrap(),
        Submitted::Queued(3)
    );
    assert!(batch.started());

    let results = rig.tfc.batch_end(&mut batch).unwrap();
    assert!(!batch.is_accumulating());
    assert!(!batch.has_error());
    assert_eq!(results.len(), 4);
    assert!(matches!(results[0], Ok(BatchOutput::Written)));
    assert!(matches!(results[1], Ok(BatchOutput::Written)));
    match &results[2] {
        Ok(BatchOutput::Inserted(flow)) => {
            assert_eq!(flow.tsid, 3);
            assert_eq!(flow.records, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &results[3] {
        Ok(BatchOutput::Read(data)) => assert_eq!(data, &vec![0x11; 32]),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(rig.model.em_entries(Dir::Rx), 1);
}

#[test]
fn start_twice_is_busy() {
    let mut rig = common::open();
    let mut batch = TfcBatch::new();
    rig.tfc.batch_start(&mut batch).unwrap();
    assert!(matches!(
        rig.tfc.batch_start(&mut batch),
        Err(Error::Mpc(mpc::Error::BatchBusy))
    ));
    assert!(rig.tfc.batch_end(&mut batch).unwrap().is_empty());
    assert!(!batch.is_accumulating());
}

#[test]
fn failed_insert_in_batch_gives_records_back() {
    let mut rig = common::open();
    rig.tfc.em_insert(None, Dir::Tx, b"taken").unwrap();
    let mut batch = TfcBatch::new();

    rig.tfc.batch_start(&mut batch).unwrap();
    rig.tfc.em_insert(Some(&mut batch), Dir::Tx, b"taken").unwrap();
    rig.tfc.em_insert(Some(&mut batch), Dir::Tx, b"fresh").unwrap();
    // both inserts hold records until the batch ends
    assert_eq!(rig.tfc.scope().used(Dir::Tx, TableType::Lookup), 3);

    let results = rig.tfc.batch_end(&mut batch).unwrap();
    assert!(batch.has_error());
    assert!(matches!(
        results[0],
        Err(EntryError::Handler(Error::Status {
            status: MpcStatus::EmDuplicate,
            ..
        }))
    ));
    assert!(matches!(results[1], Ok(BatchOutput::Inserted(_))));
    assert_eq!(rig.tfc.scope().used(Dir::Tx, TableType::Lookup), 2);
}

#[test]
fn abandoned_entries_release_records() {
    let mut rig = common::open();
    let mut batch = TfcBatch::new();
    rig.model.set_silent(true);

    rig.tfc.batch_start(&mut batch).unwrap();
    rig.tfc.em_insert(Some(&mut batch), Dir::Rx, b"lost").unwrap();
    let results = rig.tfc.batch_end(&mut batch).unwrap();
    assert!(matches!(
        results[0],
        Err(EntryError::Transport(mpc::Error::Timeout(..)))
    ));
    assert_eq!(rig.tfc.scope().used(Dir::Rx, TableType::Lookup), 0);
    assert!(rig.tfc.scope().pools(Dir::Rx, TableType::Lookup).is_empty());
}

#[test]
fn batched_delete_frees_on_completion() {
    let mut rig = common::open();
    let flow = rig
        .tfc
        .em_insert(None, Dir::Tx, b"short-lived")
        .unwrap()
        .done()
        .unwrap();
    let mut batch = TfcBatch::new();

    rig.tfc.batch_start(&mut batch).unwrap();
    rig.tfc.em_delete(Some(&mut batch), Dir::Tx, flow).unwrap();
    assert_eq!(rig.tfc.scope().used(Dir::Tx, TableType::Lookup), 1);
    let results = rig.tfc.batch_end(&mut batch).unwrap();
    assert!(matches!(results[0], Ok(BatchOutput::Deleted)));
    assert_eq!(rig.tfc.scope().used(Dir::Tx, TableType::Lookup), 0);
    assert_eq!(rig.model.em_entries(Dir::Tx), 0);
}

#[test]
fn idle_batch_rejects_commands() {
    let mut rig = common::open();
    let h = rig.tfc.act_alloc(Dir::Tx, 1).unwrap();
    let mut batch = TfcBatch::new();
    assert!(matches!(
        rig.tfc.act_set(Some(&mut batch), Dir::Tx, h, &[1]),
        Err(Error::Mpc(mpc::Error::BatchIdle))
    ));
    assert!(matches!(
        rig.tfc.batch_end(&mut batch),
        Err(Error::Mpc(mpc::Error::BatchIdle))
    ));
    assert_eq!(rig.dev.commands(Dir::Tx.channel()), 0);
}
