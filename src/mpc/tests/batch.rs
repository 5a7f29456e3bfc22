use mpc::{
    Batch, BatchState, ChannelId, Completion, CompletionHandler, CompletionType, EntryError,
    Error, BATCH_MAX,
};

mod common;
use common::{config, echo_device, open, LONG, SHORT, SILENT};

const TX: ChannelId = ChannelId::TeCfa;
const RX: ChannelId = ChannelId::ReCfa;

#[derive(Debug)]
struct Rejected(usize);

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rejected entry {}", self.0)
    }
}

impl std::error::Error for Rejected {}

/// Reports (kind, opaque, first echoed byte), rejecting odd kinds if asked.
struct Collect {
    reject_odd: bool,
}

impl CompletionHandler<u32> for Collect {
    type Output = (u32, u32, u8);
    type Error = Rejected;

    fn handle(&mut self, index: usize, kind: &u32, cmpl: &Completion) -> Result<Self::Output, Rejected> {
        if self.reject_odd && kind % 2 == 1 {
            return Err(Rejected(index));
        }
        Ok((*kind, cmpl.opaque(), cmpl.bytes()[12]))
    }
}

#[test]
fn state_machine() {
    let dev = echo_device();
    let mut set = open(&dev, &config(64, 10));
    let mut batch: Batch<u32> = Batch::new();
    let mut h = Collect { reject_odd: false };

    assert!(matches!(batch.end(&mut set, &mut h), Err(Error::BatchIdle)));
    assert!(matches!(
        batch.enqueue(&mut set, TX, &[SHORT], CompletionType::Short, 0),
        Err(Error::BatchIdle)
    ));

    batch.start().unwrap();
    assert!(matches!(batch.start(), Err(Error::BatchBusy)));
    assert!(batch.is_accumulating());
    assert!(!batch.started());

    let out = batch.end(&mut set, &mut h).unwrap();
    assert!(out.is_empty());
    assert_eq!(batch.state(), BatchState::Idle);
    assert!(!batch.has_error());
    assert_eq!(dev.commands(TX), 0);
}

#[test]
fn drains_in_enqueue_order_across_channels() {
    let dev = echo_device();
    let mut set = open(&dev, &config(64, 100));
    let mut batch = Batch::new();
    batch.start().unwrap();

    let mut tags = Vec::new();
    for i in 0..10u32 {
        let (chnl, shape, ty) = if i % 2 == 0 {
            (TX, SHORT, CompletionType::Short)
        } else {
            (RX, LONG, CompletionType::Long)
        };
        tags.push(batch.enqueue(&mut set, chnl, &[shape, i as u8], ty, i).unwrap());
        assert!(batch.started());
    }
    assert_eq!(batch.len(), 10);
    assert_eq!(batch.entries()[3].chnl, RX);
    assert_eq!(batch.entries()[3].expected, CompletionType::Long);
    // each channel tags independently
    assert_eq!(&tags[..4], &[0, 0, 1, 1]);

    let out = batch
        .end(&mut set, &mut Collect { reject_odd: false })
        .unwrap();
    assert_eq!(out.len(), 10);
    for (i, res) in out.into_iter().enumerate() {
        let (kind, opaque, echoed) = res.unwrap();
        assert_eq!(kind, i as u32);
        assert_eq!(opaque, tags[i] as u32);
        assert_eq!(echoed, i as u8);
    }
    assert!(!batch.has_error());
    assert!(batch.is_empty());
    assert_eq!(batch.state(), BatchState::Idle);
}

#[test]
fn capacity_checked_before_submission() {
    let dev = echo_device();
    let mut set = open(&dev, &config(128, 100));
    let mut batch = Batch::new();
    batch.start().unwrap();
    for i in 0..BATCH_MAX as u32 {
        batch
            .enqueue(&mut set, TX, &[SHORT], CompletionType::Short, i)
            .unwrap();
    }
    let prod = set.channel(TX).unwrap().cmd_ring().raw_producer();
    assert!(matches!(
        batch.enqueue(&mut set, TX, &[SHORT], CompletionType::Short, 99),
        Err(Error::BatchFull(BATCH_MAX))
    ));
    assert_eq!(set.channel(TX).unwrap().cmd_ring().raw_producer(), prod);
    assert_eq!(dev.commands(TX), BATCH_MAX as u64);

    let out = batch
        .end(&mut set, &mut Collect { reject_odd: false })
        .unwrap();
    assert!(out.iter().all(|r| r.is_ok()));
    assert_eq!(set.channel(TX).unwrap().outstanding(), 0);
}

#[test]
fn failed_entries_do_not_stop_the_drain() {
    let dev = echo_device();
    let mut set = open(&dev, &config(64, 20));
    let mut batch = Batch::new();
    batch.start().unwrap();
    batch
        .enqueue(&mut set, TX, &[SHORT, 1], CompletionType::Short, 0)
        .unwrap();
    // never answered
    batch
        .enqueue(&mut set, RX, &[SILENT], CompletionType::Short, 2)
        .unwrap();
    batch
        .enqueue(&mut set, TX, &[SHORT, 3], CompletionType::Short, 1)
        .unwrap();
    batch
        .enqueue(&mut set, TX, &[SHORT, 4], CompletionType::Short, 4)
        .unwrap();

    let out = batch
        .end(&mut set, &mut Collect { reject_odd: true })
        .unwrap();
    assert_eq!(out.len(), 4);
    assert_eq!(out[0].as_ref().unwrap(), &(0, 0, 1));
    assert!(matches!(
        out[1],
        Err(EntryError::Transport(Error::Timeout(RX, 20)))
    ));
    assert!(matches!(out[2], Err(EntryError::Handler(Rejected(2)))));
    assert_eq!(out[3].as_ref().unwrap(), &(4, 2, 4));
    assert!(batch.has_error());
    assert_eq!(batch.state(), BatchState::Idle);

    // a new batch clears the flag
    batch.start().unwrap();
    assert!(!batch.has_error());
    batch.end(&mut set, &mut Collect { reject_odd: true }).unwrap();
}
