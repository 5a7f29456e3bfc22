use std::time::Duration;

use crossbeam::thread;
use mpc::wire::MAX_MSG_LEN;
use mpc::{ChannelId, CompletionType, Error, MpcConfig, Response};
use rand::{rngs::StdRng, Rng, SeedableRng};

mod common;
use common::{config, echo_device, open, LONG, SHORT};

const TX: ChannelId = ChannelId::TeCfa;
const RX: ChannelId = ChannelId::ReCfa;

#[test]
fn opens_flow_table_channels_only() {
    let dev = echo_device();
    let cfg = MpcConfig {
        chnls_cap: 0x1f,
        tx_cp_nr_rings: 4,
        ..Default::default()
    };
    let set = open(&dev, &cfg);
    assert_eq!(set.enabled(), ChannelId::ENABLED_MASK);
    assert_eq!(set.channel(TX).unwrap().logical_id(), 4);
    assert_eq!(set.channel(RX).unwrap().logical_id(), 5);
    assert_eq!(set.channel(RX).unwrap().map_index(), 0x305);
    assert!(matches!(
        set.channel(ChannelId::Tce),
        Err(Error::ChannelNotOpen(ChannelId::Tce))
    ));
    assert!(dev.is_allocated(TX));
    assert!(!dev.is_allocated(ChannelId::Primate));
    set.close();
    assert!(!dev.is_allocated(TX));
    assert!(!dev.is_allocated(RX));
}

#[test]
fn correlation_round_trip() {
    let dev = echo_device();
    let mut set = open(&dev, &config(128, 1000));
    for i in 0..100u16 {
        let shape = if i % 3 == 0 { LONG } else { SHORT };
        let tag = set.channel(TX).unwrap().next_tag();
        assert_eq!(tag, i);
        let expected = if shape == LONG {
            CompletionType::Long
        } else {
            CompletionType::Short
        };
        let msg = [shape, i as u8, (i >> 8) as u8, 0xa5, 0x5a];
        let cmpl = set.send_and_wait(TX, &msg, expected).unwrap();
        assert_eq!(cmpl.cmp_type(), expected);
        assert_eq!(cmpl.opaque(), tag as u32);
        assert_eq!(&cmpl.bytes()[12..16], &msg[1..5]);
    }
    let ch = set.channel(TX).unwrap();
    assert_eq!(ch.outstanding(), 0);
    assert_eq!(ch.cmd_ring().in_use(), 0);
    assert_eq!(dev.commands(TX), 100);
    assert_eq!(dev.commands(RX), 0);
}

#[test]
fn rings_wrap_many_times() {
    let dev = echo_device();
    let mut set = open(&dev, &config(8, 100));
    // 3 BDs per command, 1 or 2 completion slots: no multiple of 8
    let msg = [LONG; 20];
    for _ in 0..41 {
        set.send_and_wait(RX, &msg, CompletionType::Long).unwrap();
    }
    let ch = set.channel(RX).unwrap();
    assert_eq!(ch.cmd_ring().raw_producer(), 123);
    // 123 / 8 = 15 passes, odd
    assert!(ch.cmd_ring().epoch());
    assert_eq!(ch.cmpl_ring().raw_consumer(), 82);
    // 82 / 8 = 10 passes, even
    assert!(!ch.cmpl_ring().cons_epoch());
}

#[test]
fn random_message_sizes() {
    let mut rng = StdRng::seed_from_u64(999);
    let dev = echo_device();
    let mut set = open(&dev, &config(32, 100));
    for _ in 0..2_000 {
        let len = rng.gen_range(13..=MAX_MSG_LEN);
        let mut msg: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let long = rng.gen_bool(0.5);
        msg[0] = if long { LONG } else { SHORT };
        let expected = if long {
            CompletionType::Long
        } else {
            CompletionType::Short
        };
        let cmpl = set.send_and_wait(TX, &msg, expected).unwrap();
        assert_eq!(&cmpl.bytes()[12..16], &msg[1..5]);
        if long {
            assert_eq!(&cmpl.bytes()[16..24], &msg[5..13]);
        }
    }
    assert_eq!(set.channel(TX).unwrap().outstanding(), 0);
}

#[test]
fn long_completion_straddles_wrap() {
    let dev = echo_device();
    let mut set = open(&dev, &config(4, 100));
    for _ in 0..3 {
        set.send_and_wait(TX, &[SHORT], CompletionType::Short)
            .unwrap();
    }
    assert_eq!(set.channel(TX).unwrap().cmpl_ring().consumer(), 3);

    let msg = [LONG, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
    let cmpl = set.send_and_wait(TX, &msg, CompletionType::Long).unwrap();
    assert_eq!(cmpl.opaque(), 3);
    assert_eq!(&cmpl.bytes()[12..16], &[1, 2, 3, 4]);
    assert_eq!(&cmpl.bytes()[16..24], &[5, 6, 7, 8, 9, 10, 11, 12]);

    let ring = set.channel(TX).unwrap().cmpl_ring();
    assert_eq!(ring.raw_consumer(), 5);
    assert!(ring.cons_epoch());

    // next pass expects the flipped parity
    let cmpl = set.send_and_wait(TX, &[SHORT, 9], CompletionType::Short).unwrap();
    assert_eq!(cmpl.opaque(), 4);
    assert_eq!(cmpl.bytes()[12], 9);
}

#[test]
fn unrelated_completions_are_skipped() {
    let dev = echo_device();
    let mut set = open(&dev, &config(16, 100));
    // an even, non mid-path type occupies one slot
    dev.inject(TX, Response::raw(0x20, &[0u8; 16]), 0xdead);
    // a long completion in front of a short wait is consumed and dropped
    dev.inject(TX, Response::new(CompletionType::Long, &[0u8; 32]), 0xbeef);

    let cmpl = set.send_and_wait(TX, &[SHORT, 7], CompletionType::Short).unwrap();
    assert_eq!(cmpl.opaque(), 0);
    assert_eq!(cmpl.bytes()[12], 7);
    assert_eq!(set.channel(TX).unwrap().cmpl_ring().raw_consumer(), 4);
}

#[test]
fn unsolicited_completion_keeps_command_slots() {
    let dev = echo_device();
    let mut set = open(&dev, &config(16, 10));
    dev.inject(TX, Response::new(CompletionType::Short, &[0u8; 16]), 0x77);
    dev.set_hold(true);

    let ch = set.channel_mut(TX).unwrap();
    let tag = ch.xmit(&[SHORT]).unwrap();
    let stray = ch.cmd_cmpl(CompletionType::Short).unwrap();
    assert_eq!(stray.opaque(), 0x77);
    assert_eq!(ch.outstanding(), 1);
    assert_eq!(ch.cmd_ring().free_slots(), 14);

    dev.set_hold(false);
    let cmpl = ch.wait(CompletionType::Short, tag).unwrap();
    assert_eq!(cmpl.opaque(), tag as u32);
    assert_eq!(ch.outstanding(), 0);
    assert_eq!(ch.cmd_ring().free_slots(), 16);
}

#[test]
fn no_ring_mutation_on_rejected_send() {
    let dev = echo_device();
    let mut set = open(&dev, &config(64, 10));

    let big = vec![SHORT; mpc::wire::MAX_MSG_LEN + 1];
    assert!(matches!(
        set.send_and_wait(TX, &big, CompletionType::Short),
        Err(Error::CommandTooLarge(n)) if n == big.len()
    ));

    dev.set_in_error(true);
    assert!(matches!(
        set.send_and_wait(TX, &[SHORT], CompletionType::Short),
        Err(Error::DeviceInError)
    ));
    dev.set_in_error(false);

    set.channel_mut(TX).unwrap().set_in_error(true);
    assert!(matches!(
        set.send_and_wait(TX, &[SHORT], CompletionType::Short),
        Err(Error::ChannelInError(TX))
    ));

    let ch = set.channel(TX).unwrap();
    assert_eq!(ch.cmd_ring().raw_producer(), 0);
    assert_eq!(ch.next_tag(), 0);
    assert_eq!(dev.commands(TX), 0);

    set.channel_mut(TX).unwrap().set_in_error(false);
    let max = vec![SHORT; mpc::wire::MAX_MSG_LEN];
    set.send_and_wait(TX, &max, CompletionType::Short).unwrap();
    assert_eq!(
        set.channel(TX).unwrap().cmd_ring().raw_producer(),
        mpc::wire::MAX_BDS
    );
}

#[test]
fn full_command_ring_is_reported() {
    let dev = echo_device();
    dev.set_hold(true);
    let mut set = open(&dev, &config(8, 10));
    let ch = set.channel_mut(RX).unwrap();
    // two BDs each
    for _ in 0..4 {
        ch.xmit(&[SHORT; 16]).unwrap();
    }
    assert!(matches!(
        ch.xmit(&[SHORT]),
        Err(Error::RingFull { need: 2, free: 0, .. })
    ));
    assert_eq!(ch.outstanding(), 4);

    dev.set_hold(false);
    for tag in 0..4 {
        let cmpl = ch.wait(CompletionType::Short, tag).unwrap();
        assert_eq!(cmpl.opaque(), tag as u32);
    }
    assert_eq!(ch.cmd_ring().free_slots(), 8);
}

#[test]
fn timeout_keeps_producer_and_late_completion_is_returned() {
    let dev = echo_device();
    dev.set_hold(true);
    let mut set = open(&dev, &config(16, 50));
    assert!(matches!(
        set.send_and_wait(TX, &[SHORT], CompletionType::Short),
        Err(Error::Timeout(TX, 50))
    ));
    let ch = set.channel(TX).unwrap();
    assert_eq!(ch.cmd_ring().raw_producer(), 2);
    assert_eq!(ch.outstanding(), 1);
    assert_eq!(dev.pending(TX), 1);

    dev.set_hold(false);
    // the stale completion answers the next wait; its tag is reported, not rejected
    let cmpl = set.send_and_wait(TX, &[SHORT], CompletionType::Short).unwrap();
    assert_eq!(cmpl.opaque(), 0);
    let cmpl = set
        .channel_mut(TX)
        .unwrap()
        .wait(CompletionType::Short, 1)
        .unwrap();
    assert_eq!(cmpl.opaque(), 1);
}

#[test]
fn device_releases_from_another_thread() {
    let dev = echo_device();
    dev.set_hold(true);
    let cfg = MpcConfig {
        ring_depth: 32,
        retry_budget: 100_000,
        poll_delay_us: 10,
        ..Default::default()
    };
    let mut set = open(&dev, &cfg);
    thread::scope(|s| {
        let releaser = s.spawn(|_| {
            std::thread::sleep(Duration::from_millis(5));
            dev.set_hold(false);
        });
        let cmpl = set
            .send_and_wait(RX, &[LONG, 1, 2, 3, 4], CompletionType::Long)
            .unwrap();
        assert_eq!(&cmpl.bytes()[12..16], &[1, 2, 3, 4]);
        releaser.join().unwrap();
    })
    .unwrap();
}
