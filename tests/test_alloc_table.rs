//! Channel allocation table tests

mod common;

use std::thread;

use smd::platform::SMD_CHANNELS;
use smd::smd::{AllocTable, ChannelName};
use smd::{Edge, SmdError, XferType};

fn name(s: &str) -> ChannelName {
    ChannelName::new(s).unwrap()
}

#[test]
fn channel_name_limits() {
    assert!(ChannelName::new("").is_err());
    assert!(ChannelName::new("nineteen_chars_long").is_ok());
    assert!(ChannelName::new("twenty_chars_long!!!").is_err());
    assert!(ChannelName::new("bad\0name").is_err());

    let n = name("DIAG");
    assert_eq!(n.as_bytes(), b"DIAG");
    assert_eq!(n.to_string(), "DIAG");
}

#[test]
fn both_hosts_share_one_slot() {
    let fx = common::fixture();
    let apps = AllocTable::new(&fx.apps).unwrap();
    let modem = AllocTable::new(&fx.modem).unwrap();

    // Test 1: first open creates the entry
    let cid = apps.lookup_or_create(&name("DATA5_CNTL"), Edge::AppsModem, XferType::Stream).unwrap();
    assert_eq!(cid, 0);
    let e = modem.entry(cid).unwrap();
    assert_eq!(e.name, name("DATA5_CNTL"));
    assert_eq!(e.ref_count, 1);
    assert_eq!(e.ch_type, Edge::AppsModem as u32);
    assert_eq!(e.xfer_type, XferType::Stream as u32);

    // Test 2: second open takes a reference on the same slot
    let again = modem.lookup_or_create(&name("DATA5_CNTL"), Edge::AppsModem, XferType::Stream).unwrap();
    assert_eq!(again, cid);
    assert_eq!(apps.entry(cid).unwrap().ref_count, 2);
    assert_eq!(apps.lookup(&name("DATA5_CNTL")).unwrap(), Some(cid));
    assert_eq!(apps.channel_kind(cid).unwrap(), (Edge::AppsModem, XferType::Stream));

    // Test 3: another name gets the next slot
    let diag = apps.lookup_or_create(&name("DIAG"), Edge::AppsModem, XferType::Packet).unwrap();
    assert_eq!(diag, 1);
}

#[test]
fn join_requires_matching_kind() {
    let fx = common::fixture();
    let apps = AllocTable::new(&fx.apps).unwrap();
    let n = name("NAME");
    let cid = apps.lookup_or_create(&n, Edge::AppsModem, XferType::Packet).unwrap();

    // Test 1: another edge is rejected and takes no reference
    assert!(matches!(
        apps.lookup_or_create(&n, Edge::AppsQdsp, XferType::Packet),
        Err(SmdError::InvalidArgument(_))
    ));
    // Test 2: so is another transfer type on the same edge
    assert!(matches!(
        apps.lookup_or_create(&n, Edge::AppsModem, XferType::Stream),
        Err(SmdError::InvalidArgument(_))
    ));
    assert_eq!(apps.entry(cid).unwrap().ref_count, 1);
    assert_eq!(apps.channel_kind(cid).unwrap(), (Edge::AppsModem, XferType::Packet));

    // Test 3: once freed, the name can be reused with any kind
    apps.release(cid).unwrap();
    let again = apps.lookup_or_create(&n, Edge::AppsQdsp, XferType::Stream).unwrap();
    assert_eq!(apps.channel_kind(again).unwrap(), (Edge::AppsQdsp, XferType::Stream));
}

#[test]
fn release_frees_slot_on_last_reference() {
    let fx = common::fixture();
    let table = AllocTable::new(&fx.apps).unwrap();
    let n = name("RPCCALL");

    let cid = table.lookup_or_create(&n, Edge::AppsModem, XferType::Packet).unwrap();
    table.lookup_or_create(&n, Edge::AppsModem, XferType::Packet).unwrap();

    assert_eq!(table.release(cid).unwrap(), 1);
    assert_eq!(table.entry(cid).unwrap().name, n);
    assert_eq!(table.release(cid).unwrap(), 0);

    let e = table.entry(cid).unwrap();
    assert!(e.is_free());
    assert!(e.name.as_bytes().is_empty());
    assert_eq!(table.lookup(&n).unwrap(), None);
    assert_eq!(table.channel_kind(cid).unwrap_err(), SmdError::NotFound);

    assert!(matches!(table.release(cid), Err(SmdError::ProtocolOrder(_))));

    // The freed slot is reused first.
    let other = table.lookup_or_create(&name("OTHER"), Edge::AppsQdsp, XferType::Stream).unwrap();
    assert_eq!(other, cid);
}

#[test]
fn table_exhaustion() {
    let fx = common::fixture();
    let table = AllocTable::new(&fx.apps).unwrap();

    for i in 0..SMD_CHANNELS {
        let cid = table
            .lookup_or_create(&name(&format!("ch{}", i)), Edge::AppsModem, XferType::Stream)
            .unwrap();
        assert_eq!(cid as usize, i);
    }
    assert_eq!(
        table.lookup_or_create(&name("one_more"), Edge::AppsModem, XferType::Stream),
        Err(SmdError::SlotExhausted)
    );

    // Existing names still resolve when full.
    assert_eq!(
        table.lookup_or_create(&name("ch7"), Edge::AppsModem, XferType::Stream),
        Ok(7)
    );
    assert!(table.release(64).is_err());
}

#[test]
fn concurrent_opens_agree_on_cid() {
    let fx = common::fixture();
    let apps = AllocTable::new(&fx.apps).unwrap();
    let modem = AllocTable::new(&fx.modem).unwrap();

    let names: Vec<ChannelName> = (0..16).map(|i| name(&format!("SHARED{}", i))).collect();
    let (a, m) = thread::scope(|s| {
        let a = s.spawn(|| {
            names
                .iter()
                .map(|n| apps.lookup_or_create(n, Edge::AppsModem, XferType::Stream).unwrap())
                .collect::<Vec<_>>()
        });
        let m = s.spawn(|| {
            names
                .iter()
                .rev()
                .map(|n| modem.lookup_or_create(n, Edge::AppsModem, XferType::Stream).unwrap())
                .collect::<Vec<_>>()
        });
        (a.join().unwrap(), m.join().unwrap())
    });

    let m: Vec<u32> = m.into_iter().rev().collect();
    assert_eq!(a, m);
    for cid in a {
        assert_eq!(apps.entry(cid).unwrap().ref_count, 2);
    }
    assert_eq!(apps.entries().filter(|e| !e.unwrap().is_free()).count(), 16);
}
