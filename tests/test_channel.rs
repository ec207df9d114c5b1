//! SMD channel tests: handshake, stream and packet transfer, signals

mod common;

use std::thread;
use std::time::Duration;

use smd::platform::{SMD_BUF_SIZE, SMEM_SMD_BASE_ID, SMEM_SMD_FIFO_BASE_ID};
use smd::smd::{
    ChannelEvents, ChannelState, HalfChannel, Layout, ModemSignals, Signals, LEGACY_ITEM_SIZE,
    SHARED_ITEM_SIZE,
};
use smd::{
    Doorbell, DoorbellHub, Edge, Host, NullDoorbell, Smd, SmdChannel, SmdConfig, SmdError,
    XferType,
};

struct Pair {
    apps: Smd<NullDoorbell>,
    modem: Smd<NullDoorbell>,
    _fx: common::Fixture,
}

fn pair_with(apps: SmdConfig, modem: SmdConfig) -> Pair {
    let fx = common::fixture();
    Pair {
        apps: Smd::new(fx.apps.clone(), apps, NullDoorbell).unwrap(),
        modem: Smd::new(fx.modem.clone(), modem, NullDoorbell).unwrap(),
        _fx: fx,
    }
}

fn pair() -> Pair {
    pair_with(SmdConfig::new(Host::Apps), SmdConfig::new(Host::Modem))
}

fn open_both<'a>(
    p: &'a Pair,
    name: &str,
    xfer: XferType,
) -> (SmdChannel<'a, NullDoorbell>, SmdChannel<'a, NullDoorbell>) {
    let a = p.apps.open(name, Edge::AppsModem, xfer).unwrap();
    let m = p.modem.open(name, Edge::AppsModem, xfer).unwrap();
    a.poll().unwrap();
    m.poll().unwrap();
    assert!(a.is_open().unwrap() && m.is_open().unwrap());
    (a, m)
}

#[test]
fn config_is_validated() {
    let fx = common::fixture();
    assert!(matches!(
        Smd::new(fx.apps.clone(), SmdConfig::new(Host::Apps).with_fifo_size(1000), NullDoorbell),
        Err(SmdError::InvalidArgument(_))
    ));
    assert!(matches!(
        Smd::new(fx.apps.clone(), SmdConfig::new(Host::Apps).with_fifo_size(512), NullDoorbell),
        Err(SmdError::InvalidArgument(_))
    ));
    assert!(matches!(
        Smd::new(fx.apps.clone(), SmdConfig::new(Host::Modem), NullDoorbell),
        Err(SmdError::InvalidArgument(_))
    ));
}

#[test]
fn open_handshake() {
    let p = pair();

    // Test 1: first opener waits in OPENING
    let a = p.apps.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream).unwrap();
    assert_eq!(a.local_state().unwrap(), ChannelState::Opening);
    assert_eq!(a.remote_state().unwrap(), ChannelState::Closed);
    assert_eq!(a.poll().unwrap(), ChannelEvents::empty());
    assert!(matches!(a.write(b"early"), Err(SmdError::ProtocolOrder(_))));
    assert!(matches!(a.read(&mut [0u8; 4]), Err(SmdError::ProtocolOrder(_))));

    // Test 2: second opener consumes the first's OPENING but waits until
    // its own OPENING has been seen
    let m = p.modem.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream).unwrap();
    assert_eq!(m.cid(), a.cid());
    assert_eq!(m.local_state().unwrap(), ChannelState::Opening);
    assert_eq!(m.poll().unwrap(), ChannelEvents::empty());

    // Test 3: first opener sees the peer's OPENING and opens
    let events = a.poll().unwrap();
    assert!(events.contains(ChannelEvents::OPEN));
    assert_eq!(a.local_state().unwrap(), ChannelState::Opened);
    assert_eq!(a.poll().unwrap(), ChannelEvents::empty());

    // Test 4: the second opener follows
    assert_eq!(m.poll().unwrap(), ChannelEvents::OPEN);
    assert_eq!(m.local_state().unwrap(), ChannelState::Opened);
    assert_eq!(m.poll().unwrap(), ChannelEvents::empty());

    // Test 5: OPENED raises DSR/CTS/CD on both halves
    let (send, recv) = a.snapshot().unwrap();
    let up = Signals::DSR | Signals::CTS | Signals::CD;
    assert!(send.signals.contains(up));
    assert!(recv.signals.contains(up));
}

#[test]
fn simultaneous_open_converges() {
    let p = pair();
    let a = p.apps.open("RACE", Edge::AppsModem, XferType::Stream).unwrap();
    let m = p.modem.open("RACE", Edge::AppsModem, XferType::Stream).unwrap();

    // Polling in either order, repeatedly, opens both without a restart.
    let mut events = ChannelEvents::empty();
    for _ in 0..3 {
        events |= m.poll().unwrap();
        events |= a.poll().unwrap();
    }
    assert!(a.is_open().unwrap() && m.is_open().unwrap());
    assert!(!events.contains(ChannelEvents::CLOSE));

    a.write(b"kept").unwrap();
    m.poll().unwrap();
    a.poll().unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(m.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"kept");
}

#[test]
fn open_rejects_foreign_edge() {
    let p = pair();
    assert!(matches!(
        p.apps.open("Q6_ONLY", Edge::ModemQdsp, XferType::Stream),
        Err(SmdError::InvalidArgument(_))
    ));
    assert_eq!(p.apps.alloc_table().entries().filter(|e| !e.unwrap().is_free()).count(), 0);
}

#[test]
fn open_rejects_mismatched_kind() {
    let p = pair();
    let a = p.apps.open("NAME", Edge::AppsModem, XferType::Packet).unwrap();

    assert!(matches!(
        p.apps.open("NAME", Edge::AppsQdsp, XferType::Stream),
        Err(SmdError::InvalidArgument(_))
    ));
    assert!(matches!(
        p.modem.open("NAME", Edge::AppsModem, XferType::Stream),
        Err(SmdError::InvalidArgument(_))
    ));
    let entry = p.apps.alloc_table().entry(a.cid()).unwrap();
    assert_eq!(entry.ref_count, 1);
    assert_eq!(entry.xfer_type, XferType::Packet as u32);
}

#[test]
fn oversized_fifo_is_rejected() {
    let fx = common::fixture();
    assert!(matches!(
        Smd::new(fx.apps.clone(), SmdConfig::new(Host::Apps).with_fifo_size(1 << 31), NullDoorbell),
        Err(SmdError::InvalidArgument(_))
    ));

    // The largest accepted size fails cleanly on a small heap.
    let apps =
        Smd::new(fx.apps.clone(), SmdConfig::new(Host::Apps).with_fifo_size(1 << 30), NullDoorbell)
            .unwrap();
    let _modem = Smd::new(fx.modem.clone(), SmdConfig::new(Host::Modem), NullDoorbell).unwrap();
    assert!(matches!(
        apps.open("BIG", Edge::AppsModem, XferType::Stream),
        Err(SmdError::HeapExhausted { .. })
    ));
    assert!(apps.alloc_table().entries().all(|e| e.unwrap().is_free()));
}

#[test]
fn separate_fifo_layout_by_default() {
    let p = pair();
    let (a, _m) = open_both(&p, "DIAG", XferType::Packet);

    assert_eq!(p.apps.layout().unwrap(), Layout::SeparateFifo);
    let heap = p.apps.heap();
    assert_eq!(heap.get_entry(SMEM_SMD_BASE_ID + a.cid()).unwrap().1, SHARED_ITEM_SIZE);
    assert_eq!(heap.get_entry(SMEM_SMD_FIFO_BASE_ID + a.cid()).unwrap().1, 2 * SMD_BUF_SIZE);

    let snap = p.modem.channel_snapshot(a.cid()).unwrap();
    assert_eq!(snap.layout, Layout::SeparateFifo);
    assert_eq!(snap.fifo_size, SMD_BUF_SIZE);
    assert_eq!(snap.half0.state, ChannelState::Opened as u32);
    assert_eq!(snap.half1.state_name(), "OPENED");
}

#[test]
fn legacy_layout_when_modem_is_old() {
    let p = pair_with(
        SmdConfig::new(Host::Apps),
        SmdConfig::new(Host::Modem).with_protocol_version(0),
    );
    assert_eq!(p.apps.layout().unwrap(), Layout::Legacy);
    let (a, m) = open_both(&p, "DATA1", XferType::Stream);

    let heap = p.apps.heap();
    assert_eq!(heap.get_entry(SMEM_SMD_BASE_ID + a.cid()).unwrap().1, LEGACY_ITEM_SIZE);
    assert_eq!(heap.get_entry(SMEM_SMD_FIFO_BASE_ID + a.cid()).unwrap_err(), SmdError::NotFound);
    assert_eq!(p.apps.channel_snapshot(a.cid()).unwrap().layout, Layout::Legacy);

    assert_eq!(a.write(b"legacy").unwrap(), 6);
    let mut buf = [0u8; 8];
    assert_eq!(m.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf[..6], b"legacy");
}

#[test]
fn fifo_size_comes_from_creator() {
    let p = pair_with(
        SmdConfig::new(Host::Apps).with_fifo_size(1024),
        SmdConfig::new(Host::Modem),
    );
    let a = p.apps.open("SMALL", Edge::AppsModem, XferType::Stream).unwrap();
    let m = p.modem.open("SMALL", Edge::AppsModem, XferType::Stream).unwrap();
    assert_eq!(a.max_write(), 1023);
    assert_eq!(m.max_write(), 1023);
}

#[test]
fn stream_transfer_and_events() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    let mut buf = [0u8; 64];

    // Test 1: DATA shows up on the reader
    assert_eq!(a.write(b"hello").unwrap(), 5);
    let events = m.poll().unwrap();
    assert!(events.contains(ChannelEvents::DATA));
    assert!(!events.contains(ChannelEvents::SPACE));
    assert_eq!(m.read_avail().unwrap(), 5);

    // Test 2: consuming gives the writer SPACE
    assert_eq!(m.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");
    let events = a.poll().unwrap();
    assert!(events.contains(ChannelEvents::SPACE));
    assert!(!events.contains(ChannelEvents::DATA));

    // Test 3: SPACE is reported once per consume
    assert!(!a.poll().unwrap().contains(ChannelEvents::SPACE));

    // Test 4: stream writes are partial when the ring is nearly full
    let max = a.max_write();
    let chunk = vec![0x55u8; max - 3];
    assert_eq!(a.write(&chunk).unwrap(), max - 3);
    assert_eq!(a.write(b"abcdef").unwrap(), 3);
    assert_eq!(a.write(b"x").unwrap(), 0);
    assert!(matches!(
        a.write(&vec![0u8; max + 1]),
        Err(SmdError::CapacityExceeded { .. })
    ));
}

#[test]
fn stream_wraps_many_times() {
    let p = pair_with(
        SmdConfig::new(Host::Apps).with_fifo_size(1024),
        SmdConfig::new(Host::Modem).with_fifo_size(1024),
    );
    let (a, m) = open_both(&p, "WRAP", XferType::Stream);

    let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
    let mut received = Vec::new();
    let mut sent = 0;
    let mut buf = [0u8; 333];
    while received.len() < data.len() {
        if sent < data.len() {
            let end = (sent + 700).min(data.len());
            sent += a.write(&data[sent..end]).unwrap();
        }
        let n = m.read(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, data);
}

#[test]
fn packet_framing() {
    let p = pair();
    let (a, m) = open_both(&p, "DIAG", XferType::Packet);
    let mut buf = [0u8; 64];

    // Test 1: nothing queued
    assert_eq!(m.packet_size().unwrap(), 0);
    assert_eq!(m.read(&mut buf).unwrap(), 0);

    // Test 2: header plus payload, one packet per read
    assert_eq!(a.write(b"first packet").unwrap(), 12);
    assert_eq!(a.write(b"second").unwrap(), 6);
    assert_eq!(m.read_avail().unwrap(), 2 * 20 + 18);
    assert_eq!(m.packet_size().unwrap(), 12);

    // Test 3: a too-small buffer leaves the packet queued
    assert!(matches!(
        m.read(&mut buf[..4]),
        Err(SmdError::CapacityExceeded { requested: 12, capacity: 4 })
    ));
    assert_eq!(m.read(&mut buf).unwrap(), 12);
    assert_eq!(&buf[..12], b"first packet");
    assert_eq!(m.packet_size().unwrap(), 6);
    assert_eq!(m.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf[..6], b"second");
    assert_eq!(m.read_avail().unwrap(), 0);

    // Test 4: bad sizes
    assert!(matches!(a.write(b""), Err(SmdError::InvalidArgument(_))));
    let max = a.max_write();
    assert!(matches!(
        a.write(&vec![0u8; max - 19]),
        Err(SmdError::CapacityExceeded { .. })
    ));
    assert_eq!(a.write(&vec![1u8; max - 20]).unwrap(), max - 20);
}

#[test]
fn packet_write_is_all_or_nothing() {
    let p = pair();
    let (a, m) = open_both(&p, "RPC", XferType::Packet);

    assert_eq!(a.write(&[1u8; 5000]).unwrap(), 5000);
    let before = a.write_avail().unwrap();
    assert_eq!(a.write(&[2u8; 5000]).unwrap(), 0);
    assert_eq!(a.write_avail().unwrap(), before);

    let mut buf = vec![0u8; 5000];
    assert_eq!(m.read(&mut buf).unwrap(), 5000);
    assert_eq!(a.write(&[2u8; 5000]).unwrap(), 5000);
}

#[test]
fn corrupt_packet_header_is_reported() {
    let p = pair();
    let (a, _m) = open_both(&p, "MIXED", XferType::Packet);

    // Forge a header on the modem's send side: the modem is the second
    // host of the edge, so it owns half 1 and FIFO 1.
    let heap = p.modem.heap();
    let item = heap.item_region(SMEM_SMD_BASE_ID + a.cid()).unwrap();
    let fifos = heap.item_region(SMEM_SMD_FIFO_BASE_ID + a.cid()).unwrap();
    let mut header = [0u8; 20];
    header[..4].copy_from_slice(&0x0010_0000u32.to_le_bytes());
    fifos.write_bytes(SMD_BUF_SIZE as usize, &header).unwrap();
    HalfChannel::new(item, 20).unwrap().set_head(20).unwrap();

    assert!(matches!(a.packet_size(), Err(SmdError::Corrupt(_))));
    assert!(matches!(a.read(&mut [0u8; 16]), Err(SmdError::Corrupt(_))));
}

#[test]
fn close_handshake() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    let cid = a.cid();

    m.write(b"bye").unwrap();
    m.close().unwrap();
    assert_eq!(p.apps.alloc_table().entry(cid).unwrap().ref_count, 1);

    // Test 1: the survivor sees CLOSE and moves to CLOSING
    let events = a.poll().unwrap();
    assert!(events.contains(ChannelEvents::CLOSE));
    assert!(events.contains(ChannelEvents::DATA));
    assert_eq!(a.local_state().unwrap(), ChannelState::Closing);

    // Test 2: pending data can still be drained, nothing new can be sent
    let mut buf = [0u8; 8];
    assert_eq!(a.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"bye");
    assert!(matches!(a.write(b"late"), Err(SmdError::ProtocolOrder(_))));

    // Test 3: last close frees the table slot
    a.close().unwrap();
    let entry = p.apps.alloc_table().entry(cid).unwrap();
    assert!(entry.is_free());
    assert_eq!(p.apps.channel_snapshot(cid).unwrap().half0.state_name(), "CLOSED");
}

#[test]
fn reopen_after_close() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    a.write(b"stale").unwrap();
    a.close().unwrap();
    m.poll().unwrap();
    assert_eq!(m.local_state().unwrap(), ChannelState::Closing);
    m.close().unwrap();

    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    let (send, _) = a.snapshot().unwrap();
    assert_eq!(send.head, 0);
    a.write(b"fresh").unwrap();
    let mut buf = [0u8; 16];
    let n = m.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"fresh");
}

#[test]
fn peer_reopens_before_survivor_polls() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    let mut buf = [0u8; 16];

    m.write(b"abc").unwrap();
    assert_eq!(a.read(&mut buf).unwrap(), 3);
    a.write(b"unread").unwrap();
    m.close().unwrap();
    let m = p.modem.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream).unwrap();

    // Test 1: the reopener does not take the stale OPENED at face value
    assert_eq!(m.local_state().unwrap(), ChannelState::Opening);
    assert_eq!(m.poll().unwrap(), ChannelEvents::empty());

    // Test 2: the survivor notices the new session and starts over
    let events = a.poll().unwrap();
    assert!(events.contains(ChannelEvents::CLOSE));
    assert!(!events.contains(ChannelEvents::DATA));
    assert_eq!(a.local_state().unwrap(), ChannelState::Opening);
    assert_eq!(a.read_avail().unwrap(), 0);
    assert_eq!(m.read_avail().unwrap(), 0);

    // Test 3: both reopen with empty rings
    assert_eq!(m.poll().unwrap(), ChannelEvents::OPEN);
    assert!(a.poll().unwrap().contains(ChannelEvents::OPEN));
    assert!(a.is_open().unwrap() && m.is_open().unwrap());

    m.write(b"new").unwrap();
    assert_eq!(a.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"new");
    a.write(b"back").unwrap();
    assert_eq!(m.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"back");
}

#[test]
fn peer_reopens_while_survivor_is_closing() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    m.close().unwrap();
    assert!(a.poll().unwrap().contains(ChannelEvents::CLOSE));
    assert_eq!(a.local_state().unwrap(), ChannelState::Closing);

    let m = p.modem.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream).unwrap();
    for _ in 0..4 {
        a.poll().unwrap();
        m.poll().unwrap();
    }
    assert_eq!(a.local_state().unwrap(), ChannelState::Opened);
    assert_eq!(m.local_state().unwrap(), ChannelState::Opened);

    a.write(b"again").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(m.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"again");
}

#[test]
fn modem_control_lines() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA9", XferType::Stream);

    let lines = a.tiocmget().unwrap();
    assert!(lines.contains(ModemSignals::DSR | ModemSignals::CTS | ModemSignals::CD));
    assert!(lines.contains(ModemSignals::DTR | ModemSignals::RTS));
    assert!(!lines.contains(ModemSignals::RI));

    m.tiocmset(ModemSignals::empty(), ModemSignals::DTR).unwrap();
    let lines = a.tiocmget().unwrap();
    assert!(!lines.contains(ModemSignals::DSR));
    assert!(lines.contains(ModemSignals::CTS));
    assert!(a.snapshot().unwrap().1.signals.contains(Signals::STATE));

    m.tiocmset(ModemSignals::DTR, ModemSignals::RTS).unwrap();
    let lines = a.tiocmget().unwrap();
    assert!(lines.contains(ModemSignals::DSR));
    assert!(!lines.contains(ModemSignals::CTS));
    assert!(!m.tiocmget().unwrap().contains(ModemSignals::RTS));
}

#[test]
fn every_write_signals_peer_unless_blocked() {
    let p = pair();
    let (a, m) = open_both(&p, "DATA5_CNTL", XferType::Stream);
    let mux = p.apps.intr_mux();

    let before = mux.count(Host::Apps, Host::Modem).unwrap();
    a.write(b"one").unwrap();
    assert_eq!(mux.count(Host::Apps, Host::Modem).unwrap(), before + 1);

    m.set_read_interrupt_blocked(true).unwrap();
    a.write(b"two").unwrap();
    assert_eq!(mux.count(Host::Apps, Host::Modem).unwrap(), before + 1);
    assert!(a.snapshot().unwrap().0.signals.contains(Signals::HEAD));

    m.set_read_interrupt_blocked(false).unwrap();
    a.write(b"three").unwrap();
    assert_eq!(mux.count(Host::Apps, Host::Modem).unwrap(), before + 2);

    // Reads signal the writer back.
    let before = mux.count(Host::Modem, Host::Apps).unwrap();
    m.read(&mut [0u8; 32]).unwrap();
    assert_eq!(mux.count(Host::Modem, Host::Apps).unwrap(), before + 1);
}

fn wait_until<D: Doorbell>(
    ch: &SmdChannel<'_, D>,
    hub: &DoorbellHub,
    host: Host,
    mut done: impl FnMut(&SmdChannel<'_, D>) -> bool,
) {
    for _ in 0..2000 {
        ch.poll().unwrap();
        if done(ch) {
            return;
        }
        hub.line(host).wait_for_signal(Duration::from_millis(25));
    }
    panic!("timed out waiting on '{}'", ch.name());
}

#[test]
fn threaded_transfer_with_doorbells() {
    let fx = common::fixture();
    let hub = DoorbellHub::new();
    let apps = Smd::new(fx.apps.clone(), SmdConfig::new(Host::Apps).with_fifo_size(1024), &hub).unwrap();
    let modem =
        Smd::new(fx.modem.clone(), SmdConfig::new(Host::Modem).with_fifo_size(1024), &hub).unwrap();
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();

    let received = thread::scope(|s| {
        s.spawn(|| {
            let ch = apps.open("BULK", Edge::AppsModem, XferType::Stream).unwrap();
            wait_until(&ch, &hub, Host::Apps, |ch| ch.is_open().unwrap());
            let mut sent = 0;
            while sent < data.len() {
                let n = ch.write(&data[sent..(sent + 512).min(data.len())]).unwrap();
                sent += n;
                if n == 0 {
                    hub.line(Host::Apps).wait_for_signal(Duration::from_millis(25));
                }
            }
            wait_until(&ch, &hub, Host::Apps, |ch| {
                ch.local_state().unwrap() == ChannelState::Closing
            });
            ch.close().unwrap();
        });
        let reader = s.spawn(|| {
            let ch = modem.open("BULK", Edge::AppsModem, XferType::Stream).unwrap();
            let mut out = Vec::with_capacity(data.len());
            let mut buf = [0u8; 1024];
            wait_until(&ch, &hub, Host::Modem, |ch| {
                if ch.is_open().unwrap() {
                    let n = ch.read(&mut buf).unwrap();
                    out.extend_from_slice(&buf[..n]);
                }
                out.len() == data.len()
            });
            ch.close().unwrap();
            out
        });
        reader.join().unwrap()
    });

    assert_eq!(received, data);
    assert!(apps.alloc_table().entries().all(|e| e.unwrap().is_free()));
}
