//! Host-side exerciser: two simulated processors share one heap-backed
//! region, open channels to each other, run the SMSM self-test and dump
//! every diagnostic view.

use std::error::Error;
use std::thread;
use std::time::Duration;

use log::{info, LevelFilter};
use smd::platform::{SMSM_INIT, SMSM_SMDINIT};
use smd::smd::{ChannelEvents, ChannelState};
use smd::smsm::selftest;
use smd::{
    console, diag, print, println, Doorbell, DoorbellHub, Edge, HeapRegion, Host, InterruptLine,
    SharedHeap, Smd, SmdChannel, SmdConfig, Smsm, XferType,
};

type BoxResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const REGION_SIZE: usize = 256 * 1024;
const WAIT: Duration = Duration::from_millis(50);
const MAX_WAITS: usize = 100;

fn main() {
    console::set_sink(console::stdout_sink);
    if let Err(e) = console::init(LevelFilter::Info) {
        eprintln!("smd-diag: {}", e);
    }
    if let Err(e) = run() {
        eprintln!("smd-diag: {}", e);
        std::process::exit(1);
    }
}

fn run() -> BoxResult<()> {
    let backing = HeapRegion::new_zeroed(REGION_SIZE)?;
    let region = backing.region();
    let hub = DoorbellHub::new();

    let apps_heap = SharedHeap::format(region, Host::Apps)?;
    let modem_heap = SharedHeap::attach(region, Host::Modem)?;

    // Both ends publish their version before any channel picks a layout.
    let apps = Smd::new(apps_heap.clone(), SmdConfig::new(Host::Apps), &hub)?;
    let modem = Smd::new(modem_heap.clone(), SmdConfig::new(Host::Modem), &hub)?;
    let modem_smsm = Smsm::new(&modem_heap, &hub)?;
    modem_smsm.change_state(Host::Modem.state_entry(), 0, SMSM_INIT | SMSM_SMDINIT)?;

    thread::scope(|s| -> BoxResult<()> {
        let apps_side = s.spawn(|| apps_endpoint(&apps, hub.line(Host::Apps)));
        let modem_side = s.spawn(|| modem_endpoint(&modem, hub.line(Host::Modem)));
        apps_side.join().map_err(|_| "apps endpoint panicked")??;
        modem_side.join().map_err(|_| "modem endpoint panicked")??;
        Ok(())
    })?;

    let apps_smsm = Smsm::new(&apps_heap, &hub)?;
    apps_smsm.handle_interrupt()?;
    let mut report = String::new();
    let result = selftest::run(&apps_smsm, &mut report)?;
    print!("{}", report);
    info!("selftest passed: {}", result.all_passed());

    let mut dump = String::new();
    diag::dump_all(&apps_heap, &mut dump)?;
    print!("{}", dump);
    Ok(())
}

fn wait_open<D: Doorbell>(ch: &SmdChannel<'_, D>, line: &InterruptLine) -> BoxResult<()> {
    wait_for(ch, line, |ch, _| Ok(ch.is_open()?))
}

fn wait_for<D: Doorbell>(
    ch: &SmdChannel<'_, D>,
    line: &InterruptLine,
    mut done: impl FnMut(&SmdChannel<'_, D>, ChannelEvents) -> BoxResult<bool>,
) -> BoxResult<()> {
    for _ in 0..MAX_WAITS {
        let events = ch.poll()?;
        if done(ch, events)? {
            return Ok(());
        }
        line.wait_for_signal(WAIT);
    }
    Err(format!("timed out on '{}'", ch.name()).into())
}

fn apps_endpoint<D: Doorbell>(smd: &Smd<D>, line: &InterruptLine) -> BoxResult<()> {
    let ctl = smd.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream)?;
    let diag_ch = smd.open("DIAG", Edge::AppsModem, XferType::Packet)?;
    wait_open(&ctl, line)?;
    wait_open(&diag_ch, line)?;

    ctl.write(b"ping")?;
    for packet in [&b"first packet"[..], &b"second"[..]] {
        diag_ch.write(packet)?;
    }

    let mut buf = [0u8; 16];
    let mut got = 0;
    wait_for(&ctl, line, |ch, _| {
        got += ch.read(&mut buf[got..])?;
        Ok(got >= 4)
    })?;
    println!("apps: received {:?}", String::from_utf8_lossy(&buf[..got]));

    // The modem closes first; wait for the close to reach us.
    wait_for(&ctl, line, |ch, events| {
        Ok(events.contains(ChannelEvents::CLOSE) || ch.local_state()? == ChannelState::Closing)
    })?;
    ctl.close()?;
    diag_ch.close()?;
    Ok(())
}

fn modem_endpoint<D: Doorbell>(smd: &Smd<D>, line: &InterruptLine) -> BoxResult<()> {
    let ctl = smd.open("DATA5_CNTL", Edge::AppsModem, XferType::Stream)?;
    let diag_ch = smd.open("DIAG", Edge::AppsModem, XferType::Packet)?;
    wait_open(&ctl, line)?;
    wait_open(&diag_ch, line)?;

    let mut buf = [0u8; 64];
    let mut got = 0;
    wait_for(&ctl, line, |ch, _| {
        got += ch.read(&mut buf[got..])?;
        Ok(got >= 4)
    })?;
    println!("modem: received {:?}", String::from_utf8_lossy(&buf[..got]));
    ctl.write(b"pong")?;

    let mut packets = 0;
    wait_for(&diag_ch, line, |ch, _| {
        while ch.packet_size()? > 0 {
            let n = ch.read(&mut buf)?;
            if n == 0 {
                break;
            }
            println!("modem: packet {:?}", String::from_utf8_lossy(&buf[..n]));
            packets += 1;
        }
        Ok(packets == 2)
    })?;

    // Let apps drain "pong" before we go away.
    wait_for(&ctl, line, |ch, _| Ok(ch.write_avail()? == ch.max_write()))?;
    ctl.close()?;
    diag_ch.close()?;
    Ok(())
}
