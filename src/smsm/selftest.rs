//! In-situ check of the callback registry.
//!
//! Three scripted scenarios run against this host's own state entry:
//!
//! 1. a single registration fires on both edges of its bit and goes quiet
//!    once removed
//! 2. a second mask for the same `(handler, data)` merges into the first
//!    record and can be removed bit by bit
//! 3. two `data` values give two independent records
//!
//! Each scenario leaves `SMSM_INIT | SMSM_SMDINIT` set and no
//! registrations behind, pass or fail.

use core::fmt;

use log::{info, warn};

use super::Smsm;
use crate::doorbell::Doorbell;
use crate::error::SmdError;
use crate::platform::{SMSM_INIT, SMSM_SMDINIT};
use crate::sync::SpinLock;

const DATA_A: usize = 0x1234;
const DATA_B: usize = 0x3456;

pub const NUM_SCENARIOS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
struct CbRecord {
    count: u32,
    old: u32,
    new: u32,
    data: usize,
}

/// Serializes runs; the handler records into a single static.
static SELFTEST_GATE: SpinLock<()> = SpinLock::new(());
static CB_RECORD: SpinLock<CbRecord> = SpinLock::new(CbRecord {
    count: 0,
    old: 0,
    new: 0,
    data: 0,
});

fn record_cb(data: usize, old: u32, new: u32) {
    let mut rec = CB_RECORD.lock();
    rec.count += 1;
    rec.old = old;
    rec.new = new;
    rec.data = data;
}

fn record() -> CbRecord {
    *CB_RECORD.lock()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfTestReport {
    pub passed: [bool; NUM_SCENARIOS],
}

impl SelfTestReport {
    pub fn all_passed(&self) -> bool {
        self.passed.iter().all(|&p| p)
    }
}

enum Failure {
    Mismatch { what: &'static str, got: u64, want: u64 },
    Error(SmdError),
}

impl From<SmdError> for Failure {
    fn from(e: SmdError) -> Self {
        Failure::Error(e)
    }
}

type Step = core::result::Result<(), Failure>;

fn expect(what: &'static str, got: impl Into<u64>, want: impl Into<u64>) -> Step {
    let (got, want) = (got.into(), want.into());
    if got != want {
        return Err(Failure::Mismatch { what, got, want });
    }
    Ok(())
}

/// Run every scenario, writing one line per scenario to `out`.
pub fn run<D: Doorbell, W: fmt::Write>(
    smsm: &Smsm<D>,
    out: &mut W,
) -> Result<SelfTestReport, fmt::Error> {
    let _gate = SELFTEST_GATE.lock();
    let entry = smsm.host().state_entry();
    let scenarios: [fn(&Smsm<D>, usize) -> Step; NUM_SCENARIOS] = [
        single_registration::<D>,
        merged_registration::<D>,
        distinct_data::<D>,
    ];

    let mut report = SelfTestReport { passed: [false; NUM_SCENARIOS] };
    for (n, scenario) in scenarios.iter().enumerate() {
        *CB_RECORD.lock() = CbRecord::default();
        let result = smsm
            .change_state(entry, 0, SMSM_INIT | SMSM_SMDINIT)
            .map_err(Failure::from)
            .and_then(|_| scenario(smsm, entry));
        let result = result.and(cleanup(smsm, entry));

        let num = n + 1;
        match result {
            Ok(()) => {
                report.passed[n] = true;
                writeln!(out, "Test {} - PASS", num)?;
            }
            Err(Failure::Mismatch { what, got, want }) => {
                warn!("smsm selftest {}: {} = {:#x}, expected {:#x}", num, what, got, want);
                writeln!(out, "Test {} - FAIL: {} = {:#x}, expected {:#x}", num, what, got, want)?;
            }
            Err(Failure::Error(e)) => {
                warn!("smsm selftest {}: {}", num, e);
                writeln!(out, "Test {} - FAIL: {}", num, e)?;
            }
        }
    }
    info!("smsm selftest: {:?}", report.passed);
    Ok(report)
}

/// Remove both records and restore the init bits. Every step runs; the
/// first error is returned.
fn cleanup<D: Doorbell>(smsm: &Smsm<D>, entry: usize) -> Step {
    let all = SMSM_INIT | SMSM_SMDINIT;
    let mut first = Ok(());
    for data in [DATA_A, DATA_B] {
        if let Err(e) = smsm.deregister(entry, all, record_cb, data) {
            warn!("smsm selftest: deregister {:#x} on entry {}: {}", data, entry, e);
            first = first.and(Err(Failure::Error(e)));
        }
    }
    if let Err(e) = smsm.change_state(entry, 0, all) {
        warn!("smsm selftest: restoring entry {}: {}", entry, e);
        first = first.and(Err(Failure::Error(e)));
    }
    first
}

fn flip<D: Doorbell>(smsm: &Smsm<D>, entry: usize, bit: u32) -> Step {
    smsm.change_state(entry, bit, 0)?;
    smsm.change_state(entry, 0, bit)?;
    Ok(())
}

fn single_registration<D: Doorbell>(smsm: &Smsm<D>, entry: usize) -> Step {
    let (added, _) = smsm.register(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("register", added.code(), 0u32)?;

    smsm.change_state(entry, SMSM_SMDINIT, 0)?;
    let rec = record();
    expect("cb_count", rec.count, 1u32)?;
    expect("old_state & SMDINIT", rec.old & SMSM_SMDINIT, SMSM_SMDINIT)?;
    expect("new_state & SMDINIT", rec.new & SMSM_SMDINIT, 0u32)?;
    expect("data", rec.data as u64, DATA_A as u64)?;

    smsm.change_state(entry, 0, SMSM_SMDINIT)?;
    let rec = record();
    expect("cb_count", rec.count, 2u32)?;
    expect("old_state & SMDINIT", rec.old & SMSM_SMDINIT, 0u32)?;
    expect("new_state & SMDINIT", rec.new & SMSM_SMDINIT, SMSM_SMDINIT)?;

    let removed = smsm.deregister(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("deregister", removed.code(), 2u32)?;

    flip(smsm, entry, SMSM_SMDINIT)?;
    expect("cb_count", record().count, 2u32)
}

fn merged_registration<D: Doorbell>(smsm: &Smsm<D>, entry: usize) -> Step {
    let (first, _) = smsm.register(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("register", first.code(), 0u32)?;
    let (second, _) = smsm.register(entry, SMSM_INIT, record_cb, DATA_A)?;
    expect("register", second.code(), 1u32)?;

    smsm.change_state(entry, SMSM_SMDINIT, 0)?;
    expect("cb_count", record().count, 1u32)?;
    smsm.change_state(entry, 0, SMSM_SMDINIT)?;
    expect("cb_count", record().count, 2u32)?;
    smsm.change_state(entry, SMSM_INIT, 0)?;
    expect("cb_count", record().count, 3u32)?;
    smsm.change_state(entry, 0, SMSM_INIT)?;
    expect("cb_count", record().count, 4u32)?;

    let cleared = smsm.deregister(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("deregister", cleared.code(), 1u32)?;

    flip(smsm, entry, SMSM_SMDINIT)?;
    expect("cb_count", record().count, 4u32)?;
    smsm.change_state(entry, SMSM_INIT, 0)?;
    expect("cb_count", record().count, 5u32)?;
    smsm.change_state(entry, 0, SMSM_INIT)?;
    expect("cb_count", record().count, 6u32)?;

    let removed = smsm.deregister(entry, SMSM_INIT, record_cb, DATA_A)?;
    expect("deregister", removed.code(), 2u32)?;

    flip(smsm, entry, SMSM_INIT)?;
    expect("cb_count", record().count, 6u32)
}

fn distinct_data<D: Doorbell>(smsm: &Smsm<D>, entry: usize) -> Step {
    let (a, _) = smsm.register(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("register", a.code(), 0u32)?;
    let (b, _) = smsm.register(entry, SMSM_INIT, record_cb, DATA_B)?;
    expect("register", b.code(), 0u32)?;

    smsm.change_state(entry, SMSM_SMDINIT, 0)?;
    let rec = record();
    expect("cb_count", rec.count, 1u32)?;
    expect("data", rec.data as u64, DATA_A as u64)?;
    smsm.change_state(entry, 0, SMSM_SMDINIT)?;
    let rec = record();
    expect("cb_count", rec.count, 2u32)?;
    expect("data", rec.data as u64, DATA_A as u64)?;

    smsm.change_state(entry, SMSM_INIT, 0)?;
    let rec = record();
    expect("cb_count", rec.count, 3u32)?;
    expect("data", rec.data as u64, DATA_B as u64)?;
    smsm.change_state(entry, 0, SMSM_INIT)?;
    let rec = record();
    expect("cb_count", rec.count, 4u32)?;
    expect("data", rec.data as u64, DATA_B as u64)?;

    let removed = smsm.deregister(entry, SMSM_SMDINIT, record_cb, DATA_A)?;
    expect("deregister", removed.code(), 2u32)?;
    let removed = smsm.deregister(entry, SMSM_INIT, record_cb, DATA_B)?;
    expect("deregister", removed.code(), 2u32)
}
