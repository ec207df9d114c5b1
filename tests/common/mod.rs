//! Shared fixtures: a zeroed heap-backed region formatted by apps and
//! attached by the modem.

#![allow(dead_code)]

use smd::{HeapRegion, Host, SharedHeap, SharedRegion};

pub const REGION_SIZE: usize = 256 * 1024;

pub struct Fixture {
    pub apps: SharedHeap,
    pub modem: SharedHeap,
    // Dropped last; every handle above points into it.
    backing: HeapRegion,
}

impl Fixture {
    pub fn region(&self) -> SharedRegion {
        self.backing.region()
    }
}

pub fn fixture() -> Fixture {
    fixture_sized(REGION_SIZE)
}

pub fn fixture_sized(len: usize) -> Fixture {
    let backing = HeapRegion::new_zeroed(len).unwrap();
    let apps = SharedHeap::format(backing.region(), Host::Apps).unwrap();
    let modem = SharedHeap::attach(backing.region(), Host::Modem).unwrap();
    Fixture { apps, modem, backing }
}
