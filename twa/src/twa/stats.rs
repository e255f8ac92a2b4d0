// Controller Statistics
//
// The pending count gates posting and the reset count is the reset
// generation; everything else is reporting only.
use alloc::string::{String, ToString};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use super::DRIVER_VERSION;

#[derive(Default)]
pub struct Stats {
    posted_requests: AtomicU32,
    max_posted_requests: AtomicU32,
    pending_requests: AtomicU32,
    max_pending_requests: AtomicU32,
    sectors: AtomicU32,
    max_sectors: AtomicU32,
    sgl_entries: AtomicU32,
    max_sgl_entries: AtomicU32,
    aens: AtomicU32,
    resets: AtomicU32,
}

// Raise `max` to `value` unless another context already raised it further.
fn raise_max(max: &AtomicU32, value: u32) {
    let mut current = max.load(Ordering::Relaxed);
    while value > current {
        match max.compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn bump(current: &AtomicU32, max: &AtomicU32) {
    let value = current.fetch_add(1, Ordering::AcqRel) + 1;
    raise_max(max, value);
}

fn update(current: &AtomicU32, max: &AtomicU32, value: u32) {
    current.store(value, Ordering::Release);
    raise_max(max, value);
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump_posted(&self) {
        bump(&self.posted_requests, &self.max_posted_requests);
    }

    pub fn dec_posted(&self) {
        self.posted_requests.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn bump_pending(&self) {
        bump(&self.pending_requests, &self.max_pending_requests);
    }

    pub fn dec_pending(&self) {
        self.pending_requests.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u32 {
        self.pending_requests.load(Ordering::Acquire)
    }

    pub fn posted(&self) -> u32 {
        self.posted_requests.load(Ordering::Acquire)
    }

    pub fn update_sectors(&self, sectors: u32) {
        update(&self.sectors, &self.max_sectors, sectors);
    }

    pub fn update_sgl_entries(&self, entries: u32) {
        update(&self.sgl_entries, &self.max_sgl_entries, entries);
    }

    pub fn inc_aens(&self) {
        self.aens.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_resets(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
    }

    /// Completed host resets; doubles as the reset generation
    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }

    /// Text block in the format management tools expect
    pub fn report(&self) -> String {
        self.snapshot().to_string()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posted_requests: self.posted_requests.load(Ordering::Acquire),
            max_posted_requests: self.max_posted_requests.load(Ordering::Acquire),
            pending_requests: self.pending_requests.load(Ordering::Acquire),
            max_pending_requests: self.max_pending_requests.load(Ordering::Acquire),
            sectors: self.sectors.load(Ordering::Acquire),
            max_sectors: self.max_sectors.load(Ordering::Acquire),
            sgl_entries: self.sgl_entries.load(Ordering::Acquire),
            max_sgl_entries: self.max_sgl_entries.load(Ordering::Acquire),
            aens: self.aens.load(Ordering::Acquire),
            resets: self.resets.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub posted_requests: u32,
    pub max_posted_requests: u32,
    pub pending_requests: u32,
    pub max_pending_requests: u32,
    pub sectors: u32,
    pub max_sectors: u32,
    pub sgl_entries: u32,
    pub max_sgl_entries: u32,
    pub aens: u32,
    pub resets: u32,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "3w-9xxx Driver version: {}", DRIVER_VERSION)?;
        writeln!(f, "Current commands posted:   {:4}", self.posted_requests)?;
        writeln!(f, "Max commands posted:       {:4}", self.max_posted_requests)?;
        writeln!(f, "Current pending commands:  {:4}", self.pending_requests)?;
        writeln!(f, "Max pending commands:      {:4}", self.max_pending_requests)?;
        writeln!(f, "Last sgl length:           {:4}", self.sgl_entries)?;
        writeln!(f, "Max sgl length:            {:4}", self.max_sgl_entries)?;
        writeln!(f, "Last sector count:         {:4}", self.sectors)?;
        writeln!(f, "Max sector count:          {:4}", self.max_sectors)?;
        writeln!(f, "SCSI Host Resets:          {:4}", self.resets)?;
        writeln!(f, "AEN's:                     {:4}", self.aens)
    }
}
