//! Driver Registration and Minor Allocation

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::caps::{
    PCI_DEVICE_ID_3WARE_9000, PCI_DEVICE_ID_3WARE_9550SX, PCI_DEVICE_ID_3WARE_9650SE,
    PCI_DEVICE_ID_3WARE_9690SA, PCI_VENDOR_ID_3WARE,
};
use super::{DRIVER_VERSION, MAX_MINORS};
use crate::driver::{DriverError, Result};

/// PCI ids this driver binds to
pub const PCI_MATCH_TABLE: [(u16, u16); 4] = [
    (PCI_VENDOR_ID_3WARE, PCI_DEVICE_ID_3WARE_9000),
    (PCI_VENDOR_ID_3WARE, PCI_DEVICE_ID_3WARE_9550SX),
    (PCI_VENDOR_ID_3WARE, PCI_DEVICE_ID_3WARE_9650SE),
    (PCI_VENDOR_ID_3WARE, PCI_DEVICE_ID_3WARE_9690SA),
];

const _: () = assert!(MAX_MINORS <= 32);

/// Driver-wide state shared by every attached controller
pub struct DriverRegistry {
    /// One bit per minor in use
    minors: AtomicU32,
    initialized: AtomicBool,
}

impl DriverRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            minors: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// Announce the driver; must run before the first attach
    pub fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(DriverError::InvalidState);
        }
        log::info!("3ware 9000 Storage Controller Driver v{}", DRIVER_VERSION);
        Ok(())
    }

    /// Unregister the driver; every controller must be detached
    pub fn teardown(&self) -> Result<()> {
        if self.in_use() != 0 {
            return Err(DriverError::InvalidState);
        }
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether this driver handles the given PCI function
    pub fn matches(&self, vendor_id: u16, device_id: u16) -> bool {
        PCI_MATCH_TABLE.contains(&(vendor_id, device_id))
    }

    /// Claim the lowest free minor
    pub fn get_minor(&self) -> Result<usize> {
        let mut current = self.minors.load(Ordering::Acquire);
        loop {
            let minor = (!current).trailing_zeros() as usize;
            if minor >= MAX_MINORS {
                return Err(DriverError::NoSpace);
            }
            match self.minors.compare_exchange_weak(
                current,
                current | 1 << minor,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(minor),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_minor(&self, minor: usize) {
        if minor < MAX_MINORS {
            self.minors.fetch_and(!(1 << minor), Ordering::AcqRel);
        }
    }

    /// Number of minors in use
    pub fn in_use(&self) -> usize {
        self.minors.load(Ordering::Acquire).count_ones() as usize
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
