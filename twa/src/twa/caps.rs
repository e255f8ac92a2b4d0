// Controller Generations and Queue Capabilities
use super::{MAX_UNITS, MAX_UNITS_9650SE};

// PCI identifiers
pub const PCI_VENDOR_ID_3WARE: u16 = 0x13c1;
pub const PCI_DEVICE_ID_3WARE_9000: u16 = 0x1002;
pub const PCI_DEVICE_ID_3WARE_9550SX: u16 = 0x1003;
pub const PCI_DEVICE_ID_3WARE_9650SE: u16 = 0x1004;
pub const PCI_DEVICE_ID_3WARE_9690SA: u16 = 0x1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Escalade9000,
    Escalade9550SX,
    Escalade9650SE,
    Escalade9690SA,
}

impl Generation {
    pub fn from_device_id(device_id: u16) -> Option<Self> {
        match device_id {
            PCI_DEVICE_ID_3WARE_9000 => Some(Generation::Escalade9000),
            PCI_DEVICE_ID_3WARE_9550SX => Some(Generation::Escalade9550SX),
            PCI_DEVICE_ID_3WARE_9650SE => Some(Generation::Escalade9650SE),
            PCI_DEVICE_ID_3WARE_9690SA => Some(Generation::Escalade9690SA),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Generation::Escalade9000 => "9000",
            Generation::Escalade9550SX => "9550SX",
            Generation::Escalade9650SE => "9650SE",
            Generation::Escalade9690SA => "9690SA",
        }
    }
}

/// How a packet address reaches the command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandQueueMode {
    /// Low word to the large register before the status check, high word to commit
    SplitLarge,
    /// Single 64-bit write to the large register
    Large64,
    /// Single 32-bit write to the legacy register
    Legacy32,
}

/// Per-generation behavior, resolved once at attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCaps {
    pub generation: Generation,
    pub command_queue: CommandQueueMode,
    /// P-chip response queue must be drained after a soft reset
    pub large_response_queue: bool,
    /// Queue errors are expected while resetting and not logged
    pub quiet_queue_error_in_reset: bool,
    pub max_units: u32,
    /// BAR holding the register window
    pub mmio_bar: u8,
    pub msi_capable: bool,
}

impl QueueCaps {
    pub fn for_generation(generation: Generation) -> Self {
        let wide = cfg!(target_pointer_width = "64");
        match generation {
            Generation::Escalade9000 | Generation::Escalade9550SX => Self {
                generation,
                command_queue: if wide { CommandQueueMode::Large64 } else { CommandQueueMode::Legacy32 },
                large_response_queue: generation == Generation::Escalade9550SX,
                quiet_queue_error_in_reset: false,
                max_units: MAX_UNITS,
                mmio_bar: if generation == Generation::Escalade9000 { 1 } else { 2 },
                msi_capable: generation != Generation::Escalade9000,
            },
            Generation::Escalade9650SE | Generation::Escalade9690SA => Self {
                generation,
                command_queue: CommandQueueMode::SplitLarge,
                large_response_queue: true,
                quiet_queue_error_in_reset: true,
                max_units: MAX_UNITS_9650SE,
                mmio_bar: 2,
                msi_capable: true,
            },
        }
    }

    pub fn for_device_id(device_id: u16) -> Option<Self> {
        Generation::from_device_id(device_id).map(Self::for_generation)
    }
}
