// 3ware 9000-series Storage Controller Engine
pub mod caps;
pub mod command;
pub mod controller;
pub mod event;
pub mod interrupt;
pub mod management;
pub mod messages;
pub mod packet;
pub mod queue;
pub mod registry;
pub mod regs;
pub mod request;
pub mod stats;

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use spin::{Mutex, RwLock};

use crate::driver::{CoherentRegion, DmaOps, Platform};

pub use caps::{CommandQueueMode, Generation, QueueCaps};
pub use command::{Completion, HostStatus, QueueStatus, ScsiCommand};
pub use controller::{bios_geometry, Geometry};
pub use event::{Event, EventFetch, EventLog};
pub use packet::CommandPacket;
pub use registry::DriverRegistry;
pub use regs::{Control, MmioRegisters, RegisterBus, Status};
pub use request::{RequestPool, RequestState};
pub use stats::{Stats, StatsSnapshot};

pub const DRIVER_NAME: &str = "3w-9xxx";
pub const DEVICE_NAME: &str = "twa";
pub const DRIVER_VERSION: &str = "2.26.02.014";

// Opcodes
pub const OP_INIT_CONNECTION: u8 = 0x01;
pub const OP_EXECUTE_SCSI: u8 = 0x10;
pub const OP_ATA_PASSTHROUGH: u8 = 0x11;
pub const OP_GET_PARAM: u8 = 0x12;
pub const OP_SET_PARAM: u8 = 0x13;
pub const OP_DOWNLOAD_FIRMWARE: u8 = 0x16;
pub const OP_RESET: u8 = 0x1c;

// AEN codes
pub const AEN_QUEUE_EMPTY: u16 = 0x0000;
pub const AEN_SOFT_RESET: u16 = 0x0001;
pub const AEN_SYNC_TIME_WITH_HOST: u16 = 0x0031;

// AEN severities
pub const AEN_SEVERITY_ERROR: u8 = 0x1;
pub const AEN_SEVERITY_WARNING: u8 = 0x2;
pub const AEN_SEVERITY_INFO: u8 = 0x3;
pub const AEN_SEVERITY_DEBUG: u8 = 0x4;

// Firmware/driver compatibility
pub const ARCH_ID_9000: u16 = 0x5;
pub const BASE_FW_SRL: u16 = 24;
pub const BASE_FW_BRANCH: u16 = 0;
pub const BASE_FW_BUILD: u16 = 1;
pub const CURRENT_DRIVER_SRL: u16 = 35;
pub const CURRENT_DRIVER_BRANCH: u16 = 0;
pub const CURRENT_DRIVER_BUILD: u16 = 0;
pub const FW_SRL_LUNS_SUPPORTED: u16 = 28;

// Init connection
pub const CONNECTION_RUN: u16 = 256;         // Message credits for runtime
pub const CONNECTION_SHUTDOWN: u16 = 1;      // Message credits for shutdown
pub const CTLR_FW_COMPATIBLE: u32 = 0x2;
pub const FEATURE_64BIT_DMA: u32 = 1 << 0;
pub const EXTENDED_INIT_CONNECT: u32 = 1 << 1;
pub const INIT_COMMAND_PACKET_SIZE: u8 = 0x3;
pub const INIT_COMMAND_PACKET_SIZE_EXTENDED: u8 = 0x6;

// Packet errors not worth reporting
pub const ERROR_LOGICAL_UNIT_NOT_SUPPORTED: u16 = 0x10a;
pub const ERROR_UNIT_OFFLINE: u16 = 0x128;

// Limits
pub const MAX_REQUESTS: usize = 256;
pub const MAX_AEN_DRAIN: usize = 255;
pub const MAX_RESET_TRIES: usize = 2;
pub const MAX_RESPONSE_DRAIN: usize = 256;
pub const MAX_CDB_LENGTH: usize = 16;
pub const MAX_SECTORS: u32 = 256;
pub const MAX_CMDS_PER_LUN: u32 = 254;
pub const MAX_UNITS: u32 = 16;
pub const MAX_UNITS_9650SE: u32 = 32;
pub const MAX_MINORS: usize = 32;
pub const EVENT_QUEUE_LENGTH: usize = MAX_REQUESTS;
pub const CAN_QUEUE: usize = MAX_REQUESTS - 2;

// Sizes
pub const SECTOR_SIZE: usize = 512;
pub const SENSE_DATA_LENGTH: usize = 18;
pub const ERROR_DESC_LENGTH: usize = 98;
pub const ALLOCATION_LENGTH: u8 = 128;       // Sense request allocation length
pub const COMMAND_OFFSET: u64 = 128;         // Payload offset within a packet

// Parameter tables
pub const TIMEKEEP_TABLE: u16 = 0x040a;
pub const SCHEDULER_TIME_PARAM: u16 = 0x3;

// Timing
pub const DRAIN_COMPLETED_9550SX: u32 = 0xffff;
pub const PCHIP_SETTLE_TIME_MS: u32 = 500;
pub const POLL_INTERVAL_MS: u32 = 50;

/// Number of LUNs addressable with firmware at `srl`
pub const fn max_luns(srl: u16) -> u8 {
    if srl < FW_SRL_LUNS_SUPPORTED {
        1
    } else {
        16
    }
}

/// Tunables for one controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwaConfig {
    /// Prefer MSI over the shared legacy line when the generation supports it
    pub use_msi: bool,
    pub init_timeout_secs: u32,
    pub reset_timeout_secs: u32,
    /// Per synchronous response
    pub poll_timeout_secs: u32,
    pub large_queue_drain_secs: u32,
    pub ioctl_timeout_secs: u32,
}

impl Default for TwaConfig {
    fn default() -> Self {
        Self {
            use_msi: false,
            init_timeout_secs: 60,
            reset_timeout_secs: 60,
            poll_timeout_secs: 30,
            large_queue_drain_secs: 30,
            ioctl_timeout_secs: 60,
        }
    }
}

/// Firmware version triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub srl: u16,
    pub branch: u16,
    pub build: u16,
}

impl FirmwareVersion {
    pub const fn new(srl: u16, branch: u16, build: u16) -> Self {
        Self { srl, branch, build }
    }
}

/// Negotiated compatibility between driver and firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatInfo {
    pub driver_version: &'static str,
    /// Negotiated compatibility level
    pub working: FirmwareVersion,
    /// Driver maximum firmware version
    pub max: FirmwareVersion,
    /// Driver minimum firmware version
    pub min: FirmwareVersion,
    /// Firmware stored in controller
    pub firmware: FirmwareVersion,
}

impl Default for CompatInfo {
    fn default() -> Self {
        Self {
            driver_version: DRIVER_VERSION,
            working: FirmwareVersion::default(),
            max: FirmwareVersion::new(CURRENT_DRIVER_SRL, CURRENT_DRIVER_BRANCH, CURRENT_DRIVER_BUILD),
            min: FirmwareVersion::new(BASE_FW_SRL, BASE_FW_BRANCH, BASE_FW_BUILD),
            firmware: FirmwareVersion::default(),
        }
    }
}

/// One attached controller
pub struct TwaDevice {
    minor: usize,
    caps: QueueCaps,
    config: TwaConfig,
    regs: Box<dyn RegisterBus>,
    dma: Arc<dyn DmaOps>,
    platform: Arc<dyn Platform>,
    packets: Option<CoherentRegion>,
    buffers: Option<CoherentRegion>,
    pool: RequestPool,
    /// Guards register read-modify-write sequences
    queue_lock: Mutex<()>,
    /// Held for read while submitting, for write while aborting everything
    host_lock: RwLock<()>,
    /// Serializes management commands and resets
    ioctl_lock: Mutex<()>,
    ioctl_wait: AtomicU8,
    in_reset: AtomicBool,
    offline: AtomicBool,
    using_msi: bool,
    stats: Stats,
    events: Mutex<EventLog>,
    compat: RwLock<CompatInfo>,
}

impl TwaDevice {
    /// Registry minor, also used as the SCSI host's unique id
    pub fn minor(&self) -> usize {
        self.minor
    }

    pub fn caps(&self) -> &QueueCaps {
        &self.caps
    }

    pub fn config(&self) -> &TwaConfig {
        &self.config
    }

    pub fn max_units(&self) -> u32 {
        self.caps.max_units
    }

    pub fn max_lun(&self) -> u8 {
        max_luns(self.compat.read().working.srl)
    }

    pub fn using_msi(&self) -> bool {
        self.using_msi
    }

    pub fn compat_info(&self) -> CompatInfo {
        *self.compat.read()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn in_reset(&self) -> bool {
        self.in_reset.load(Ordering::Acquire)
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Current state of request slot `id`
    pub fn request_state(&self, id: usize) -> RequestState {
        self.pool.state(id)
    }

    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    // The event log is also appended to from the interrupt handler.
    pub fn first_event(&self) -> crate::driver::Result<EventFetch> {
        self.without_interrupts(|| self.events.lock().first())
    }

    pub fn last_event(&self) -> crate::driver::Result<EventFetch> {
        self.without_interrupts(|| self.events.lock().last())
    }

    pub fn next_event(&self, sequence_id: u32) -> crate::driver::Result<EventFetch> {
        self.without_interrupts(|| self.events.lock().next(sequence_id))
    }

    pub fn previous_event(&self, sequence_id: u32) -> crate::driver::Result<EventFetch> {
        self.without_interrupts(|| self.events.lock().previous(sequence_id))
    }

    fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        crate::driver::without_interrupts(self.platform(), f)
    }
}

impl Drop for TwaDevice {
    fn drop(&mut self) {
        if let Some(region) = self.packets.take() {
            self.dma.free_coherent(region);
        }
        if let Some(region) = self.buffers.take() {
            self.dma.free_coherent(region);
        }
    }
}
