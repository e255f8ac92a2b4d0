// 3ware Register Access Layer
use alloc::sync::Arc;
use core::ptr::NonNull;
use volatile::{ReadOnly, Volatile, WriteOnly};

// Register offsets within the MMIO BAR
pub const CONTROL_REG: usize = 0x00;              // Control (write-only)
pub const STATUS_REG: usize = 0x04;               // Status (read-only)
pub const COMMAND_QUEUE_REG: usize = 0x08;        // 32-bit command queue
pub const RESPONSE_QUEUE_REG: usize = 0x0c;       // Response queue
pub const COMMAND_QUEUE_LARGE_REG: usize = 0x20;  // 64-bit command queue (low, high)
pub const RESPONSE_QUEUE_LARGE_REG: usize = 0x30; // P-chip response queue

// PCI status register values
pub const PCI_CLEAR_PARITY_ERRORS: u16 = 0xc100;
pub const PCI_CLEAR_PCI_ABORT: u16 = 0x2000;

bitflags::bitflags! {
    /// Control register bits; every write sets only the bits named
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        const CLEAR_PARITY_ERROR = 0x0080_0000;
        const CLEAR_QUEUE_ERROR = 0x0040_0000;
        const CLEAR_PCI_ABORT = 0x0010_0000;
        const CLEAR_HOST_INTERRUPT = 0x0008_0000;
        const CLEAR_ATTENTION_INTERRUPT = 0x0004_0000;
        const MASK_COMMAND_INTERRUPT = 0x0002_0000;
        const MASK_RESPONSE_INTERRUPT = 0x0001_0000;
        const UNMASK_COMMAND_INTERRUPT = 0x0000_8000;
        const UNMASK_RESPONSE_INTERRUPT = 0x0000_4000;
        const CLEAR_ERROR_STATUS = 0x0000_0200;
        const ISSUE_SOFT_RESET = 0x0000_0100;
        const ENABLE_INTERRUPTS = 0x0000_0080;
        const DISABLE_INTERRUPTS = 0x0000_0040;
        const ISSUE_HOST_INTERRUPT = 0x0000_0020;

        const CLEAR_ALL_INTERRUPTS = 0x00df_0000;
    }
}

bitflags::bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const MAJOR_VERSION_MASK = 0xf000_0000;
        const MINOR_VERSION_MASK = 0x0f00_0000;
        const PCI_PARITY_ERROR = 0x0080_0000;
        const QUEUE_ERROR = 0x0040_0000;
        const MICROCONTROLLER_ERROR = 0x0020_0000;
        const PCI_ABORT = 0x0010_0000;
        const HOST_INTERRUPT = 0x0008_0000;
        const ATTENTION_INTERRUPT = 0x0004_0000;
        const COMMAND_INTERRUPT = 0x0002_0000;
        const RESPONSE_INTERRUPT = 0x0001_0000;
        const COMMAND_QUEUE_FULL = 0x0000_8000;
        const RESPONSE_QUEUE_EMPTY = 0x0000_4000;
        const MICROCONTROLLER_READY = 0x0000_2000;
        const COMMAND_QUEUE_EMPTY = 0x0000_1000;

        const VALID_INTERRUPT = 0x00df_0000;
    }
}

impl Status {
    pub fn major_version(&self) -> u8 {
        (self.bits() >> 28) as u8
    }

    pub fn minor_version(&self) -> u8 {
        ((self.bits() >> 24) & 0xf) as u8
    }

    /// At least one interrupt source belongs to this controller
    pub fn is_ours(&self) -> bool {
        self.intersects(Status::VALID_INTERRUPT)
    }
}

/// Raw register window of one controller
pub trait RegisterBus: Send + Sync {
    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);

    /// 64-bit write as two 32-bit writes, low word first
    fn write64(&self, offset: usize, value: u64) {
        self.write32(offset, value as u32);
        self.write32(offset + 4, (value >> 32) as u32);
    }

    /// Write the PCI configuration status register
    fn clear_pci_status(&self, _bits: u16) {}
}

impl<T: RegisterBus + ?Sized> RegisterBus for Arc<T> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }

    fn write64(&self, offset: usize, value: u64) {
        (**self).write64(offset, value)
    }

    fn clear_pci_status(&self, bits: u16) {
        (**self).clear_pci_status(bits)
    }
}

// Register block as laid out in the BAR
#[repr(C)]
struct RegisterBlock {
    control: WriteOnly<u32>,                  // 0x00
    status: ReadOnly<u32>,                    // 0x04
    command_queue: WriteOnly<u32>,            // 0x08
    response_queue: ReadOnly<u32>,            // 0x0c
    _reserved0: [u32; 4],                     // 0x10
    command_queue_large: [WriteOnly<u32>; 2], // 0x20
    _reserved1: [u32; 2],                     // 0x28
    response_queue_large: ReadOnly<u32>,      // 0x30
}

/// Memory-mapped registers of a real controller
pub struct MmioRegisters {
    block: NonNull<RegisterBlock>,
}

unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// # Safety
    /// `base` must be the virtual address of the mapped controller BAR,
    /// valid for the lifetime of the returned value.
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        Self { block: base.cast() }
    }

    #[allow(clippy::mut_from_ref)]
    fn block(&self) -> &mut RegisterBlock {
        // Every field is a volatile cell; concurrent access is the device's concern.
        unsafe { &mut *self.block.as_ptr() }
    }

    // Both halves of the large command queue as one 8-byte aligned cell.
    #[allow(clippy::mut_from_ref)]
    fn command_queue_large64(&self) -> &mut Volatile<u64> {
        let cell = self.block().command_queue_large.as_mut_ptr() as *mut Volatile<u64>;
        unsafe { &mut *cell }
    }
}

impl RegisterBus for MmioRegisters {
    fn read32(&self, offset: usize) -> u32 {
        let block = self.block();
        match offset {
            STATUS_REG => block.status.read(),
            RESPONSE_QUEUE_REG => block.response_queue.read(),
            RESPONSE_QUEUE_LARGE_REG => block.response_queue_large.read(),
            _ => {
                log::warn!("twa: read of unreadable register 0x{:02x}", offset);
                0
            }
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let block = self.block();
        match offset {
            CONTROL_REG => block.control.write(value),
            COMMAND_QUEUE_REG => block.command_queue.write(value),
            COMMAND_QUEUE_LARGE_REG => block.command_queue_large[0].write(value),
            o if o == COMMAND_QUEUE_LARGE_REG + 4 => block.command_queue_large[1].write(value),
            _ => log::warn!("twa: write to unwritable register 0x{:02x}", offset),
        }
    }

    /// The large command queue takes the whole address in one store; the
    /// controller acts on the high half, so a split write would post a torn
    /// address.
    fn write64(&self, offset: usize, value: u64) {
        if offset == COMMAND_QUEUE_LARGE_REG {
            self.command_queue_large64().write(value);
        } else {
            self.write32(offset, value as u32);
            self.write32(offset + 4, (value >> 32) as u32);
        }
    }
}
