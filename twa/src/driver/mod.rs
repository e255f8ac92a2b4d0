//! Driver Framework Primitives
//!
//! Shared building blocks for the controller engine:
//! - Framework error type and `Result` alias
//! - Platform services (sleeping, uptime, wall clock)
//! - DMA and interrupt handling types

use core::fmt;

pub mod dma;
pub mod interrupt;

pub use dma::{CoherentRegion, DmaDirection, DmaOps, DmaSegment, ScatterList};
pub use interrupt::InterruptReturn;

/// Driver framework errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Controller cannot accept the command right now; retry later
    Busy,
    /// No response within the allotted time
    Timeout,
    /// Fatal controller status or protocol violation
    Io,
    /// Firmware rejected both the maximum and minimum driver versions
    Incompatible,
    /// Coherent allocation failed
    NoMemory,
    /// Scatter-gather mapping failed
    DmaError,
    /// Device reported a non-zero packet error code
    CommandFailed(u16),
    /// No free device minor
    NoSpace,
    InvalidState,
    NotFound,
}

impl DriverError {
    /// Negative errno for management callers.
    pub fn errno(&self) -> i32 {
        match self {
            DriverError::Busy => -16,
            DriverError::Timeout => -110,
            DriverError::Io | DriverError::CommandFailed(_) => -5,
            DriverError::Incompatible | DriverError::NotFound => -19,
            DriverError::NoMemory | DriverError::DmaError => -12,
            DriverError::NoSpace => -28,
            DriverError::InvalidState => -22,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Busy => write!(f, "device busy"),
            DriverError::Timeout => write!(f, "timed out"),
            DriverError::Io => write!(f, "I/O error"),
            DriverError::Incompatible => write!(f, "incompatible firmware"),
            DriverError::NoMemory => write!(f, "out of memory"),
            DriverError::DmaError => write!(f, "DMA mapping failed"),
            DriverError::CommandFailed(code) => write!(f, "command failed with error 0x{:04x}", code),
            DriverError::NoSpace => write!(f, "too many controllers"),
            DriverError::InvalidState => write!(f, "invalid state"),
            DriverError::NotFound => write!(f, "not found"),
        }
    }
}

pub type Result<T> = core::result::Result<T, DriverError>;

/// Services the embedding kernel provides to the driver
pub trait Platform: Send + Sync {
    /// Sleep for at least `ms` milliseconds. Only called from process context.
    fn delay_ms(&self, ms: u32);

    /// Monotonic milliseconds since boot
    fn uptime_ms(&self) -> u64;

    /// Seconds since the Unix epoch (UTC)
    fn wall_clock_secs(&self) -> u64;

    /// Local timezone offset, minutes west of UTC
    fn tz_minutes_west(&self) -> i32 {
        0
    }

    /// Back off inside a busy-wait loop
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Mask local interrupts, returning whether they were enabled
    fn disable_interrupts(&self) -> bool {
        false
    }

    /// Undo [`Platform::disable_interrupts`]
    fn restore_interrupts(&self, _was_enabled: bool) {}
}

/// Run `f` with local interrupts masked, for locks the interrupt handler
/// also takes.
pub fn without_interrupts<R>(platform: &dyn Platform, f: impl FnOnce() -> R) -> R {
    let was_enabled = platform.disable_interrupts();
    let result = f();
    platform.restore_interrupts(was_enabled);
    result
}
