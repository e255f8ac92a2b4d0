//! 3ware 9000-series Storage Controller Driver
//!
//! Command lifecycle and completion engine for the 9000, 9550SX, 9650SE and
//! 9690SA controllers:
//! - Fixed pool of 256 request slots with atomic ownership
//! - Command packet construction for SCSI, ATA passthrough and internal commands
//! - Posting with backpressure and deferred internal commands
//! - Interrupt-driven completion and AEN draining
//! - Controller reset, firmware negotiation and recovery
//!
//! The crate is `no_std` + `alloc`. Registers, DMA and timekeeping are
//! supplied by the embedding kernel through the [`twa::RegisterBus`],
//! [`driver::dma::DmaOps`] and [`driver::Platform`] traits.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod driver;
pub mod twa;

#[cfg(test)]
mod tests;

pub use driver::{DriverError, Result};
pub use twa::{DriverRegistry, TwaConfig, TwaDevice};
