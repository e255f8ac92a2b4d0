//! DMA and Memory Management APIs for Drivers

use alloc::vec::Vec;
use core::{ptr::NonNull, slice};

use super::Result;

/// DMA direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory to device
    ToDevice,
    /// Device to memory
    FromDevice,
    /// Bidirectional
    Bidirectional,
    /// No data transfer
    None,
}

impl DmaDirection {
    /// Data flows from host memory to the device
    pub fn is_outbound(&self) -> bool {
        matches!(self, DmaDirection::ToDevice | DmaDirection::Bidirectional)
    }

    /// Data flows from the device into host memory
    pub fn is_inbound(&self) -> bool {
        matches!(self, DmaDirection::FromDevice | DmaDirection::Bidirectional)
    }
}

/// Device-visible memory shared between CPU and controller
pub struct CoherentRegion {
    /// Virtual address
    virt_addr: NonNull<u8>,
    /// Bus address for DMA
    dma_addr: u64,
    /// Region size
    size: usize,
}

// The region is plain memory; ownership of its contents is arbitrated by callers.
unsafe impl Send for CoherentRegion {}
unsafe impl Sync for CoherentRegion {}

impl CoherentRegion {
    /// Wrap an existing coherent allocation.
    ///
    /// # Safety
    /// `virt_addr` must point to `size` bytes that stay valid until the region
    /// is handed back to [`DmaOps::free_coherent`].
    pub unsafe fn from_raw(virt_addr: NonNull<u8>, dma_addr: u64, size: usize) -> Self {
        Self { virt_addr, dma_addr, size }
    }

    /// Get virtual address
    pub fn virt_addr(&self) -> NonNull<u8> {
        self.virt_addr
    }

    /// Get bus address
    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }

    /// Get size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get as slice
    ///
    /// # Safety
    /// No other context may be writing the region.
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.virt_addr.as_ptr(), self.size)
    }

    /// Get as mutable slice
    ///
    /// # Safety
    /// The caller must have exclusive access to the region.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.virt_addr.as_ptr(), self.size)
    }
}

/// One bus-visible segment of a mapped transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub addr: u64,
    pub len: u32,
}

/// Caller data buffers for a single command
#[derive(Debug, Default)]
pub struct ScatterList {
    segments: Vec<Vec<u8>>,
}

impl ScatterList {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn single(buffer: Vec<u8>) -> Self {
        let mut sg = Self::new();
        sg.push(buffer);
        sg
    }

    pub fn push(&mut self, buffer: Vec<u8>) {
        self.segments.push(buffer);
    }

    /// Number of segments
    pub fn count(&self) -> usize {
        self.segments.len()
    }

    /// Total bytes across all segments
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.segments
    }

    /// Gather segment contents into `buffer`, returning bytes copied
    pub fn copy_to_buffer(&self, buffer: &mut [u8]) -> usize {
        let mut copied = 0;
        for segment in &self.segments {
            let n = segment.len().min(buffer.len() - copied);
            buffer[copied..copied + n].copy_from_slice(&segment[..n]);
            copied += n;
            if copied == buffer.len() {
                break;
            }
        }
        copied
    }

    /// Scatter `buffer` back into the segments, returning bytes copied
    pub fn copy_from_buffer(&mut self, buffer: &[u8]) -> usize {
        let mut copied = 0;
        for segment in &mut self.segments {
            let n = segment.len().min(buffer.len() - copied);
            segment[..n].copy_from_slice(&buffer[copied..copied + n]);
            copied += n;
            if copied == buffer.len() {
                break;
            }
        }
        copied
    }

    pub fn into_inner(self) -> Vec<Vec<u8>> {
        self.segments
    }
}

/// DMA services supplied by the platform
pub trait DmaOps: Send + Sync {
    /// Allocate zeroed, device-visible memory
    fn alloc_coherent(&self, size: usize) -> Result<CoherentRegion>;

    /// Release memory from [`DmaOps::alloc_coherent`]
    fn free_coherent(&self, region: CoherentRegion);

    /// Map every segment of `sg` for device access
    fn map_sg(&self, sg: &mut ScatterList, direction: DmaDirection) -> Result<Vec<DmaSegment>>;

    /// Undo [`DmaOps::map_sg`]
    fn unmap_sg(&self, segments: &[DmaSegment], direction: DmaDirection);
}
