// Request Slot Pool
//
// A slot leaves FREE only by clearing its bit in the free bitmap, and its
// state changes only through `RequestPool::compare_and_set` outside this file.
use alloc::{boxed::Box, vec::Vec};
use core::{
    ptr::NonNull,
    slice,
    sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
};
use spin::{Mutex, MutexGuard};

use super::command::{Completion, HostStatus, ScsiCommand};
use super::management::IoctlWait;
use super::packet::CommandPacket;
use super::{TwaDevice, MAX_REQUESTS, SECTOR_SIZE};
use crate::driver::{CoherentRegion, DmaSegment};

/// Sentinel for "no distinguished slot"
pub const NO_REQUEST: usize = usize::MAX;

const BITMAP_WORDS: usize = MAX_REQUESTS / 64;

/// Lifecycle of a request slot
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Free = 0,
    /// Reserved; the owner is building the packet
    Started = 1,
    /// Waiting in the pending bitmap for queue space
    Pending = 2,
    /// Owned by the controller
    Posted = 3,
    /// Response received; completion handling in progress
    Completed = 4,
    /// Taken over by a reset
    Aborted = 5,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::Free,
            1 => RequestState::Started,
            2 => RequestState::Pending,
            3 => RequestState::Posted,
            4 => RequestState::Completed,
            _ => RequestState::Aborted,
        }
    }
}

struct SlotState(AtomicU8);

impl SlotState {
    fn new() -> Self {
        Self(AtomicU8::new(RequestState::Free as u8))
    }

    fn load(&self) -> RequestState {
        RequestState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: RequestState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn compare_exchange(&self, from: RequestState, to: RequestState) -> Result<(), RequestState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RequestState::from_u8)
    }
}

/// Fixed-size atomic bitmap over the request ids
pub struct Bitmap {
    words: [AtomicU64; BITMAP_WORDS],
}

impl Bitmap {
    pub fn empty() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self { words: [ZERO; BITMAP_WORDS] }
    }

    pub fn full() -> Self {
        const ONES: AtomicU64 = AtomicU64::new(u64::MAX);
        Self { words: [ONES; BITMAP_WORDS] }
    }

    pub fn set(&self, bit: usize) {
        self.words[bit / 64].fetch_or(1 << (bit % 64), Ordering::AcqRel);
    }

    pub fn clear(&self, bit: usize) {
        self.words[bit / 64].fetch_and(!(1 << (bit % 64)), Ordering::AcqRel);
    }

    pub fn test(&self, bit: usize) -> bool {
        self.words[bit / 64].load(Ordering::Acquire) & (1 << (bit % 64)) != 0
    }

    /// Clear `bit`, returning whether it was set
    pub fn test_and_clear(&self, bit: usize) -> bool {
        let mask = 1 << (bit % 64);
        self.words[bit / 64].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Lowest set bit at or above `from`
    pub fn find_first_set(&self, from: usize) -> Option<usize> {
        if from >= MAX_REQUESTS {
            return None;
        }
        let mut index = from / 64;
        let mut word = self.words[index].load(Ordering::Acquire) & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                return Some(index * 64 + word.trailing_zeros() as usize);
            }
            index += 1;
            if index == BITMAP_WORDS {
                return None;
            }
            word = self.words[index].load(Ordering::Acquire);
        }
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    pub fn is_full(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }
}

/// Slot contents, touched only by the slot's current owner
pub(crate) struct RequestData {
    pub command: Option<ScsiCommand>,
    /// Bus segments of a mapped transfer
    pub mapping: Option<Vec<DmaSegment>>,
    /// Coherent data buffer of a management command
    pub staging: Option<CoherentRegion>,
    packet: NonNull<CommandPacket>,
    buffer: NonNull<u8>,
}

// The pointers refer to the device's coherent backings, which outlive the pool.
unsafe impl Send for RequestData {}

impl RequestData {
    pub fn packet(&mut self) -> &mut CommandPacket {
        unsafe { &mut *self.packet.as_ptr() }
    }

    /// One-sector bounce buffer
    pub fn buffer(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.buffer.as_ptr(), SECTOR_SIZE) }
    }

    pub fn parts(&mut self) -> (&mut CommandPacket, &mut [u8], &mut Option<ScsiCommand>) {
        let packet = unsafe { &mut *self.packet.as_ptr() };
        let buffer = unsafe { slice::from_raw_parts_mut(self.buffer.as_ptr(), SECTOR_SIZE) };
        (packet, buffer, &mut self.command)
    }
}

struct Request {
    state: SlotState,
    packet_dma: u64,
    buffer_dma: u64,
    data: Mutex<RequestData>,
}

/// Fixed pool of request slots carved from two coherent backings
pub struct RequestPool {
    slots: Box<[Request]>,
    free: Bitmap,
    pending: Bitmap,
    hint: AtomicUsize,
    aen_request: AtomicUsize,
    ioctl_request: AtomicUsize,
}

impl RequestPool {
    /// `packets` holds one packet per slot, `buffers` one sector per slot.
    pub(crate) fn new(packets: &CoherentRegion, buffers: &CoherentRegion) -> Self {
        let packet_size = core::mem::size_of::<CommandPacket>();
        let slots = (0..MAX_REQUESTS)
            .map(|i| {
                let packet = unsafe { packets.virt_addr().as_ptr().add(i * packet_size) };
                let buffer = unsafe { buffers.virt_addr().as_ptr().add(i * SECTOR_SIZE) };
                Request {
                    state: SlotState::new(),
                    packet_dma: packets.dma_addr() + (i * packet_size) as u64,
                    buffer_dma: buffers.dma_addr() + (i * SECTOR_SIZE) as u64,
                    data: Mutex::new(RequestData {
                        command: None,
                        mapping: None,
                        staging: None,
                        packet: unsafe { NonNull::new_unchecked(packet as *mut CommandPacket) },
                        buffer: unsafe { NonNull::new_unchecked(buffer) },
                    }),
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            free: Bitmap::full(),
            pending: Bitmap::empty(),
            hint: AtomicUsize::new(0),
            aen_request: AtomicUsize::new(NO_REQUEST),
            ioctl_request: AtomicUsize::new(NO_REQUEST),
        }
    }

    /// Claim a free slot and move it to STARTED.
    ///
    /// The upper layer never has more than `CAN_QUEUE` commands outstanding,
    /// so running out of slots is a bug.
    pub fn reserve(&self, command: Option<ScsiCommand>) -> usize {
        let mut from = self.hint.load(Ordering::Relaxed) % MAX_REQUESTS;
        let id = loop {
            match self.free.find_first_set(from) {
                Some(id) => {
                    if self.free.test_and_clear(id) {
                        break id;
                    }
                    from = id + 1;
                }
                None if from == 0 => panic!("twa: request pool exhausted"),
                None => from = 0,
            }
        };
        self.hint.store(id + 1, Ordering::Relaxed);

        let slot = &self.slots[id];
        slot.data.lock().command = command;
        slot.state.store(RequestState::Started);
        id
    }

    /// Return a slot to the pool. The caller must own its terminal transition
    /// and must already have taken the command out of it.
    pub fn release(&self, id: usize) {
        let _ = self.aen_request.compare_exchange(id, NO_REQUEST, Ordering::AcqRel, Ordering::Acquire);
        let _ = self.ioctl_request.compare_exchange(id, NO_REQUEST, Ordering::AcqRel, Ordering::Acquire);
        self.slots[id].state.store(RequestState::Free);
        self.free.set(id);
    }

    pub fn state(&self, id: usize) -> RequestState {
        self.slots[id].state.load()
    }

    /// The only way to move a reserved slot between states
    pub fn compare_and_set(&self, id: usize, from: RequestState, to: RequestState) -> Result<(), RequestState> {
        self.slots[id].state.compare_exchange(from, to)
    }

    pub(crate) fn lock(&self, id: usize) -> MutexGuard<'_, RequestData> {
        self.slots[id].data.lock()
    }

    /// Bus address of the slot's packet
    pub fn packet_dma(&self, id: usize) -> u64 {
        self.slots[id].packet_dma
    }

    /// Bus address of the slot's bounce buffer
    pub fn buffer_dma(&self, id: usize) -> u64 {
        self.slots[id].buffer_dma
    }

    pub fn is_free(&self, id: usize) -> bool {
        self.free.test(id)
    }

    pub fn free_count(&self) -> usize {
        self.free.count()
    }

    pub fn all_free(&self) -> bool {
        self.free.is_full()
    }

    pub(crate) fn mark_pending(&self, id: usize) {
        self.pending.set(id);
    }

    pub(crate) fn unmark_pending(&self, id: usize) {
        self.pending.clear(id);
    }

    pub fn is_pending(&self, id: usize) -> bool {
        self.pending.test(id)
    }

    /// Oldest deferred request, by lowest index
    pub fn first_pending(&self) -> Option<usize> {
        self.pending.find_first_set(0)
    }

    pub fn aen_request(&self) -> Option<usize> {
        match self.aen_request.load(Ordering::Acquire) {
            NO_REQUEST => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_aen_request(&self, id: usize) {
        self.aen_request.store(id, Ordering::Release);
    }

    pub(crate) fn clear_aen_request(&self) {
        self.aen_request.store(NO_REQUEST, Ordering::Release);
    }

    pub fn ioctl_request(&self) -> Option<usize> {
        match self.ioctl_request.load(Ordering::Acquire) {
            NO_REQUEST => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_ioctl_request(&self, id: usize) {
        self.ioctl_request.store(id, Ordering::Release);
    }

    pub(crate) fn clear_ioctl_request(&self) {
        self.ioctl_request.store(NO_REQUEST, Ordering::Release);
    }
}

impl TwaDevice {
    /// Reserve a slot for `command`, or for an internal request when `None`.
    pub(crate) fn begin_request(&self, command: Option<ScsiCommand>) -> usize {
        self.pool.reserve(command)
    }

    pub(crate) fn end_request(&self, id: usize) {
        self.pool.release(id);
    }

    /// Abort an in-flight request during a full stop.
    ///
    /// Only called with the host lock held for write, so no new request can
    /// start. A slot still being built is waited out; a slot completed by a
    /// racing interrupt is left to that path.
    pub(crate) fn abort_request(&self, id: usize, reason: HostStatus) {
        let state = loop {
            let state = self.pool.state(id);
            if state != RequestState::Started {
                break state;
            }
            self.platform().relax();
        };
        if matches!(state, RequestState::Free | RequestState::Completed | RequestState::Aborted) {
            return;
        }
        if self.pool.compare_and_set(id, state, RequestState::Aborted).is_err() {
            return;
        }

        if state == RequestState::Pending {
            self.stats.dec_pending();
            self.pool.unmark_pending(id);
        }
        if state == RequestState::Posted {
            self.stats.dec_posted();
        }

        let mut data = self.pool.lock(id);
        if self.pool.aen_request() == Some(id) {
            self.pool.clear_aen_request();
        } else if self.pool.ioctl_request() == Some(id) {
            self.pool.clear_ioctl_request();
            if let Some(staging) = data.staging.take() {
                self.dma.free_coherent(staging);
            }
            self.ioctl_wait.store(IoctlWait::Aborted as u8, Ordering::Release);
        } else if let Some(command) = data.command.take() {
            if let Some(segments) = data.mapping.take() {
                self.dma.unmap_sg(&segments, command.direction);
            }
            drop(data);
            command.complete(Completion::host(reason));
            self.end_request(id);
            return;
        }
        drop(data);
        self.end_request(id);
    }

    /// Abort every slot and verify the pool is whole again.
    pub(crate) fn abort_all(&self, reason: HostStatus) -> bool {
        let _host = self.host_lock.write();
        for id in 0..MAX_REQUESTS {
            self.abort_request(id, reason);
        }

        let snapshot = self.stats.snapshot();
        let restored = snapshot.posted_requests == 0
            && snapshot.pending_requests == 0
            && self.pool.all_free();
        if !restored {
            log::error!(
                "twa{}: requests outstanding after abort: posted {}, pending {}, free {}",
                self.minor,
                snapshot.posted_requests,
                snapshot.pending_requests,
                self.pool.free_count()
            );
        }
        debug_assert!(restored);
        restored
    }
}
