// Command Queue Posting
use super::regs::{
    COMMAND_QUEUE_LARGE_REG, COMMAND_QUEUE_REG, CONTROL_REG, PCI_CLEAR_PARITY_ERRORS, PCI_CLEAR_PCI_ABORT,
    STATUS_REG,
};
use super::request::RequestState;
use super::{CommandQueueMode, Control, Status, TwaDevice, COMMAND_OFFSET};
use crate::driver::{DriverError, Result};

/// Who is posting, which decides what happens when the queue cannot take it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    /// Storage-stack command; refused with `Busy` instead of deferred
    Caller,
    /// Internal request; deferred behind any backlog
    Internal,
    /// Head of the deferred backlog being re-posted by the interrupt handler
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Handed to the controller
    Posted,
    /// Parked in the pending bitmap until the command interrupt fires
    Deferred,
}

impl TwaDevice {
    pub(crate) fn read_status(&self) -> Status {
        Status::from_bits_retain(self.regs.read32(STATUS_REG))
    }

    pub(crate) fn write_control(&self, control: Control) {
        self.regs.write32(CONTROL_REG, control.bits());
    }

    /// Clear recoverable error conditions; a microcontroller error is fatal.
    pub(crate) fn check_status(&self, status: Status) -> Result<()> {
        if status.contains(Status::PCI_PARITY_ERROR) {
            log::warn!("twa{}: PCI Parity Error: clearing", self.minor);
            self.write_control(Control::CLEAR_PARITY_ERROR);
            self.regs.clear_pci_status(PCI_CLEAR_PARITY_ERRORS);
        }

        if status.contains(Status::PCI_ABORT) {
            log::warn!("twa{}: PCI Abort: clearing", self.minor);
            self.write_control(Control::CLEAR_PCI_ABORT);
            self.regs.clear_pci_status(PCI_CLEAR_PCI_ABORT);
        }

        if status.contains(Status::QUEUE_ERROR) {
            if !(self.caps.quiet_queue_error_in_reset && self.in_reset()) {
                log::warn!("twa{}: Controller Queue Error: clearing", self.minor);
            }
            self.write_control(Control::CLEAR_QUEUE_ERROR);
        }

        if status.contains(Status::MICROCONTROLLER_ERROR) {
            log::error!("twa{}: Microcontroller Error: clearing", self.minor);
            return Err(DriverError::Io);
        }

        Ok(())
    }

    /// Hand slot `id`'s packet to the controller, or defer it when the
    /// queue is full or older requests are still waiting.
    pub(crate) fn post_command_packet(&self, id: usize, kind: PostKind) -> Result<PostOutcome> {
        let state = self.pool.state(id);
        debug_assert!(
            matches!(state, RequestState::Started | RequestState::Completed),
            "posting slot {} in state {:?}",
            id,
            state
        );
        if kind == PostKind::Caller && self.in_reset() {
            log::warn!("twa{}: refusing command during reset", self.minor);
            return Err(DriverError::Busy);
        }

        let address = self.pool.packet_dma(id) + COMMAND_OFFSET;
        let _queue = self.queue_lock.lock();

        if self.caps.command_queue == CommandQueueMode::SplitLarge {
            self.regs.write32(COMMAND_QUEUE_LARGE_REG, address as u32);
        }

        let status = self.read_status();
        self.check_status(status)?;

        let backlog = kind != PostKind::Retry && self.stats.pending() > 0;
        if status.contains(Status::COMMAND_QUEUE_FULL) || backlog {
            if kind == PostKind::Caller {
                return Err(DriverError::Busy);
            }
            self.pool
                .compare_and_set(id, state, RequestState::Pending)
                .map_err(|_| DriverError::InvalidState)?;
            self.pool.mark_pending(id);
            self.stats.bump_pending();
            self.write_control(Control::UNMASK_COMMAND_INTERRUPT);
            return Ok(PostOutcome::Deferred);
        }

        // The response may arrive as soon as the doorbell is rung.
        self.pool
            .compare_and_set(id, state, RequestState::Posted)
            .map_err(|_| DriverError::InvalidState)?;
        self.stats.bump_posted();

        match self.caps.command_queue {
            CommandQueueMode::SplitLarge => {
                self.regs.write32(COMMAND_QUEUE_LARGE_REG + 4, (address >> 32) as u32)
            }
            CommandQueueMode::Large64 => self.regs.write64(COMMAND_QUEUE_LARGE_REG, address),
            CommandQueueMode::Legacy32 => self.regs.write32(COMMAND_QUEUE_REG, address as u32),
        }

        Ok(PostOutcome::Posted)
    }

    /// Settle a post made from a synchronous context, where nothing will
    /// ever drain the backlog. A deferred request is withdrawn as `Busy`.
    pub(crate) fn require_posted(&self, id: usize, outcome: PostOutcome) -> Result<()> {
        match outcome {
            PostOutcome::Posted => Ok(()),
            PostOutcome::Deferred => {
                if self
                    .pool
                    .compare_and_set(id, RequestState::Pending, RequestState::Started)
                    .is_ok()
                {
                    self.pool.unmark_pending(id);
                    self.stats.dec_pending();
                }
                Err(DriverError::Busy)
            }
        }
    }

    /// Post from a synchronous context, polled rather than interrupt driven.
    pub(crate) fn post_sync(&self, id: usize) -> Result<()> {
        let outcome = self.post_command_packet(id, PostKind::Internal)?;
        self.require_posted(id, outcome)
    }
}
