// Management Command Pass-Through
//
// One administrative command at a time, issued through the distinguished
// ioctl slot and completed by the interrupt handler. A waiter that times out
// abandons the slot; the interrupt handler then cleans up when the response
// finally arrives.
use core::sync::atomic::Ordering;

use super::packet::{CommandPacket, SglEntry};
use super::queue::PostKind;
use super::*;
use crate::driver::{DriverError, Result};

/// Handshake between a management waiter and the interrupt handler
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlWait {
    Idle = 0,
    Waiting = 1,
    Done = 2,
    /// Waiter gave up; the interrupt handler owns cleanup
    Abandoned = 3,
    /// Taken over by a reset
    Aborted = 4,
    /// Deferred post could not be retried
    Failed = 5,
}

impl IoctlWait {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoctlWait::Waiting,
            2 => IoctlWait::Done,
            3 => IoctlWait::Abandoned,
            4 => IoctlWait::Aborted,
            5 => IoctlWait::Failed,
            _ => IoctlWait::Idle,
        }
    }
}

impl TwaDevice {
    fn ioctl_wait(&self) -> IoctlWait {
        IoctlWait::from_u8(self.ioctl_wait.load(Ordering::Acquire))
    }

    fn set_ioctl_wait(&self, wait: IoctlWait) {
        self.ioctl_wait.store(wait as u8, Ordering::Release);
    }

    fn swap_ioctl_wait(&self, from: IoctlWait, to: IoctlWait) -> core::result::Result<(), IoctlWait> {
        self.ioctl_wait
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(IoctlWait::from_u8)
    }

    /// Execute a raw firmware command packet on behalf of a management tool.
    ///
    /// `data` is staged in device-visible memory for the command's single
    /// scatter-gather entry and receives whatever the controller wrote back.
    /// Returns the completed packet.
    pub fn firmware_pass_through(&self, packet: &CommandPacket, data: &mut [u8]) -> Result<CommandPacket> {
        if self.is_offline() {
            return Err(DriverError::InvalidState);
        }

        let _ioctl = self.ioctl_lock.lock();
        if self.pool.ioctl_request().is_some() {
            // A timed-out command still holds the slot.
            return Err(DriverError::Busy);
        }

        let id = {
            let _host = self.host_lock.try_read().ok_or(DriverError::Busy)?;
            if self.in_reset() {
                return Err(DriverError::Busy);
            }

            let staging = if data.is_empty() {
                None
            } else {
                let region = self.dma.alloc_coherent(data.len())?;
                let buffer = unsafe { region.as_mut_slice() };
                buffer[..data.len()].copy_from_slice(data);
                Some(region)
            };

            self.without_interrupts(|| {
                let id = self.begin_request(None);
                let mut slot = self.pool.lock(id);
                self.pool.set_ioctl_request(id);

                let target = slot.packet();
                *target = *packet;
                target.header.prepare();
                let sgl = staging
                    .as_ref()
                    .map(|region| SglEntry::new(region.dma_addr(), data.len() as u32));
                match target.opcode() {
                    OP_EXECUTE_SCSI => {
                        let cmd = target.apache_mut();
                        let lun = cmd.lun();
                        cmd.set_request_id_lun(id, lun);
                        if let Some(entry) = sgl {
                            cmd.sgl[0] = entry;
                            cmd.set_sgl_entries(1);
                        }
                    }
                    OP_ATA_PASSTHROUGH => {
                        let cmd = target.pass_mut();
                        cmd.request_id = id as u8;
                        if let Some(entry) = sgl {
                            cmd.sgl[0] = entry;
                        }
                    }
                    _ => {
                        let cmd = target.legacy_mut();
                        cmd.request_id = id as u8;
                        if let Some(entry) = sgl {
                            cmd.sgl[0] = entry;
                        }
                    }
                }
                slot.staging = staging;

                self.set_ioctl_wait(IoctlWait::Waiting);
                if let Err(err) = self.post_command_packet(id, PostKind::Internal) {
                    self.set_ioctl_wait(IoctlWait::Idle);
                    if let Some(region) = slot.staging.take() {
                        self.dma.free_coherent(region);
                    }
                    drop(slot);
                    self.end_request(id);
                    return Err(err);
                }
                Ok(id)
            })?
        };

        let platform = self.platform();
        let deadline = platform.uptime_ms() + self.config.ioctl_timeout_secs as u64 * 1000;
        loop {
            match self.ioctl_wait() {
                IoctlWait::Done => break,
                IoctlWait::Aborted => {
                    // The reset already released the slot.
                    self.set_ioctl_wait(IoctlWait::Idle);
                    return Err(DriverError::Io);
                }
                IoctlWait::Failed => {
                    self.set_ioctl_wait(IoctlWait::Idle);
                    self.finish_ioctl(id, None);
                    return Err(DriverError::Io);
                }
                _ => {}
            }
            if platform.uptime_ms() >= deadline {
                if self.swap_ioctl_wait(IoctlWait::Waiting, IoctlWait::Abandoned).is_ok() {
                    log::error!("twa{}: management command {} timed out", self.minor, id);
                    return Err(DriverError::Timeout);
                }
                continue;
            }
            platform.delay_ms(1);
        }

        self.set_ioctl_wait(IoctlWait::Idle);
        Ok(self.finish_ioctl(id, Some(data)))
    }

    // Copy the result out, free the staging buffer and release the slot.
    fn finish_ioctl(&self, id: usize, data: Option<&mut [u8]>) -> CommandPacket {
        let (packet, staging) = self.without_interrupts(|| {
            let mut slot = self.pool.lock(id);
            (*slot.packet(), slot.staging.take())
        });
        if let Some(region) = staging {
            if let Some(data) = data {
                let len = data.len().min(region.size());
                let staged = unsafe { region.as_slice() };
                data[..len].copy_from_slice(&staged[..len]);
            }
            self.dma.free_coherent(region);
        }
        self.end_request(id);
        packet
    }

    /// Response for the ioctl slot arrived.
    pub(crate) fn signal_ioctl(&self, id: usize) {
        if let Err(IoctlWait::Abandoned) = self.swap_ioctl_wait(IoctlWait::Waiting, IoctlWait::Done) {
            log::warn!("twa{}: late response for abandoned management command {}", self.minor, id);
            self.finish_ioctl(id, None);
            self.set_ioctl_wait(IoctlWait::Idle);
        }
    }

    /// The ioctl slot's deferred post failed.
    pub(crate) fn fail_ioctl(&self, id: usize) {
        if let Err(IoctlWait::Abandoned) = self.swap_ioctl_wait(IoctlWait::Waiting, IoctlWait::Failed) {
            self.finish_ioctl(id, None);
            self.set_ioctl_wait(IoctlWait::Idle);
        }
    }
}
