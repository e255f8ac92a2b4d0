// Interrupt Service Routine and Completion Dispatch
use alloc::string::String;

use super::command::{Completion, HostStatus};
use super::messages;
use super::packet::{resid_out, CommandHeader};
use super::queue::PostKind;
use super::regs::RESPONSE_QUEUE_REG;
use super::request::RequestState;
use super::*;
use crate::driver::{DriverError, InterruptReturn, Result};

impl TwaDevice {
    /// Service a (possibly shared) interrupt line.
    pub fn interrupt(&self) -> InterruptReturn {
        if self.is_offline() {
            return InterruptReturn::None;
        }

        let status = self.read_status();
        if !status.is_ours() {
            return InterruptReturn::None;
        }

        // Synchronous reset polling owns the controller.
        if self.in_reset() {
            return InterruptReturn::Handled;
        }

        if self.check_status(status).is_err() {
            self.write_control(Control::CLEAR_ALL_INTERRUPTS);
            return InterruptReturn::Handled;
        }

        if status.contains(Status::HOST_INTERRUPT) {
            self.write_control(Control::CLEAR_HOST_INTERRUPT);
        }

        if status.contains(Status::ATTENTION_INTERRUPT) {
            self.write_control(Control::CLEAR_ATTENTION_INTERRUPT);
            // An outstanding AEN read is completed with the responses below.
            if self.pool.aen_request().is_none() {
                self.start_aen_read();
            }
        }

        // A bad response leaves the rest of this interrupt unprocessed.
        if self.drain_responses().is_err() {
            return InterruptReturn::Handled;
        }

        if status.contains(Status::COMMAND_INTERRUPT) {
            self.post_backlog();
        }

        InterruptReturn::Handled
    }

    fn start_aen_read(&self) {
        let id = self.begin_request(None);
        let mut data = self.pool.lock(id);
        self.pool.set_aen_request(id);
        if let Err(err) = self.execute_sense_request(id, &mut data) {
            log::warn!("twa{}: failed to start AEN read: {}", self.minor, err);
            drop(data);
            self.end_request(id);
        }
    }

    fn drain_responses(&self) -> Result<()> {
        loop {
            // Stop once the interrupt is gone so synchronous reset polling
            // keeps its responses.
            let status = self.read_status();
            if let Err(err) = self.check_status(status) {
                self.write_control(Control::CLEAR_ALL_INTERRUPTS);
                return Err(err);
            }
            if status.contains(Status::RESPONSE_QUEUE_EMPTY) || !status.contains(Status::RESPONSE_INTERRUPT) {
                return Ok(());
            }
            if self.in_reset() {
                return Ok(());
            }

            let id = resid_out(self.regs.read32(RESPONSE_QUEUE_REG));
            if let Err(state) = self.pool.compare_and_set(id, RequestState::Posted, RequestState::Completed) {
                if self.in_reset() {
                    // A reset aborted it first.
                    continue;
                }
                log::error!(
                    "twa{}: Received a request id that wasn't posted: {} in state {:?}",
                    self.minor,
                    id,
                    state
                );
                self.write_control(Control::CLEAR_ALL_INTERRUPTS);
                return Err(DriverError::Io);
            }
            self.stats.dec_posted();

            if self.pool.aen_request() == Some(id) {
                self.complete_aen(id);
            } else if self.pool.ioctl_request() == Some(id) {
                self.signal_ioctl(id);
            } else {
                self.complete_scsi(id);
            }
        }
    }

    // Re-post deferred requests, oldest first, while the queue has room.
    fn post_backlog(&self) {
        self.write_control(Control::MASK_COMMAND_INTERRUPT);
        while self.stats.pending() > 0 {
            let status = self.read_status();
            if self.check_status(status).is_err() {
                self.write_control(Control::CLEAR_ALL_INTERRUPTS);
                break;
            }
            if self.in_reset() {
                break;
            }
            if status.contains(Status::COMMAND_QUEUE_FULL) || !status.contains(Status::COMMAND_INTERRUPT) {
                self.write_control(Control::UNMASK_COMMAND_INTERRUPT);
                break;
            }
            self.write_control(Control::UNMASK_COMMAND_INTERRUPT);

            let Some(id) = self.pool.first_pending() else {
                break;
            };
            if self.pool.compare_and_set(id, RequestState::Pending, RequestState::Started).is_err() {
                debug_assert!(self.in_reset());
                break;
            }
            self.pool.unmark_pending(id);
            self.stats.dec_pending();

            if let Err(err) = self.post_command_packet(id, PostKind::Retry) {
                log::warn!("twa{}: retrying request {} failed: {}", self.minor, id, err);
                if self.pool.ioctl_request() == Some(id) {
                    self.fail_ioctl(id);
                } else {
                    self.end_request(id);
                }
            }
        }
    }

    fn complete_aen(&self, id: usize) {
        let mut data = self.pool.lock(id);
        let packet = data.packet();
        if packet.status() != 0 {
            self.report_sense_error(&packet.header);
        }
        let opcode = packet.opcode();
        let aen = packet.header.error();

        let repost = if opcode == OP_SET_PARAM {
            // Time sent; keep reading the queue.
            self.execute_sense_request(id, &mut data)
        } else if aen == AEN_SYNC_TIME_WITH_HOST {
            self.execute_sync_time(id, &mut data)
        } else if aen != AEN_QUEUE_EMPTY {
            self.report_aen(&data.packet().header);
            self.execute_sense_request(id, &mut data)
        } else {
            drop(data);
            self.end_request(id);
            return;
        };

        if let Err(err) = repost {
            log::warn!("twa{}: AEN read stopped: {}", self.minor, err);
            drop(data);
            self.end_request(id);
        }
    }

    fn complete_scsi(&self, id: usize) {
        let mut data = self.pool.lock(id);
        let Some(mut command) = data.command.take() else {
            log::warn!("twa{}: completion for request {} without a command", self.minor, id);
            drop(data);
            self.end_request(id);
            return;
        };
        let mapping = data.mapping.take();
        let (packet, buffer, _) = data.parts();

        if let Some(segments) = mapping {
            self.dma.unmap_sg(&segments, command.direction);
        } else if command.sg_count() > 0 && command.direction.is_inbound() {
            let len = command.bufflen().min(SECTOR_SIZE);
            command.data.copy_from_buffer(&buffer[..len]);
        }

        let status = packet.status();
        let mut completion = Completion::host(HostStatus::Ok);
        completion.scsi_status = status << 1;
        if status != 0 {
            self.report_sense_error(&packet.header);
            completion.sense = Some(packet.header.sense_data);
        }

        // Single-segment transfers report how much actually moved.
        if !command.is_passthru() && command.sg_count() <= 1 && status == 0 {
            let transferred = packet.apache().sgl[0].length();
            if transferred < command.underflow {
                completion.host = HostStatus::Error;
            }
            let bufflen = command.bufflen() as u32;
            if transferred < bufflen {
                completion.residual = bufflen - transferred;
            }
        }

        drop(data);
        command.complete(completion);
        self.end_request(id);
    }

    /// Log a failed packet, returning its error code. Expected scan-time
    /// errors are not logged and return 0.
    pub(crate) fn report_sense_error(&self, header: &CommandHeader) -> u16 {
        let error = header.error();
        if error == 0 {
            log::warn!("twa{}: packet failed without an error code", self.minor);
            return 0;
        }
        if error == ERROR_LOGICAL_UNIT_NOT_SUPPORTED || error == ERROR_UNIT_OFFLINE {
            return 0;
        }

        let (desc, detail) = header.descriptions();
        let text = match detail {
            Some(detail) => String::from_utf8_lossy(detail),
            None => messages::error_string(error).into(),
        };
        log::error!(
            "twa{}: ERROR 0x{:04X}: {}:{}",
            self.minor,
            error,
            text,
            String::from_utf8_lossy(desc)
        );
        error
    }

    /// Record an AEN in the event log and announce it.
    pub(crate) fn report_aen(&self, header: &CommandHeader) {
        let aen = header.error();
        let severity = header.severity();
        self.stats.inc_aens();

        let (desc, detail) = header.descriptions();
        let parameter_len = match detail {
            Some(detail) => desc.len() + 1 + detail.len(),
            None => desc.len(),
        };
        let text = match detail {
            Some(detail) => String::from_utf8_lossy(detail),
            None => messages::aen_string(aen).into(),
        };

        let platform = self.platform();
        let local = platform.wall_clock_secs() as i64 - platform.tz_minutes_west() as i64 * 60;
        self.events
            .lock()
            .push(aen, severity, local as u32, &header.error_desc()[..parameter_len]);

        if severity != AEN_SEVERITY_DEBUG {
            log::warn!(
                "twa{}: AEN: {} (0x{:04X}): {}:{}",
                self.minor,
                messages::aen_severity(severity).unwrap_or("UNKNOWN"),
                aen,
                text,
                String::from_utf8_lossy(desc)
            );
        }
    }
}
