// SCSI Command Building and Submission
use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use super::packet::{
    opsgl_in, param_command_size, pass_command_size, AtaTaskFile, CommandPacket, ParamDescriptor, SglEntry,
    APACHE_MAX_SGL_LENGTH, APACHE_SGL_OFFSET, PARAM_SGL_OFFSET, PASS_SGL_OFFSET,
};
use super::queue::{PostKind, PostOutcome};
use super::request::RequestData;
use super::*;
use crate::driver::{DmaDirection, DmaSegment, DriverError, Result, ScatterList};

// SCSI opcodes the engine inspects
pub const REQUEST_SENSE: u8 = 0x03;
pub const READ_6: u8 = 0x08;
pub const WRITE_6: u8 = 0x0a;
pub const READ_10: u8 = 0x28;
pub const WRITE_10: u8 = 0x2a;
pub const ATA_16: u8 = 0x85;
pub const READ_16: u8 = 0x88;
pub const WRITE_16: u8 = 0x8a;
pub const ATA_12: u8 = 0xa1;

// Passthrough protocol parameters
const PASS_PARAM_NO_DATA: u16 = 0x8;
const PASS_PARAM_DATA_IN: u16 = 0xd;
const PASS_PARAM_DATA_OUT: u16 = 0xf;
const PASS_FLAGS: u8 = 0x1;

pub type DoneFn = Box<dyn FnOnce(ScsiCommand, Completion) + Send>;

/// Command handed down by the storage stack
pub struct ScsiCommand {
    pub cdb: [u8; MAX_CDB_LENGTH],
    /// Target id
    pub unit: u8,
    pub lun: u8,
    pub direction: DmaDirection,
    pub data: ScatterList,
    /// Fewer bytes than this transferred is an error
    pub underflow: u32,
    /// Watchdog budget for the caller's stuck-command detection
    pub timeout_ms: u32,
    done: Option<DoneFn>,
}

impl ScsiCommand {
    pub fn new<F>(cdb: &[u8], unit: u8, lun: u8, direction: DmaDirection, data: ScatterList, done: F) -> Self
    where
        F: FnOnce(ScsiCommand, Completion) + Send + 'static,
    {
        let mut block = [0u8; MAX_CDB_LENGTH];
        let len = cdb.len().min(MAX_CDB_LENGTH);
        block[..len].copy_from_slice(&cdb[..len]);
        Self {
            cdb: block,
            unit,
            lun,
            direction,
            data,
            underflow: 0,
            timeout_ms: 60_000,
            done: Some(Box::new(done)),
        }
    }

    pub fn with_underflow(mut self, underflow: u32) -> Self {
        self.underflow = underflow;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }

    pub fn sg_count(&self) -> usize {
        self.data.count()
    }

    pub fn bufflen(&self) -> usize {
        self.data.total_len()
    }

    /// Transfer uses the caller's buffers directly instead of the bounce buffer
    pub fn is_mapped(&self) -> bool {
        is_mapped(self.sg_count(), self.bufflen())
    }

    pub fn is_passthru(&self) -> bool {
        is_passthru(&self.cdb)
    }

    /// Hand the command back to its owner. Runs the callback exactly once.
    pub fn complete(mut self, completion: Completion) {
        if let Some(done) = self.done.take() {
            done(self, completion);
        }
    }
}

impl fmt::Debug for ScsiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScsiCommand")
            .field("opcode", &self.cdb[0])
            .field("unit", &self.unit)
            .field("lun", &self.lun)
            .field("direction", &self.direction)
            .field("sg_count", &self.sg_count())
            .field("bufflen", &self.bufflen())
            .finish()
    }
}

/// Host-side outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Ok,
    Error,
    /// Aborted by a controller reset
    Reset,
    /// Addressed LUN is beyond what the firmware supports
    BadTarget,
    /// Controller has been shut down
    NoConnect,
}

/// Result delivered to the completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub host: HostStatus,
    /// Packet status shifted into SCSI status position
    pub scsi_status: u8,
    pub sense: Option<[u8; SENSE_DATA_LENGTH]>,
    /// Bytes requested but not transferred
    pub residual: u32,
}

impl Completion {
    pub fn host(host: HostStatus) -> Self {
        Self {
            host,
            scsi_status: 0,
            sense: None,
            residual: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.host == HostStatus::Ok && self.scsi_status == 0
    }
}

/// Answer to [`TwaDevice::queue_command`]
#[derive(Debug)]
pub enum QueueStatus {
    /// Accepted; the callback will run exactly once
    Queued,
    /// Not accepted; retry later. The command is handed back untouched.
    HostBusy(ScsiCommand),
}

impl QueueStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, QueueStatus::Queued)
    }
}

pub fn is_mapped(sg_count: usize, bufflen: usize) -> bool {
    sg_count > 1 || bufflen > SECTOR_SIZE
}

pub fn is_passthru(cdb: &[u8]) -> bool {
    matches!(cdb.first(), Some(&ATA_12) | Some(&ATA_16))
}

/// Transfer length in sectors of a read or write CDB
pub fn sector_count(cdb: &[u8; MAX_CDB_LENGTH]) -> u32 {
    match cdb[0] {
        READ_6 | WRITE_6 => cdb[4] as u32,
        READ_10 | WRITE_10 => u16::from_be_bytes([cdb[7], cdb[8]]) as u32,
        READ_16 | WRITE_16 => u32::from_be_bytes([cdb[10], cdb[11], cdb[12], cdb[13]]),
        _ => 0,
    }
}

/// Task file fields embedded in an ATA_12 or ATA_16 CDB
pub fn ata_task_file(cdb: &[u8; MAX_CDB_LENGTH]) -> AtaTaskFile {
    let word = |hi: usize, lo: usize| (cdb[hi] as u16) << 8 | cdb[lo] as u16;
    if cdb[0] == ATA_16 {
        AtaTaskFile {
            features: word(3, 4),
            sector_count: word(5, 6),
            lba_low: word(7, 8),
            lba_mid: word(9, 10),
            lba_high: word(11, 12),
            device: cdb[13],
            command: cdb[14],
        }
    } else {
        AtaTaskFile {
            features: cdb[3] as u16,
            sector_count: cdb[4] as u16,
            lba_low: cdb[5] as u16,
            lba_mid: cdb[6] as u16,
            lba_high: cdb[7] as u16,
            device: cdb[8],
            command: cdb[9],
        }
    }
}

/// Seconds since last Sunday 00:00 local time
pub fn scheduler_time(wall_clock_secs: u64, tz_minutes_west: i32) -> u32 {
    let local = wall_clock_secs as i64 - tz_minutes_west as i64 * 60;
    (local - 3 * 86_400).rem_euclid(604_800) as u32
}

/// Reset header and extended payload for an internal or SCSI command
pub(crate) fn init_scsi_cmd(packet: &mut CommandPacket, request_id: usize, unit: u8, lun: u8) {
    packet.header.prepare();
    let cmd = packet.apache_mut();
    cmd.opcode = OP_EXECUTE_SCSI;
    cmd.unit = unit;
    cmd.set_request_id_lun(request_id, lun);
    cmd.status = 0;
    cmd.sgl_offset = APACHE_SGL_OFFSET;
    cmd.set_sgl_entries(0);
}

// Where a built command's data lives
enum DataPath {
    None,
    Bounce(u32),
    Mapped(Vec<DmaSegment>),
}

impl TwaDevice {
    /// Submit a command from the storage stack.
    ///
    /// Never blocks: when the controller cannot take the command right now
    /// it is handed back as [`QueueStatus::HostBusy`].
    pub fn queue_command(&self, command: ScsiCommand) -> QueueStatus {
        if self.is_offline() {
            command.complete(Completion::host(HostStatus::NoConnect));
            return QueueStatus::Queued;
        }
        if command.lun >= self.max_lun() {
            command.complete(Completion::host(HostStatus::BadTarget));
            return QueueStatus::Queued;
        }

        let _host = match self.host_lock.try_read() {
            Some(guard) => guard,
            None => return QueueStatus::HostBusy(command),
        };
        if self.in_reset() {
            return QueueStatus::HostBusy(command);
        }

        // The slot and queue locks are shared with the interrupt handler.
        let passthru = command.is_passthru();
        let failed = self.without_interrupts(|| {
            let id = self.begin_request(Some(command));
            let mut data = self.pool.lock(id);
            let result = if passthru {
                self.execute_passthru(id, &mut data)
            } else {
                self.execute_scsi(id, &mut data)
            };
            result.err().map(|err| {
                let command = data.command.take();
                drop(data);
                self.end_request(id);
                (err, command)
            })
        });

        match failed {
            None | Some((_, None)) => QueueStatus::Queued,
            Some((DriverError::Busy, Some(command))) => QueueStatus::HostBusy(command),
            Some((err, Some(command))) => {
                log::error!("twa{}: executing SCSI command failed: {}", self.minor, err);
                command.complete(Completion::host(HostStatus::Error));
                QueueStatus::Queued
            }
        }
    }

    // Map the caller's buffers, or stage them through the bounce buffer.
    fn prepare_data(&self, data: &mut RequestData) -> Result<DataPath> {
        let (_, buffer, command) = data.parts();
        let command = command.as_mut().ok_or(DriverError::InvalidState)?;

        if command.is_mapped() {
            let segments = self.dma.map_sg(&mut command.data, command.direction)?;
            if segments.len() > APACHE_MAX_SGL_LENGTH {
                self.dma.unmap_sg(&segments, command.direction);
                return Err(DriverError::DmaError);
            }
            Ok(DataPath::Mapped(segments))
        } else if command.sg_count() > 0 {
            let len = command.bufflen();
            if command.direction.is_outbound() {
                command.data.copy_to_buffer(&mut buffer[..len]);
            }
            Ok(DataPath::Bounce(len as u32))
        } else {
            Ok(DataPath::None)
        }
    }

    // Post a caller command; on failure its mapping is undone.
    fn post_caller(&self, id: usize, data: &mut RequestData) -> Result<()> {
        let result = self.post_command_packet(id, PostKind::Caller);
        if result.is_err() {
            if let (Some(segments), Some(command)) = (data.mapping.take(), data.command.as_ref()) {
                self.dma.unmap_sg(&segments, command.direction);
            }
        }
        result.map(|_| ())
    }

    /// Build an extended packet from a SCSI command and post it.
    pub(crate) fn execute_scsi(&self, id: usize, data: &mut RequestData) -> Result<()> {
        let path = self.prepare_data(data)?;
        let buffer_dma = self.pool.buffer_dma(id);

        let (packet, _, command) = data.parts();
        let command = command.as_ref().ok_or(DriverError::InvalidState)?;
        packet.clear();
        init_scsi_cmd(packet, id, command.unit, command.lun);
        let cmd = packet.apache_mut();
        cmd.cdb.copy_from_slice(&command.cdb);

        let mapping = match path {
            DataPath::Mapped(segments) => {
                for (entry, segment) in cmd.sgl.iter_mut().zip(segments.iter()) {
                    *entry = SglEntry::new(segment.addr, segment.len);
                }
                cmd.set_sgl_entries(segments.len() as u16);
                Some(segments)
            }
            DataPath::Bounce(len) => {
                cmd.sgl[0] = SglEntry::new(buffer_dma, len);
                cmd.set_sgl_entries(1);
                None
            }
            DataPath::None => None,
        };

        self.stats.update_sectors(sector_count(&command.cdb));
        self.stats.update_sgl_entries(command.sg_count() as u32);

        data.mapping = mapping;
        self.post_caller(id, data)
    }

    /// Build an ATA passthrough packet from an ATA_12/ATA_16 CDB and post it.
    pub(crate) fn execute_passthru(&self, id: usize, data: &mut RequestData) -> Result<()> {
        let path = self.prepare_data(data)?;
        let buffer_dma = self.pool.buffer_dma(id);

        let (packet, _, command) = data.parts();
        let command = command.as_ref().ok_or(DriverError::InvalidState)?;
        packet.clear();
        packet.header.prepare();
        let cmd = packet.pass_mut();
        cmd.size = pass_command_size(0);
        cmd.request_id = id as u8;
        cmd.unit = command.unit;
        cmd.status = 0;
        cmd.flags = PASS_FLAGS;

        if command.direction == DmaDirection::None {
            cmd.opcode_sgl_offset = opsgl_in(OP_ATA_PASSTHROUGH, 0);
            cmd.set_param(PASS_PARAM_NO_DATA);
        } else {
            cmd.opcode_sgl_offset = opsgl_in(OP_ATA_PASSTHROUGH, PASS_SGL_OFFSET);
            cmd.set_param(if command.direction == DmaDirection::FromDevice {
                PASS_PARAM_DATA_IN
            } else {
                PASS_PARAM_DATA_OUT
            });
        }
        cmd.set_task_file(&ata_task_file(&command.cdb));

        let mapping = match path {
            DataPath::Mapped(segments) => {
                for (entry, segment) in cmd.sgl.iter_mut().zip(segments.iter()) {
                    *entry = SglEntry::new(segment.addr, segment.len);
                }
                cmd.size = pass_command_size(segments.len() as u8);
                Some(segments)
            }
            DataPath::Bounce(len) => {
                cmd.sgl[0] = SglEntry::new(buffer_dma, len);
                cmd.size = pass_command_size(1);
                None
            }
            DataPath::None => None,
        };

        data.mapping = mapping;
        self.post_caller(id, data)
    }

    /// Ask the controller for the next queued AEN.
    pub(crate) fn execute_sense_request(&self, id: usize, data: &mut RequestData) -> Result<PostOutcome> {
        let packet = data.packet();
        init_scsi_cmd(packet, id, 0, 0);
        let cmd = packet.apache_mut();
        cmd.cdb = [0; MAX_CDB_LENGTH];
        cmd.cdb[0] = REQUEST_SENSE;
        cmd.cdb[4] = ALLOCATION_LENGTH;
        cmd.sgl[0] = SglEntry::new(self.pool.buffer_dma(id), SECTOR_SIZE as u32);
        cmd.set_sgl_entries(1);

        self.post_command_packet(id, PostKind::Internal)
    }

    /// Send the host's scheduler time to the controller.
    pub(crate) fn execute_sync_time(&self, id: usize, data: &mut RequestData) -> Result<PostOutcome> {
        let platform = self.platform();
        let time = scheduler_time(platform.wall_clock_secs(), platform.tz_minutes_west());
        let buffer_dma = self.pool.buffer_dma(id);

        let (packet, buffer, _) = data.parts();
        packet.clear();
        packet.header.prepare();
        let cmd = packet.legacy_mut();
        cmd.opcode_sgl_offset = opsgl_in(OP_SET_PARAM, PARAM_SGL_OFFSET);
        cmd.request_id = id as u8;
        cmd.unit_host_id = 0;
        cmd.status = 0;
        cmd.flags = 0;
        cmd.set_param_count(1);
        cmd.sgl[0] = SglEntry::new(buffer_dma, SECTOR_SIZE as u32);
        cmd.size = param_command_size(1);

        let param = ParamDescriptor {
            table_id: TIMEKEEP_TABLE | 0x8000,
            parameter_id: SCHEDULER_TIME_PARAM,
            parameter_size: 4,
            actual_parameter_size: 0,
        };
        param.write(buffer, &time.to_le_bytes());

        self.post_command_packet(id, PostKind::Internal)
    }
}
