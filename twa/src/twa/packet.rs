// Command Packet Wire Format
//
// Every packet is 1024 bytes: a 128-byte header followed by one of the
// payload formats. All multi-byte fields are little-endian.
use core::mem;

use super::{ERROR_DESC_LENGTH, MAX_CDB_LENGTH, SENSE_DATA_LENGTH};

#[cfg(target_pointer_width = "64")]
mod width {
    pub type SglAddress = u64;
    pub const APACHE_MAX_SGL_LENGTH: usize = 72;
    pub const APACHE_PADDING_LENGTH: usize = 8;
    pub const ESCALADE_MAX_SGL_LENGTH: usize = 41;
    pub const ESCALADE_PADDING_LENGTH: usize = 12;
    pub const PASS_PADDING_LENGTH: usize = 12;
}

#[cfg(not(target_pointer_width = "64"))]
mod width {
    pub type SglAddress = u32;
    pub const APACHE_MAX_SGL_LENGTH: usize = 109;
    pub const APACHE_PADDING_LENGTH: usize = 0;
    pub const ESCALADE_MAX_SGL_LENGTH: usize = 62;
    pub const ESCALADE_PADDING_LENGTH: usize = 8;
    pub const PASS_PADDING_LENGTH: usize = 4;
}

pub use width::*;

pub const HEADER_SIZE: usize = 128;
pub const PACKET_SIZE: usize = 1024;
pub const PAYLOAD_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

/// 32-bit words per scatter-gather entry
pub const SGL_WORDS: u8 = (mem::size_of::<SglEntry>() / 4) as u8;

// SGL offsets, in 32-bit words from the start of the payload
pub const APACHE_SGL_OFFSET: u8 = MAX_CDB_LENGTH as u8;
pub const PARAM_SGL_OFFSET: u8 = 2;
pub const PASS_SGL_OFFSET: u8 = 5;

/// Pack an opcode and SGL word offset into one byte
pub const fn opsgl_in(opcode: u8, sgl_offset: u8) -> u8 {
    (sgl_offset << 5) | (opcode & 0x1f)
}

pub const fn op_out(x: u8) -> u8 {
    x & 0x1f
}

pub const fn sgl_out(x: u8) -> u8 {
    (x >> 5) & 0x7
}

pub const fn req_lun_in(request_id: usize, lun: u8) -> u16 {
    (((lun as u16) & 0xf) << 12) | ((request_id as u16) & 0xfff)
}

pub const fn lun_out(x: u16) -> u8 {
    ((x >> 12) & 0xf) as u8
}

/// Request id carried by a response queue entry
pub const fn resid_out(x: u32) -> usize {
    ((x >> 4) & 0xff) as usize
}

pub const fn sev_out(x: u8) -> u8 {
    x & 0x7
}

/// Size in words of a parameter command with `sgls` entries
pub const fn param_command_size(sgls: u8) -> u8 {
    2 + sgls * SGL_WORDS
}

/// Size in words of an ATA passthrough command with `sgls` entries
pub const fn pass_command_size(sgls: u8) -> u8 {
    5 + sgls * SGL_WORDS
}

/// Scatter-gather list entry
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct SglEntry {
    address: SglAddress,
    length: u32,
}

impl SglEntry {
    pub fn new(address: u64, length: u32) -> Self {
        Self {
            address: (address as SglAddress).to_le(),
            length: length.to_le(),
        }
    }

    pub fn address(&self) -> u64 {
        SglAddress::from_le(self.address) as u64
    }

    pub fn length(&self) -> u32 {
        u32::from_le(self.length)
    }

    pub fn set_length(&mut self, length: u32) {
        self.length = length.to_le();
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct HeaderStatus {
    _reserved: [u8; 4],
    error: u16,
    _padding: u8,
    severity: u8,
    error_desc: [u8; ERROR_DESC_LENGTH],
}

/// Packet header: sense data and completion status
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CommandHeader {
    pub sense_data: [u8; SENSE_DATA_LENGTH],
    status: HeaderStatus,
    header_size: u8,
    _reserved: [u8; 2],
    sense_size: u8,
}

impl CommandHeader {
    /// Clear the completion status before (re)posting
    pub fn prepare(&mut self) {
        self.status.error = 0;
        self.status.severity = 0;
        self.header_size = HEADER_SIZE as u8;
    }

    pub fn error(&self) -> u16 {
        u16::from_le(self.status.error)
    }

    pub fn set_error(&mut self, error: u16) {
        self.status.error = error.to_le();
    }

    /// Severity field as reported (low three bits)
    pub fn severity(&self) -> u8 {
        sev_out(self.status.severity)
    }

    pub fn set_severity(&mut self, severity: u8) {
        self.status.severity = severity;
    }

    pub fn header_size(&self) -> u8 {
        self.header_size
    }

    pub fn sense_size(&self) -> u8 {
        self.sense_size
    }

    pub fn error_desc(&self) -> &[u8; ERROR_DESC_LENGTH] {
        &self.status.error_desc
    }

    pub fn error_desc_mut(&mut self) -> &mut [u8; ERROR_DESC_LENGTH] {
        &mut self.status.error_desc
    }

    /// Split the description area into the description and the optional
    /// detail string that follows its terminator.
    pub fn descriptions(&self) -> (&[u8], Option<&[u8]>) {
        let area = &self.status.error_desc[..];
        let desc_len = area.iter().position(|&b| b == 0).unwrap_or(area.len());
        let desc = &area[..desc_len];
        if desc_len >= ERROR_DESC_LENGTH - 1 {
            return (desc, None);
        }
        let rest = &area[desc_len + 1..];
        let detail_len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        if detail_len == 0 {
            (desc, None)
        } else {
            (desc, Some(&rest[..detail_len]))
        }
    }
}

/// INIT_CONNECTION payload
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CommandInit {
    pub opcode: u8,
    pub size: u8,
    pub request_id: u8,
    _reserved: u8,
    pub status: u8,
    pub flags: u8,
    message_credits: u16,
    features: u32,
    fw_srl: u16,
    fw_arch_id: u16,
    fw_branch: u16,
    fw_build: u16,
    result: u32,
}

impl CommandInit {
    pub fn message_credits(&self) -> u16 {
        u16::from_le(self.message_credits)
    }

    pub fn set_message_credits(&mut self, credits: u16) {
        self.message_credits = credits.to_le();
    }

    pub fn features(&self) -> u32 {
        u32::from_le(self.features)
    }

    pub fn set_features(&mut self, features: u32) {
        self.features = features.to_le();
    }

    /// (srl, arch_id, branch, build)
    pub fn firmware(&self) -> (u16, u16, u16, u16) {
        (
            u16::from_le(self.fw_srl),
            u16::from_le(self.fw_arch_id),
            u16::from_le(self.fw_branch),
            u16::from_le(self.fw_build),
        )
    }

    pub fn set_firmware(&mut self, srl: u16, arch_id: u16, branch: u16, build: u16) {
        self.fw_srl = srl.to_le();
        self.fw_arch_id = arch_id.to_le();
        self.fw_branch = branch.to_le();
        self.fw_build = build.to_le();
    }

    pub fn result(&self) -> u32 {
        u32::from_le(self.result)
    }

    pub fn set_result(&mut self, result: u32) {
        self.result = result.to_le();
    }
}

/// Legacy (7000-style) payload used by parameter commands
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Command7xxx {
    pub opcode_sgl_offset: u8,
    pub size: u8,
    pub request_id: u8,
    pub unit_host_id: u8,
    pub status: u8,
    pub flags: u8,
    param_count: u16,
    pub sgl: [SglEntry; ESCALADE_MAX_SGL_LENGTH],
    _padding: [u8; ESCALADE_PADDING_LENGTH],
}

impl Command7xxx {
    pub fn param_count(&self) -> u16 {
        u16::from_le(self.param_count)
    }

    pub fn set_param_count(&mut self, count: u16) {
        self.param_count = count.to_le();
    }
}

/// Extended (9000-style) payload carrying a CDB
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Command9xxx {
    pub opcode: u8,
    pub unit: u8,
    request_id_lun: u16,
    pub status: u8,
    pub sgl_offset: u8,
    sgl_entries: u16,
    pub cdb: [u8; MAX_CDB_LENGTH],
    pub sgl: [SglEntry; APACHE_MAX_SGL_LENGTH],
    _padding: [u8; APACHE_PADDING_LENGTH],
}

impl Command9xxx {
    pub fn request_id(&self) -> usize {
        (u16::from_le(self.request_id_lun) & 0xfff) as usize
    }

    pub fn lun(&self) -> u8 {
        lun_out(u16::from_le(self.request_id_lun))
    }

    pub fn set_request_id_lun(&mut self, request_id: usize, lun: u8) {
        self.request_id_lun = req_lun_in(request_id, lun).to_le();
    }

    pub fn sgl_entries(&self) -> u16 {
        u16::from_le(self.sgl_entries)
    }

    pub fn set_sgl_entries(&mut self, entries: u16) {
        self.sgl_entries = entries.to_le();
    }
}

/// ATA passthrough payload
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CommandPass {
    pub opcode_sgl_offset: u8,
    pub size: u8,
    pub request_id: u8,
    pub unit: u8,
    pub status: u8,
    pub flags: u8,
    param: u16,
    features: u16,
    sector_count: u16,
    lba_low: u16,
    lba_mid: u16,
    lba_high: u16,
    pub device: u8,
    pub command: u8,
    pub sgl: [SglEntry; APACHE_MAX_SGL_LENGTH],
    _padding: [u8; PASS_PADDING_LENGTH],
}

/// Task file registers carried by a passthrough packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtaTaskFile {
    pub features: u16,
    pub sector_count: u16,
    pub lba_low: u16,
    pub lba_mid: u16,
    pub lba_high: u16,
    pub device: u8,
    pub command: u8,
}

impl CommandPass {
    pub fn param(&self) -> u16 {
        u16::from_le(self.param)
    }

    pub fn set_param(&mut self, param: u16) {
        self.param = param.to_le();
    }

    pub fn task_file(&self) -> AtaTaskFile {
        AtaTaskFile {
            features: u16::from_le(self.features),
            sector_count: u16::from_le(self.sector_count),
            lba_low: u16::from_le(self.lba_low),
            lba_mid: u16::from_le(self.lba_mid),
            lba_high: u16::from_le(self.lba_high),
            device: self.device,
            command: self.command,
        }
    }

    pub fn set_task_file(&mut self, tf: &AtaTaskFile) {
        self.features = tf.features.to_le();
        self.sector_count = tf.sector_count.to_le();
        self.lba_low = tf.lba_low.to_le();
        self.lba_mid = tf.lba_mid.to_le();
        self.lba_high = tf.lba_high.to_le();
        self.device = tf.device;
        self.command = tf.command;
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
union CommandPayload {
    init: CommandInit,
    legacy: Command7xxx,
    apache: Command9xxx,
    pass: CommandPass,
    raw: [u8; PAYLOAD_SIZE],
}

/// Full command packet as seen by the controller
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CommandPacket {
    pub header: CommandHeader,
    payload: CommandPayload,
}

const _: () = assert!(mem::size_of::<CommandHeader>() == HEADER_SIZE);
const _: () = assert!(mem::size_of::<CommandInit>() == 24);
const _: () = assert!(mem::size_of::<Command7xxx>() == 512);
const _: () = assert!(mem::size_of::<Command9xxx>() == PAYLOAD_SIZE);
const _: () = assert!(mem::size_of::<CommandPass>() == PAYLOAD_SIZE);
const _: () = assert!(mem::size_of::<CommandPacket>() == PACKET_SIZE);

// Every payload variant is plain integer data, so any bit pattern is a
// valid value of each of them.
impl CommandPacket {
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }

    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    pub fn init(&self) -> &CommandInit {
        unsafe { &self.payload.init }
    }

    pub fn init_mut(&mut self) -> &mut CommandInit {
        unsafe { &mut self.payload.init }
    }

    pub fn legacy(&self) -> &Command7xxx {
        unsafe { &self.payload.legacy }
    }

    pub fn legacy_mut(&mut self) -> &mut Command7xxx {
        unsafe { &mut self.payload.legacy }
    }

    pub fn apache(&self) -> &Command9xxx {
        unsafe { &self.payload.apache }
    }

    pub fn apache_mut(&mut self) -> &mut Command9xxx {
        unsafe { &mut self.payload.apache }
    }

    pub fn pass(&self) -> &CommandPass {
        unsafe { &self.payload.pass }
    }

    pub fn pass_mut(&mut self) -> &mut CommandPass {
        unsafe { &mut self.payload.pass }
    }

    pub fn payload_bytes(&self) -> &[u8; PAYLOAD_SIZE] {
        unsafe { &self.payload.raw }
    }

    /// Opcode, valid for every payload format
    pub fn opcode(&self) -> u8 {
        op_out(self.payload_bytes()[0])
    }

    /// Status byte sits at the same offset in every payload format
    pub fn status(&self) -> u8 {
        self.payload_bytes()[4]
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        unsafe { &*(self as *const Self as *const [u8; PACKET_SIZE]) }
    }

    pub fn from_bytes(bytes: &[u8; PACKET_SIZE]) -> Self {
        unsafe { mem::transmute_copy(bytes) }
    }
}

/// Controller parameter descriptor, followed by its data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub table_id: u16,
    pub parameter_id: u16,
    pub parameter_size: u16,
    pub actual_parameter_size: u16,
}

impl ParamDescriptor {
    pub const SIZE: usize = 8;

    /// Encode the descriptor and `data` into `buf`
    pub fn write(&self, buf: &mut [u8], data: &[u8]) {
        buf[0..2].copy_from_slice(&self.table_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.parameter_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.parameter_size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.actual_parameter_size.to_le_bytes());
        buf[Self::SIZE..Self::SIZE + data.len()].copy_from_slice(data);
    }

    pub fn read(buf: &[u8]) -> Self {
        Self {
            table_id: u16::from_le_bytes([buf[0], buf[1]]),
            parameter_id: u16::from_le_bytes([buf[2], buf[3]]),
            parameter_size: u16::from_le_bytes([buf[4], buf[5]]),
            actual_parameter_size: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }
}
