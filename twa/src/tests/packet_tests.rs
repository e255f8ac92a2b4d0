// Command Packet Tests
#[cfg(test)]
mod tests {
    use crate::twa::command::*;
    use crate::twa::packet::*;
    use crate::twa::*;

    #[test]
    fn test_packet_layout() {
        assert_eq!(core::mem::size_of::<CommandPacket>(), PACKET_SIZE);
        assert_eq!(core::mem::size_of::<CommandHeader>(), HEADER_SIZE);
        assert_eq!(core::mem::size_of::<SglEntry>() % 4, 0);
    }

    #[test]
    fn test_opcode_and_sgl_offset_packing() {
        let byte = opsgl_in(OP_SET_PARAM, PARAM_SGL_OFFSET);
        assert_eq!(op_out(byte), OP_SET_PARAM);
        assert_eq!(sgl_out(byte), PARAM_SGL_OFFSET);

        let byte = opsgl_in(OP_ATA_PASSTHROUGH, PASS_SGL_OFFSET);
        assert_eq!(op_out(byte), OP_ATA_PASSTHROUGH);
        assert_eq!(sgl_out(byte), PASS_SGL_OFFSET);
    }

    #[test]
    fn test_request_id_and_lun_packing() {
        let packed = req_lun_in(0xab, 7);
        assert_eq!(packed & 0xfff, 0xab);
        assert_eq!(lun_out(packed), 7);

        let mut packet = CommandPacket::zeroed();
        packet.apache_mut().set_request_id_lun(200, 15);
        assert_eq!(packet.apache().request_id(), 200);
        assert_eq!(packet.apache().lun(), 15);
    }

    #[test]
    fn test_response_id_extraction() {
        assert_eq!(resid_out(0x0000_0ff0), 0xff);
        assert_eq!(resid_out(42 << 4), 42);
        assert_eq!(resid_out(0xffff_fff0), 0xff);
    }

    #[test]
    fn test_command_sizes() {
        assert_eq!(param_command_size(1), 2 + SGL_WORDS);
        assert_eq!(pass_command_size(0), 5);
        assert_eq!(pass_command_size(2), 5 + 2 * SGL_WORDS);
    }

    #[test]
    fn test_header_prepare_clears_status() {
        let mut packet = CommandPacket::zeroed();
        packet.header.set_error(0x0123);
        packet.header.set_severity(AEN_SEVERITY_WARNING);
        packet.header.prepare();
        assert_eq!(packet.header.error(), 0);
        assert_eq!(packet.header.severity(), 0);
        assert_eq!(packet.header.header_size() as usize, HEADER_SIZE);
    }

    #[test]
    fn test_header_descriptions() {
        let mut packet = CommandPacket::zeroed();
        let text = b"Drive error\0port 3\0";
        packet.header.error_desc_mut()[..text.len()].copy_from_slice(text);
        let (desc, detail) = packet.header.descriptions();
        assert_eq!(desc, b"Drive error");
        assert_eq!(detail, Some(&b"port 3"[..]));

        packet.header.error_desc_mut().fill(0);
        let (desc, detail) = packet.header.descriptions();
        assert!(desc.is_empty());
        assert_eq!(detail, None);
    }

    #[test]
    fn test_init_connection_fields() {
        let mut packet = CommandPacket::zeroed();
        let cmd = packet.init_mut();
        cmd.opcode = OP_INIT_CONNECTION;
        cmd.set_message_credits(CONNECTION_RUN);
        cmd.set_features(EXTENDED_INIT_CONNECT);
        cmd.set_firmware(CURRENT_DRIVER_SRL, ARCH_ID_9000, 1, 2);
        cmd.set_result(CTLR_FW_COMPATIBLE);

        assert_eq!(packet.opcode(), OP_INIT_CONNECTION);
        let cmd = packet.init();
        assert_eq!(cmd.message_credits(), CONNECTION_RUN);
        assert_eq!(cmd.features(), EXTENDED_INIT_CONNECT);
        assert_eq!(cmd.firmware(), (CURRENT_DRIVER_SRL, ARCH_ID_9000, 1, 2));
        assert_eq!(cmd.result(), CTLR_FW_COMPATIBLE);
    }

    #[test]
    fn test_param_descriptor() {
        let mut buf = [0u8; 16];
        let param = ParamDescriptor {
            table_id: TIMEKEEP_TABLE | 0x8000,
            parameter_id: SCHEDULER_TIME_PARAM,
            parameter_size: 4,
            actual_parameter_size: 0,
        };
        param.write(&mut buf, &0x1234_5678u32.to_le_bytes());

        let read = ParamDescriptor::read(&buf);
        assert_eq!(read.table_id, 0x840a);
        assert_eq!(read.parameter_id, 3);
        assert_eq!(read.parameter_size, 4);
        assert_eq!(&buf[ParamDescriptor::SIZE..ParamDescriptor::SIZE + 4], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_mapped_threshold() {
        assert!(!is_mapped(1, SECTOR_SIZE));
        assert!(is_mapped(1, SECTOR_SIZE + 1));
        assert!(is_mapped(2, 100));
        assert!(!is_mapped(0, 0));
    }

    #[test]
    fn test_passthru_detection() {
        assert!(is_passthru(&[ATA_16, 0]));
        assert!(is_passthru(&[ATA_12]));
        assert!(!is_passthru(&[READ_10]));
        assert!(!is_passthru(&[]));
    }

    #[test]
    fn test_sector_count() {
        let mut cdb = [0u8; MAX_CDB_LENGTH];
        cdb[0] = READ_6;
        cdb[4] = 8;
        assert_eq!(sector_count(&cdb), 8);

        let mut cdb = [0u8; MAX_CDB_LENGTH];
        cdb[0] = WRITE_10;
        cdb[7] = 0x01;
        cdb[8] = 0x00;
        assert_eq!(sector_count(&cdb), 256);

        let mut cdb = [0u8; MAX_CDB_LENGTH];
        cdb[0] = READ_16;
        cdb[10..14].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        assert_eq!(sector_count(&cdb), 0x1_0000);

        let mut cdb = [0u8; MAX_CDB_LENGTH];
        cdb[0] = REQUEST_SENSE;
        assert_eq!(sector_count(&cdb), 0);
    }

    #[test]
    fn test_ata16_task_file() {
        let cdb = [
            ATA_16, 0x08, 0x0e, 0x12, 0x34, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0xa0, 0xec, 0x00,
        ];
        let tf = ata_task_file(&cdb);
        assert_eq!(tf.features, 0x1234);
        assert_eq!(tf.sector_count, 0x0001);
        assert_eq!(tf.lba_low, 0x1122);
        assert_eq!(tf.lba_mid, 0x3344);
        assert_eq!(tf.lba_high, 0x5566);
        assert_eq!(tf.device, 0xa0);
        assert_eq!(tf.command, 0xec);
    }

    #[test]
    fn test_ata12_task_file() {
        let mut cdb = [0u8; MAX_CDB_LENGTH];
        cdb[..10].copy_from_slice(&[ATA_12, 0x08, 0x0e, 0x01, 0x02, 0x03, 0x04, 0x05, 0xe0, 0x25]);
        let tf = ata_task_file(&cdb);
        assert_eq!(tf.features, 0x01);
        assert_eq!(tf.sector_count, 0x02);
        assert_eq!(tf.lba_low, 0x03);
        assert_eq!(tf.lba_mid, 0x04);
        assert_eq!(tf.lba_high, 0x05);
        assert_eq!(tf.device, 0xe0);
        assert_eq!(tf.command, 0x25);
    }

    #[test]
    fn test_pass_task_file_roundtrip_in_packet() {
        let tf = AtaTaskFile {
            features: 0xbeef,
            sector_count: 0x0102,
            lba_low: 0x0304,
            lba_mid: 0x0506,
            lba_high: 0x0708,
            device: 0x40,
            command: 0x25,
        };
        let mut packet = CommandPacket::zeroed();
        packet.pass_mut().set_task_file(&tf);
        assert_eq!(packet.pass().task_file(), tf);
    }

    #[test]
    fn test_scheduler_time() {
        // 1970-01-04 was a Sunday.
        assert_eq!(scheduler_time(3 * 86_400, 0), 0);
        assert_eq!(scheduler_time(3 * 86_400 + 3_600, 0), 3_600);
        assert_eq!(scheduler_time(10 * 86_400 + 5, 0), 5);
        // An hour west of UTC is still Saturday evening.
        assert_eq!(scheduler_time(3 * 86_400, 60), 604_800 - 3_600);
    }

    #[test]
    fn test_max_luns_by_firmware() {
        assert_eq!(max_luns(BASE_FW_SRL), 1);
        assert_eq!(max_luns(FW_SRL_LUNS_SUPPORTED - 1), 1);
        assert_eq!(max_luns(FW_SRL_LUNS_SUPPORTED), 16);
        assert_eq!(max_luns(CURRENT_DRIVER_SRL), 16);
    }

    #[test]
    fn test_bios_geometry() {
        let small = bios_geometry(0x10_0000);
        assert_eq!((small.heads, small.sectors), (64, 32));
        assert_eq!(small.cylinders, 0x10_0000 / (64 * 32));

        let large = bios_geometry(0x20_0000);
        assert_eq!((large.heads, large.sectors), (255, 63));
        assert_eq!(large.cylinders, (0x20_0000 / (255 * 63)) as u32);
    }

    #[test]
    fn test_message_tables() {
        assert_eq!(messages::aen_string(AEN_QUEUE_EMPTY), "AEN queue empty");
        assert_eq!(messages::aen_string(AEN_SOFT_RESET), "Controller reset occurred");
        assert_eq!(messages::aen_string(0xfff0), "Unknown");
        assert_eq!(messages::aen_severity(AEN_SEVERITY_ERROR), Some("ERROR"));
        assert_eq!(messages::aen_severity(AEN_SEVERITY_DEBUG), Some("DEBUG"));
        assert_eq!(messages::aen_severity(0), None);
        assert_eq!(messages::error_string(0xdead), "Unknown");
    }
}
