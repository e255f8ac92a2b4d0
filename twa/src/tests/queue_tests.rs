// Command Submission Tests
#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::atomic::Ordering;

    use crate::driver::{DmaDirection, InterruptReturn};
    use crate::tests::sim::*;
    use crate::twa::caps::{PCI_DEVICE_ID_3WARE_9550SX, PCI_DEVICE_ID_3WARE_9650SE};
    use crate::twa::command::{ATA_16, WRITE_10};
    use crate::twa::packet::{pass_command_size, sgl_out, PASS_SGL_OFFSET};
    use crate::twa::regs::{COMMAND_QUEUE_LARGE_REG, STATUS_REG};
    use crate::twa::*;

    #[test]
    fn test_bounce_read_completes_with_data() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        let status = h
            .device
            .queue_command(command(&read10(1), DmaDirection::FromDevice, &[512], &sink));
        assert!(status.is_queued());
        assert_eq!(h.dma.maps.load(Ordering::SeqCst), 0);

        let posted = h.sim.last_posted();
        let id = posted.apache().request_id();
        assert_eq!(posted.apache().sgl_entries(), 1);
        assert_eq!(posted.apache().sgl[0].address(), h.device.pool().buffer_dma(id));
        assert_eq!(posted.apache().sgl[0].length(), 512);
        assert_eq!(h.device.request_state(id), RequestState::Posted);

        assert_eq!(h.device.interrupt(), InterruptReturn::Handled);

        let done = sink.lock().unwrap();
        assert_eq!(done.len(), 1);
        let (cmd, completion) = &done[0];
        assert!(completion.is_ok());
        assert_eq!(completion.residual, 0);
        assert!(cmd.data.segments()[0].iter().all(|&b| b == 0xa5));
        assert!(h.device.pool().all_free());
        assert_eq!(h.device.stats().posted_requests, 0);
    }

    #[test]
    fn test_bounce_write_stages_data() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        let mut cmd = command(&write10(1), DmaDirection::ToDevice, &[512], &sink);
        cmd.data.segments_mut()[0].fill(0x3c);
        assert!(h.device.queue_command(cmd).is_queued());

        assert_eq!(h.sim.with(|s| s.written.clone()), vec![0x3c; 512]);
        h.device.interrupt();
        assert!(sink.lock().unwrap()[0].1.is_ok());
    }

    #[test]
    fn test_large_single_segment_is_mapped() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        let cmd = command(&read10(2), DmaDirection::FromDevice, &[513], &sink);
        let address = cmd.data.segments()[0].as_ptr() as u64;
        assert!(h.device.queue_command(cmd).is_queued());

        assert_eq!(h.dma.maps.load(Ordering::SeqCst), 1);
        let posted = h.sim.last_posted();
        assert_eq!(posted.apache().sgl[0].address(), address);
        assert_eq!(posted.apache().sgl[0].length(), 513);

        h.device.interrupt();
        assert_eq!(h.dma.unmaps.load(Ordering::SeqCst), 1);
        let done = sink.lock().unwrap();
        assert!(done[0].0.data.segments()[0].iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn test_multi_segment_is_mapped() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();

        let cmd = command(&read10(1), DmaDirection::FromDevice, &[256, 256], &sink);
        assert!(h.device.queue_command(cmd).is_queued());

        let posted = h.sim.last_posted();
        assert_eq!(posted.apache().sgl_entries(), 2);
        assert_eq!(h.device.stats().sgl_entries, 2);
        assert_eq!(h.device.stats().sectors, 1);

        h.device.interrupt();
        let done = sink.lock().unwrap();
        let (cmd, completion) = &done[0];
        assert!(completion.is_ok());
        // Residual is only reported for single-segment transfers.
        assert_eq!(completion.residual, 0);
        assert!(cmd.data.segments().iter().flatten().all(|&b| b == 0xa5));
        assert_eq!(h.dma.unmaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sgl_preserves_segment_order() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();

        let cmd = command(&read10(3), DmaDirection::FromDevice, &[512, 1024, 100], &sink);
        let expected: Vec<(u64, u32)> = cmd
            .data
            .segments()
            .iter()
            .map(|s| (s.as_ptr() as u64, s.len() as u32))
            .collect();
        assert!(h.device.queue_command(cmd).is_queued());

        let posted = h.sim.last_posted();
        let cmd = posted.apache();
        assert_eq!(cmd.sgl_entries() as usize, expected.len());
        let entries: Vec<(u64, u32)> = (0..expected.len())
            .map(|i| {
                let entry = cmd.sgl[i];
                (entry.address(), entry.length())
            })
            .collect();
        assert_eq!(entries, expected);
        h.device.interrupt();
    }

    #[test]
    fn test_map_failure_completes_with_error() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();
        h.dma.fail_map.store(true, Ordering::SeqCst);

        let status = h
            .device
            .queue_command(command(&read10(4), DmaDirection::FromDevice, &[2048], &sink));
        assert!(status.is_queued());

        let done = sink.lock().unwrap();
        assert_eq!(done[0].1.host, HostStatus::Error);
        assert!(h.device.pool().all_free());
    }

    #[test]
    fn test_no_data_command() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        assert!(h
            .device
            .queue_command(command(&[0u8; 6], DmaDirection::None, &[], &sink))
            .is_queued());
        assert_eq!(h.sim.last_posted().apache().sgl_entries(), 0);

        h.device.interrupt();
        let done = sink.lock().unwrap();
        assert!(done[0].1.is_ok());
        assert_eq!(done[0].1.residual, 0);
    }

    #[test]
    fn test_split_large_posting_order() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();
        h.sim.clear_log();

        h.device
            .queue_command(command(&read10(1), DmaDirection::FromDevice, &[512], &sink));

        let id = h.sim.last_posted().apache().request_id();
        let address = h.device.pool().packet_dma(id) + COMMAND_OFFSET;
        let log = h.sim.with(|s| s.log.clone());
        let low = log
            .iter()
            .position(|a| *a == RegAccess::Write(COMMAND_QUEUE_LARGE_REG, address as u32))
            .unwrap();
        let status = log.iter().position(|a| *a == RegAccess::Read(STATUS_REG)).unwrap();
        let high = log
            .iter()
            .position(|a| *a == RegAccess::Write(COMMAND_QUEUE_LARGE_REG + 4, (address >> 32) as u32))
            .unwrap();
        // The low word is latched before the queue-full check.
        assert!(low < status);
        assert!(status < high);
    }

    #[test]
    fn test_mmio_large_queue_single_store() {
        let mut window = vec![0u64; 8];
        let base = window.as_mut_ptr();
        let regs = unsafe { MmioRegisters::new(NonNull::new(base as *mut u8).unwrap()) };

        regs.write64(COMMAND_QUEUE_LARGE_REG, 0x0000_0001_2345_6080);
        assert_eq!(unsafe { base.add(4).read_volatile() }, 0x0000_0001_2345_6080);

        // Split writes land in the same register pair.
        regs.write32(COMMAND_QUEUE_LARGE_REG, 0x1111_2080);
        regs.write32(COMMAND_QUEUE_LARGE_REG + 4, 0x2);
        assert_eq!(unsafe { base.add(4).read_volatile() }, 0x0000_0002_1111_2080);
    }

    #[test]
    fn test_submission_masks_local_interrupts() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        assert!(h
            .device
            .queue_command(command(&read10(1), DmaDirection::FromDevice, &[512], &sink))
            .is_queued());
        assert_eq!(h.sim.with(|s| s.masked_posts.last().copied()), Some(true));
        assert!(!h.clock.irq_masked.load(Ordering::SeqCst));

        h.device.interrupt();
        assert!(sink.lock().unwrap()[0].1.is_ok());
    }

    #[test]
    fn test_large64_posting_order() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();
        h.sim.clear_log();

        h.device
            .queue_command(command(&read10(1), DmaDirection::FromDevice, &[512], &sink));

        let id = h.sim.last_posted().apache().request_id();
        let address = h.device.pool().packet_dma(id) + COMMAND_OFFSET;
        let log = h.sim.with(|s| s.log.clone());
        let status = log.iter().position(|a| *a == RegAccess::Read(STATUS_REG)).unwrap();
        let low = log
            .iter()
            .position(|a| *a == RegAccess::Write(COMMAND_QUEUE_LARGE_REG, address as u32))
            .unwrap();
        assert!(status < low);
        assert_eq!(
            log[low + 1],
            RegAccess::Write(COMMAND_QUEUE_LARGE_REG + 4, (address >> 32) as u32)
        );
    }

    #[test]
    fn test_split_large_full_queue_posts_nothing() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();
        let before = h.sim.with(|s| s.posted.len());
        h.sim.with(|s| s.queue_full = true);

        let status = h
            .device
            .queue_command(command(&read10(1), DmaDirection::FromDevice, &[512], &sink));
        assert!(!status.is_queued());
        assert_eq!(h.sim.with(|s| s.posted.len()), before);
        assert!(h.device.pool().all_free());
    }

    #[test]
    fn test_full_queue_returns_command() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();
        h.sim.with(|s| s.queue_full = true);

        let cmd = command(&read10(1), DmaDirection::FromDevice, &[512], &sink);
        match h.device.queue_command(cmd) {
            QueueStatus::HostBusy(cmd) => assert_eq!(cmd.opcode(), crate::twa::command::READ_10),
            QueueStatus::Queued => panic!("command accepted on a full queue"),
        }
        assert!(sink.lock().unwrap().is_empty());
        assert!(h.device.pool().all_free());
        assert_eq!(h.device.stats().pending_requests, 0);
    }

    #[test]
    fn test_full_queue_unmaps_mapped_command() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();
        h.sim.with(|s| s.queue_full = true);

        let status = h
            .device
            .queue_command(command(&read10(4), DmaDirection::FromDevice, &[2048], &sink));
        assert!(!status.is_queued());
        assert_eq!(h.dma.maps.load(Ordering::SeqCst), 1);
        assert_eq!(h.dma.unmaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backlog_refuses_callers_and_drains_internal() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();

        // The AEN read triggered by attention is deferred behind a full queue.
        h.sim.with(|s| s.queue_full = true);
        h.sim.raise_attention();
        assert_eq!(h.device.interrupt(), InterruptReturn::Handled);

        let aen = h.device.pool().aen_request().unwrap();
        assert_eq!(h.device.request_state(aen), RequestState::Pending);
        assert!(h.device.pool().is_pending(aen));
        assert_eq!(h.device.stats().pending_requests, 1);
        assert!(h.sim.with(|s| s.command_armed));

        // Space is back, but the backlog still comes first.
        h.sim.with(|s| s.queue_full = false);
        let cmd = command(&read10(1), DmaDirection::FromDevice, &[512], &sink);
        assert!(!h.device.queue_command(cmd).is_queued());

        // Command interrupt re-posts the deferred AEN read.
        h.device.interrupt();
        assert_eq!(h.device.stats().pending_requests, 0);
        assert_eq!(h.device.stats().max_pending_requests, 1);
        assert!(!h.device.pool().is_pending(aen));
        assert_eq!(h.device.request_state(aen), RequestState::Posted);

        // Its response finds an empty AEN queue.
        h.device.interrupt();
        assert_eq!(h.device.pool().aen_request(), None);
        assert!(h.device.pool().all_free());

        let cmd = command(&read10(1), DmaDirection::FromDevice, &[512], &sink);
        assert!(h.device.queue_command(cmd).is_queued());
    }

    #[test]
    fn test_backlog_waits_while_queue_stays_full() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        h.sim.with(|s| s.queue_full = true);
        h.sim.raise_attention();
        h.device.interrupt();
        let aen = h.device.pool().aen_request().unwrap();

        // A spurious host interrupt while still full leaves the backlog parked.
        h.sim.with(|s| s.host_interrupt = true);
        h.device.interrupt();
        assert_eq!(h.device.request_state(aen), RequestState::Pending);
        assert_eq!(h.device.stats().pending_requests, 1);

        h.sim.with(|s| s.queue_full = false);
        h.device.interrupt();
        h.device.interrupt();
        assert!(h.device.pool().all_free());
    }

    #[test]
    fn test_lun_beyond_firmware_support() {
        let sim = SimController::new();
        sim.with(|s| s.compatible_srls = vec![BASE_FW_SRL]);
        let h = Harness::try_attach(PCI_DEVICE_ID_3WARE_9550SX, sim, TwaConfig::default()).unwrap();
        assert_eq!(h.device.compat_info().working.srl, BASE_FW_SRL);
        assert_eq!(h.device.max_lun(), 1);

        let sink = collector();
        let mut cmd = command(&read10(1), DmaDirection::FromDevice, &[512], &sink);
        cmd.lun = 1;
        let before = h.sim.with(|s| s.posted.len());
        assert!(h.device.queue_command(cmd).is_queued());

        assert_eq!(sink.lock().unwrap()[0].1.host, HostStatus::BadTarget);
        assert_eq!(h.sim.with(|s| s.posted.len()), before);
    }

    #[test]
    fn test_lun_in_range_with_luns_supported() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        assert_eq!(h.device.max_lun(), 16);

        let sink = collector();
        let mut cmd = command(&read10(1), DmaDirection::FromDevice, &[512], &sink);
        cmd.lun = 15;
        assert!(h.device.queue_command(cmd).is_queued());
        assert_eq!(h.sim.last_posted().apache().lun(), 15);
    }

    #[test]
    fn test_ata16_passthrough() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();
        let cdb = [
            ATA_16, 0x08, 0x0e, 0x12, 0x34, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0xa0, 0xec, 0x00,
        ];

        assert!(h
            .device
            .queue_command(command(&cdb, DmaDirection::FromDevice, &[512], &sink))
            .is_queued());

        let posted = h.sim.last_posted();
        assert_eq!(posted.opcode(), OP_ATA_PASSTHROUGH);
        assert_eq!(sgl_out(posted.pass().opcode_sgl_offset), PASS_SGL_OFFSET);
        assert_eq!(posted.pass().size, pass_command_size(1));
        assert_eq!(h.sim.with(|s| s.pass_params.clone()), vec![0xd]);
        let tf = h.sim.with(|s| s.task_files[0]);
        assert_eq!(tf.features, 0x1234);
        assert_eq!(tf.sector_count, 0x0001);
        assert_eq!(tf.lba_high, 0x5566);
        assert_eq!(tf.command, 0xec);

        h.device.interrupt();
        let done = sink.lock().unwrap();
        assert!(done[0].1.is_ok());
        assert!(done[0].0.data.segments()[0].iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn test_passthrough_without_data() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9650SE);
        let sink = collector();
        let mut cdb = [0u8; 16];
        cdb[0] = ATA_16;
        cdb[14] = 0xe7;

        h.device.queue_command(command(&cdb, DmaDirection::None, &[], &sink));
        let posted = h.sim.last_posted();
        assert_eq!(sgl_out(posted.pass().opcode_sgl_offset), 0);
        assert_eq!(posted.pass().size, pass_command_size(0));
        assert_eq!(h.sim.with(|s| s.pass_params.clone()), vec![0x8]);
    }

    #[test]
    fn test_stats_track_posted_requests() {
        let h = Harness::attach(PCI_DEVICE_ID_3WARE_9550SX);
        let sink = collector();
        h.sim.with(|s| s.hold_io = true);

        for _ in 0..3 {
            let cmd = command(&[WRITE_10, 0, 0, 0, 0, 0, 0, 0, 1, 0], DmaDirection::ToDevice, &[512], &sink);
            assert!(h.device.queue_command(cmd).is_queued());
        }
        assert_eq!(h.device.stats().posted_requests, 3);

        h.sim.release_held();
        h.device.interrupt();
        let stats = h.device.stats();
        assert_eq!(stats.posted_requests, 0);
        assert!(stats.max_posted_requests >= 3);
        assert_eq!(sink.lock().unwrap().len(), 3);
    }
}
