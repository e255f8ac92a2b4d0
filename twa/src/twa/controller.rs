// Controller Lifecycle: attach, initialization, reset and shutdown
use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use spin::{Mutex, RwLock};

use super::packet::resid_out;
use super::regs::{RESPONSE_QUEUE_LARGE_REG, RESPONSE_QUEUE_REG};
use super::request::RequestState;
use super::*;
use crate::driver::{DmaOps, DriverError, Platform, Result};

/// BIOS disk geometry for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub heads: u32,
    pub sectors: u32,
    pub cylinders: u32,
}

/// Geometry reported for a unit of `capacity` sectors
pub fn bios_geometry(capacity: u64) -> Geometry {
    let (heads, sectors) = if capacity >= 0x20_0000 { (255, 63) } else { (64, 32) };
    Geometry {
        heads,
        sectors,
        cylinders: (capacity / (heads * sectors) as u64) as u32,
    }
}

impl TwaDevice {
    /// Bring up a controller found at PCI `device_id`.
    ///
    /// `registry` must have been initialized. On success the controller is
    /// initialized, compatible and has interrupts enabled; the caller wires
    /// [`TwaDevice::interrupt`] to its line.
    pub fn attach(
        registry: &DriverRegistry,
        device_id: u16,
        regs: Box<dyn RegisterBus>,
        dma: Arc<dyn DmaOps>,
        platform: Arc<dyn Platform>,
        config: TwaConfig,
    ) -> Result<Arc<TwaDevice>> {
        if !registry.is_initialized() {
            log::error!("{}: attach before driver init", DRIVER_NAME);
            return Err(DriverError::InvalidState);
        }
        let caps = QueueCaps::for_device_id(device_id).ok_or(DriverError::NotFound)?;
        let minor = registry.get_minor().map_err(|err| {
            log::error!("{}: attach failed: too many controllers", DRIVER_NAME);
            err
        })?;

        let device = match Self::build(minor, caps, config, regs, dma, platform) {
            Ok(device) => device,
            Err(err) => {
                log::error!("twa{}: failed to initialize requests: {}", minor, err);
                registry.release_minor(minor);
                return Err(err);
            }
        };

        device.write_control(Control::DISABLE_INTERRUPTS);

        if let Err(err) = device.init_controller(false, config.init_timeout_secs) {
            log::error!("twa{}: failed to initialize controller: {}", minor, err);
            registry.release_minor(minor);
            return Err(err);
        }

        let mut device = device;
        device.using_msi = config.use_msi && caps.msi_capable;

        device.write_control(Control::ENABLE_INTERRUPTS | Control::UNMASK_RESPONSE_INTERRUPT);

        let compat = device.compat_info();
        log::info!(
            "twa{}: {} controller, firmware {}.{}.{}, {} units, {} LUNs{}",
            minor,
            caps.generation.name(),
            compat.firmware.srl,
            compat.firmware.branch,
            compat.firmware.build,
            device.max_units(),
            device.max_lun(),
            if device.using_msi { ", MSI" } else { "" }
        );

        Ok(Arc::new(device))
    }

    // Allocate the request backings and assemble the instance.
    fn build(
        minor: usize,
        caps: QueueCaps,
        config: TwaConfig,
        regs: Box<dyn RegisterBus>,
        dma: Arc<dyn DmaOps>,
        platform: Arc<dyn Platform>,
    ) -> Result<TwaDevice> {
        let packets = dma.alloc_coherent(MAX_REQUESTS * core::mem::size_of::<CommandPacket>())?;
        let buffers = match dma.alloc_coherent(MAX_REQUESTS * SECTOR_SIZE) {
            Ok(region) => region,
            Err(err) => {
                dma.free_coherent(packets);
                return Err(err);
            }
        };
        let pool = RequestPool::new(&packets, &buffers);

        Ok(TwaDevice {
            minor,
            caps,
            config,
            regs,
            dma,
            platform,
            packets: Some(packets),
            buffers: Some(buffers),
            pool,
            queue_lock: Mutex::new(()),
            host_lock: RwLock::new(()),
            ioctl_lock: Mutex::new(()),
            ioctl_wait: AtomicU8::new(0),
            in_reset: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            using_msi: false,
            stats: Stats::new(),
            events: Mutex::new(EventLog::new()),
            compat: RwLock::new(CompatInfo::default()),
        })
    }

    /// Take the controller offline and give back its minor.
    pub fn detach(self: Arc<Self>, registry: &DriverRegistry) {
        self.shutdown();
        registry.release_minor(self.minor);
    }

    /// Quiesce the controller and tell the firmware we are going away.
    /// Every outstanding command completes with [`HostStatus::Reset`].
    pub fn shutdown(&self) {
        if self.offline.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("twa{}: Shutting down", self.minor);

        let _ioctl = self.ioctl_lock.lock();
        self.in_reset.store(true, Ordering::Release);
        self.write_control(
            Control::DISABLE_INTERRUPTS | Control::MASK_COMMAND_INTERRUPT | Control::MASK_RESPONSE_INTERRUPT,
        );

        self.abort_all(HostStatus::Reset);

        match self.init_connection(CONNECTION_SHUTDOWN, None) {
            Ok(_) => log::info!("twa{}: Shutdown complete", self.minor),
            Err(err) => log::error!("twa{}: Connection shutdown failed: {}", self.minor, err),
        }

        self.write_control(Control::CLEAR_ALL_INTERRUPTS);
    }

    /// Last-resort recovery: abort everything and reinitialize the controller.
    /// If the controller does not come back it is left offline for good.
    pub fn host_reset(&self) -> Result<()> {
        let resets = self.stats.resets();
        log::error!("twa{}: resetting card", self.minor);

        let _ioctl = self.ioctl_lock.lock();
        if self.stats.resets() > resets {
            // Another reset finished while we waited.
            return Ok(());
        }
        if self.is_offline() {
            return Err(DriverError::InvalidState);
        }

        self.in_reset.store(true, Ordering::Release);
        self.write_control(
            Control::DISABLE_INTERRUPTS | Control::MASK_COMMAND_INTERRUPT | Control::MASK_RESPONSE_INTERRUPT,
        );

        self.abort_all(HostStatus::Reset);

        let result = self.init_controller(true, self.config.reset_timeout_secs);
        if let Err(err) = result {
            // Nothing can be posted to a controller that did not come back.
            log::error!("twa{}: Failed to perform host reset: {}", self.minor, err);
            self.offline.store(true, Ordering::Release);
            self.write_control(Control::CLEAR_ALL_INTERRUPTS);
            return Err(err);
        }

        self.stats.inc_resets();
        self.in_reset.store(false, Ordering::Release);
        self.write_control(
            Control::CLEAR_ATTENTION_INTERRUPT | Control::ENABLE_INTERRUPTS | Control::UNMASK_RESPONSE_INTERRUPT,
        );
        Ok(())
    }

    /// Initialize the controller, soft-resetting it first when asked or
    /// when a first attempt fails. Interrupts must be disabled.
    pub(crate) fn init_controller(&self, reset: bool, timeout_secs: u32) -> Result<()> {
        let mut reset = reset;
        let mut flags = Status::MICROCONTROLLER_READY;
        let mut result = Err(DriverError::Timeout);

        for tries in 0..MAX_RESET_TRIES {
            if tries > 0 {
                reset = true;
            }

            if reset {
                self.write_control(
                    Control::CLEAR_ATTENTION_INTERRUPT
                        | Control::CLEAR_HOST_INTERRUPT
                        | Control::CLEAR_ERROR_STATUS
                        | Control::MASK_COMMAND_INTERRUPT
                        | Control::MASK_RESPONSE_INTERRUPT
                        | Control::DISABLE_INTERRUPTS
                        | Control::ISSUE_SOFT_RESET,
                );
                // A reset raises attention once the firmware is back.
                flags |= Status::ATTENTION_INTERRUPT;

                result = self.drain_response_queue_large();
                if let Err(err) = result {
                    log::warn!("twa{}: Failed to clear large response queue during reset: {}", self.minor, err);
                    continue;
                }
            }

            result = self.poll_status(flags, timeout_secs);
            if let Err(err) = result {
                log::warn!("twa{}: Controller not ready during reset: {}", self.minor, err);
                continue;
            }

            result = self.drain_response_queue();
            if let Err(err) = result {
                log::warn!("twa{}: Failed to clear response queue during reset: {}", self.minor, err);
                continue;
            }

            result = self.check_compat();
            match result {
                Err(DriverError::Incompatible) => {
                    log::error!("twa{}: Incompatible firmware detected during reset", self.minor);
                    break;
                }
                Err(err) => {
                    log::warn!("twa{}: Connection failed during reset: {}", self.minor, err);
                    continue;
                }
                Ok(()) => {}
            }

            result = self.drain_aen_queue(reset);
            if let Err(err) = result {
                log::warn!("twa{}: AEN drain failed during reset: {}", self.minor, err);
                continue;
            }

            return Ok(());
        }

        result
    }

    // Wait for the P-chip to flush its queue after a soft reset.
    fn drain_response_queue_large(&self) -> Result<()> {
        if !self.caps.large_response_queue {
            return Ok(());
        }

        let platform = self.platform();
        let deadline = platform.uptime_ms() + self.config.large_queue_drain_secs as u64 * 1000;
        loop {
            let value = self.regs.read32(RESPONSE_QUEUE_LARGE_REG);
            if value & DRAIN_COMPLETED_9550SX == DRAIN_COMPLETED_9550SX {
                platform.delay_ms(PCHIP_SETTLE_TIME_MS);
                return Ok(());
            }
            if platform.uptime_ms() >= deadline {
                return Err(DriverError::Timeout);
            }
            platform.delay_ms(1);
        }
    }

    // Throw away stale responses.
    fn drain_response_queue(&self) -> Result<()> {
        for _ in 0..MAX_RESPONSE_DRAIN {
            let status = self.read_status();
            self.check_status(status)?;
            if status.contains(Status::RESPONSE_QUEUE_EMPTY) {
                return Ok(());
            }
            self.regs.read32(RESPONSE_QUEUE_REG);
        }
        Err(DriverError::Timeout)
    }

    /// Wait until every bit in `flags` is set.
    pub(crate) fn poll_status(&self, flags: Status, timeout_secs: u32) -> Result<()> {
        self.poll_status_until(timeout_secs, |status| status.contains(flags))
    }

    /// Wait until every bit in `flags` is clear.
    pub(crate) fn poll_status_gone(&self, flags: Status, timeout_secs: u32) -> Result<()> {
        self.poll_status_until(timeout_secs, |status| !status.intersects(flags))
    }

    fn poll_status_until(&self, timeout_secs: u32, done: impl Fn(Status) -> bool) -> Result<()> {
        let platform = self.platform();
        let deadline = platform.uptime_ms() + timeout_secs as u64 * 1000;
        loop {
            let status = self.read_status();
            self.check_status(status)?;
            if done(status) {
                return Ok(());
            }
            if platform.uptime_ms() >= deadline {
                return Err(DriverError::Timeout);
            }
            platform.delay_ms(POLL_INTERVAL_MS);
        }
    }

    /// Wait for the response to synchronous request `id`.
    ///
    /// Interrupts must be disabled; any other response is a protocol error.
    pub(crate) fn poll_response(&self, id: usize, timeout_secs: u32) -> Result<()> {
        debug_assert_eq!(self.pool.state(id), RequestState::Posted);

        self.poll_status_gone(Status::RESPONSE_QUEUE_EMPTY, timeout_secs)?;

        let response = resid_out(self.regs.read32(RESPONSE_QUEUE_REG));
        if response != id {
            log::error!(
                "twa{}: Unexpected request ID {} while polling for response to {}",
                self.minor,
                response,
                id
            );
            return Err(DriverError::Io);
        }

        self.stats.dec_posted();
        self.pool
            .compare_and_set(id, RequestState::Posted, RequestState::Completed)
            .map_err(|_| DriverError::InvalidState)?;

        let mut data = self.pool.lock(id);
        let packet = data.packet();
        if packet.status() != 0 {
            let error = self.report_sense_error(&packet.header);
            if error != 0 {
                return Err(DriverError::CommandFailed(error));
            }
        }
        Ok(())
    }

    /// Open or close the firmware connection. A runtime connection
    /// negotiates `version` and returns the controller's result word.
    pub(crate) fn init_connection(&self, credits: u16, version: Option<FirmwareVersion>) -> Result<u32> {
        let id = self.begin_request(None);
        let result = self.run_init_connection(id, credits, version);
        self.end_request(id);
        result
    }

    fn run_init_connection(&self, id: usize, credits: u16, version: Option<FirmwareVersion>) -> Result<u32> {
        let mut features = 0;
        if cfg!(target_pointer_width = "64") {
            features |= FEATURE_64BIT_DMA;
        }
        if credits == CONNECTION_RUN {
            features |= EXTENDED_INIT_CONNECT;
        }
        let extended = features & EXTENDED_INIT_CONNECT != 0;

        {
            let mut data = self.pool.lock(id);
            let packet = data.packet();
            packet.clear();
            packet.header.prepare();
            let cmd = packet.init_mut();
            cmd.opcode = OP_INIT_CONNECTION;
            cmd.request_id = id as u8;
            cmd.set_message_credits(credits);
            cmd.set_features(features);
            if extended {
                let version = version.unwrap_or_default();
                cmd.size = INIT_COMMAND_PACKET_SIZE_EXTENDED;
                cmd.set_firmware(version.srl, ARCH_ID_9000, version.branch, version.build);
            } else {
                cmd.size = INIT_COMMAND_PACKET_SIZE;
            }
        }

        if let Err(err) = self.post_sync(id) {
            log::error!("twa{}: Failed to send init connection request: {}", self.minor, err);
            return Err(err);
        }
        if let Err(err) = self.poll_response(id, self.config.poll_timeout_secs) {
            log::error!("twa{}: No valid response during init connection: {}", self.minor, err);
            return Err(err);
        }

        if !extended {
            return Ok(0);
        }
        let mut data = self.pool.lock(id);
        let cmd = data.packet().init();
        let (srl, _arch, branch, build) = cmd.firmware();
        let result = cmd.result();
        self.compat.write().firmware = FirmwareVersion::new(srl, branch, build);
        Ok(result)
    }

    // Negotiate at the newest version the driver knows, then the oldest.
    fn check_compat(&self) -> Result<()> {
        let compat = self.compat_info();
        for version in [compat.max, compat.min] {
            let result = self.init_connection(CONNECTION_RUN, Some(version)).map_err(|err| {
                log::error!("twa{}: Connection failed while checking firmware: {}", self.minor, err);
                err
            })?;
            if result & CTLR_FW_COMPATIBLE != 0 {
                self.compat.write().working = version;
                return Ok(());
            }
        }

        Err(DriverError::Incompatible)
    }

    /// Synchronously read and log every queued AEN. After a reset the
    /// firmware's own soft-reset event is expected and not reported.
    pub(crate) fn drain_aen_queue(&self, did_reset: bool) -> Result<()> {
        let id = self.begin_request(None);
        let result = self.run_aen_drain(id, did_reset);
        self.end_request(id);
        result
    }

    fn run_aen_drain(&self, id: usize, did_reset: bool) -> Result<()> {
        let mut did_reset = did_reset;
        let mut count = 0;

        while count < MAX_AEN_DRAIN {
            {
                let mut data = self.pool.lock(id);
                let outcome = self.execute_sense_request(id, &mut data).map_err(|err| {
                    log::error!("twa{}: Error executing sense request: {}", self.minor, err);
                    err
                })?;
                drop(data);
                self.require_posted(id, outcome)?;
            }

            self.poll_response(id, self.config.poll_timeout_secs).map_err(|err| {
                log::error!("twa{}: No valid response draining AEN queue: {}", self.minor, err);
                err
            })?;

            let mut data = self.pool.lock(id);
            let header = &data.packet().header;
            let aen = header.error();
            if aen == AEN_QUEUE_EMPTY {
                if did_reset {
                    log::error!("twa{}: Missing reset event!", self.minor);
                }
                return Ok(());
            }
            count += 1;

            if aen == AEN_SOFT_RESET && did_reset {
                did_reset = false;
            } else if aen != AEN_SYNC_TIME_WITH_HOST {
                self.report_aen(header);
            }
        }

        log::error!("twa{}: AEN queue did not drain after {} events", self.minor, count);
        Err(DriverError::Io)
    }
}
