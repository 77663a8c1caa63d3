use std::sync::Arc;

use crate::models::config::AmuxConfig;
use crate::models::error::AmuxError;
use crate::models::params::{Frames, HwParams, SwParams};
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::models::state::{Direction, OpenMode, PcmState};
use crate::poller::registry::PollerRegistry;
use crate::processing::position::BufferSync;
use crate::processing::transfer::TransferBuffer;
use crate::session::device::DeviceManager;
use crate::storage::selector_store::SelectorStore;
use crate::traits::io_plugin::PcmIoPlugin;
use crate::traits::pcm_device::DeviceLibrary;
use crate::traits::poller::Poller;

/// The stable stream a host holds.
///
/// Wraps a hot-swappable slave: the selector is checked lazily from the
/// pointer, descriptor and transfer paths, and a change swaps the slave
/// underneath while the caller-visible geometry and poll descriptors stay
/// the same.
///
/// ```text
/// host ──► TransportSession ──► BufferSync ──► active PcmDevice
///                │                                  ▲
///                ├── DeviceManager ── swap ─────────┘
///                │        ▲
///                │        └── SelectorStore (file + flock)
///                └── Poller (dupfd | epoller | thread)
/// ```
pub struct TransportSession {
    // Dropped before the devices: the thread poller's worker may be waiting
    // on the active device's descriptors.
    poller: Box<dyn Poller>,
    devices: DeviceManager,
    sync: Option<BufferSync>,
}

impl TransportSession {
    /// Open a stream using the process-wide poller registry.
    pub fn open(
        config: AmuxConfig,
        library: Arc<dyn DeviceLibrary>,
        direction: Direction,
        mode: OpenMode,
    ) -> Result<Self, AmuxError> {
        Self::open_with_registry(config, library, PollerRegistry::global(), direction, mode)
    }

    pub fn open_with_registry(
        config: AmuxConfig,
        library: Arc<dyn DeviceLibrary>,
        registry: &PollerRegistry,
        direction: Direction,
        mode: OpenMode,
    ) -> Result<Self, AmuxError> {
        config.validate()?;
        let mut poller = registry.create(&config.poller)?;
        let store = SelectorStore::open(&config.file)?;
        log::info!(
            "opening {:?} stream, selector {}, {} poller",
            direction,
            config.file.display(),
            poller.name()
        );

        let mut devices = DeviceManager::new(library, store, config, direction, mode);
        devices.open_initial(poller.as_mut())?;

        Ok(Self {
            poller,
            devices,
            sync: None,
        })
    }

    /// DISCONNECTED when there is no usable device, else the device state.
    pub fn state(&mut self) -> PcmState {
        match self.devices.require() {
            Ok(session) => session.state(),
            Err(_) => PcmState::Disconnected,
        }
    }

    pub fn disconnected(&mut self) -> bool {
        self.devices.disconnected()
    }

    pub fn active_device(&self) -> Option<&str> {
        self.devices.active_id()
    }

    pub fn generation(&self) -> u64 {
        self.devices.generation()
    }

    pub fn direction(&self) -> Direction {
        self.devices.direction()
    }

    /// Caller-side pointer bookkeeping, present once software params are set.
    pub fn buffer_sync(&self) -> Option<&BufferSync> {
        self.sync.as_ref()
    }

    fn refresh(&mut self) {
        self.devices.refresh(self.poller.as_mut());
    }

    fn rebind_poller(&mut self) -> Result<(), AmuxError> {
        if self.devices.hw_params().is_none() {
            return Ok(());
        }
        let mut slave = self.devices.slave_context()?;
        self.poller.set_slave(&mut slave)
    }
}

fn unconfigured() -> AmuxError {
    AmuxError::Config("stream parameters not configured".into())
}

impl PcmIoPlugin for TransportSession {
    fn close(self) -> Result<(), AmuxError> {
        log::debug!("close: {}", self.active_device().unwrap_or("<none>"));
        Ok(())
    }

    fn start(&mut self) -> Result<(), AmuxError> {
        log::debug!("start");
        self.devices.require()?.device().start()
    }

    fn stop(&mut self) -> Result<(), AmuxError> {
        log::debug!("stop");
        match self.devices.require() {
            Ok(session) => session.device().stop(),
            Err(AmuxError::NoDevice) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn prepare(&mut self) -> Result<(), AmuxError> {
        log::debug!("prepare");
        self.devices.require()?.device().prepare()?;
        if let Some(sync) = self.sync.as_mut() {
            sync.reset();
        }
        self.rebind_poller()
    }

    fn configure_hw(&mut self, params: &HwParams) -> Result<HwParams, AmuxError> {
        log::debug!("configure_hw: {:?}", params);
        let refined = self.devices.negotiate(params)?;
        self.sync = None;
        Ok(refined)
    }

    fn configure_sw(&mut self, params: &SwParams) -> Result<Frames, AmuxError> {
        log::debug!("configure_sw: {:?}", params);
        let geometry = self.devices.configure_sw(params)?;
        let frame_bytes = self
            .devices
            .hw_params()
            .map(HwParams::frame_bytes)
            .ok_or_else(|| AmuxError::Config("hardware parameters not configured".into()))?;

        self.sync = Some(BufferSync::new(self.devices.direction(), geometry, frame_bytes));
        Ok(geometry.boundary)
    }

    fn query_pointer(&mut self) -> Result<Frames, AmuxError> {
        log::debug!("query_pointer");
        self.refresh();
        let session = self.devices.require()?;
        let sync = self.sync.as_mut().ok_or_else(unconfigured)?;
        sync.pointer(session.device())
    }

    fn transfer(
        &mut self,
        areas: TransferBuffer<'_>,
        offset: Frames,
        size: Frames,
    ) -> Result<Frames, AmuxError> {
        log::debug!("transfer: {} frames at {}", size, offset);
        self.refresh();
        let session = self.devices.require()?;
        let sync = self.sync.as_mut().ok_or_else(unconfigured)?;
        let frames = sync.transfer(session.device(), areas, offset, size)?;

        let mut slave = self.devices.slave_context()?;
        self.poller.transfer_done(&mut slave)?;
        Ok(frames)
    }

    fn poll_descriptor_count(&self) -> usize {
        self.poller.descriptors_count()
    }

    fn poll_descriptors(&mut self) -> Result<Vec<PollDescriptor>, AmuxError> {
        log::debug!("poll_descriptors");
        self.refresh();

        let session = self.devices.require()?;
        let device = session.device();
        let state = device.state();
        if matches!(state, PcmState::Xrun | PcmState::Prepared) {
            if state == PcmState::Xrun {
                log::warn!("{}: recovering from xrun", device.name());
            }
            device.prepare()?;
            device.start()?;
        }
        let state = device.state();
        if !state.is_running() {
            return Err(AmuxError::BadState(state));
        }

        let mut pfds = vec![PollDescriptor::new(-1, PollEvents::EMPTY); self.poller.descriptors_count()];
        self.poller.descriptors(&mut pfds)?;
        Ok(pfds)
    }

    fn poll_revents(&mut self, handles: &[PollDescriptor]) -> Result<PollEvents, AmuxError> {
        self.refresh();
        let mut slave = self.devices.slave_context()?;
        let revents = self.poller.poll_revents(&mut slave, handles)?;
        log::trace!("poll_revents: {:?}", revents);
        Ok(revents)
    }
}
