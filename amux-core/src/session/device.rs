use std::sync::Arc;

use crate::models::config::AmuxConfig;
use crate::models::error::AmuxError;
use crate::models::params::{Frames, Geometry, HwParams, SwParams};
use crate::models::state::{Direction, OpenMode, PcmState};
use crate::storage::selector_store::{SelectorRead, SelectorStore};
use crate::traits::pcm_device::{DeviceLibrary, PcmDevice};
use crate::traits::poller::{Poller, SlaveContext};

/// Outcome of one selector poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorCheck {
    Unchanged,
    Changed(String),
    /// The store could not be read without waiting. Handled as `Unchanged`.
    Indeterminate,
}

/// The active device binding.
pub struct DeviceSession {
    id: String,
    device: Box<dyn PcmDevice>,
    generation: u64,
}

impl DeviceSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&mut self) -> &mut dyn PcmDevice {
        self.device.as_mut()
    }

    pub fn state(&self) -> PcmState {
        self.device.state()
    }
}

/// Owns the slave device and runs the hot-swap protocol.
///
/// The negotiated caller-side parameters live here so that every newly
/// opened device can be configured to the same fixed geometry.
pub struct DeviceManager {
    library: Arc<dyn DeviceLibrary>,
    store: SelectorStore,
    config: AmuxConfig,
    direction: Direction,
    mode: OpenMode,
    active: Option<DeviceSession>,
    generation: u64,
    hw: Option<HwParams>,
    sw: Option<SwParams>,
    geometry: Option<Geometry>,
}

impl DeviceManager {
    pub fn new(
        library: Arc<dyn DeviceLibrary>,
        store: SelectorStore,
        config: AmuxConfig,
        direction: Direction,
        mode: OpenMode,
    ) -> Self {
        Self {
            library,
            store,
            config,
            direction,
            mode,
            active: None,
            generation: 0,
            hw: None,
            sw: None,
            geometry: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.id.as_str())
    }

    /// Number of successful device bindings so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hw_params(&self) -> Option<&HwParams> {
        self.hw.as_ref()
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Compare the selector with the active device. Never blocks.
    pub fn check_selector(&self) -> SelectorCheck {
        let token = match self.store.read() {
            Ok(SelectorRead::Token(token)) => token,
            Ok(SelectorRead::Empty) => return SelectorCheck::Unchanged,
            Ok(SelectorRead::Busy) => return SelectorCheck::Indeterminate,
            Err(e) => {
                log::warn!("selector {} unreadable: {}", self.store.path().display(), e);
                return SelectorCheck::Indeterminate;
            }
        };

        let id = self.config.resolve_token(&token);
        match &self.active {
            Some(session) if session.id == id => SelectorCheck::Unchanged,
            _ => SelectorCheck::Changed(id.to_string()),
        }
    }

    /// Bind to the device the selector names, if any. A failure here fails
    /// the stream open.
    pub fn open_initial(&mut self, poller: &mut dyn Poller) -> Result<(), AmuxError> {
        match self.check_selector() {
            SelectorCheck::Changed(id) => self.swap(&id, poller),
            _ => {
                log::warn!(
                    "no device selected in {}, starting without one",
                    self.store.path().display()
                );
                Ok(())
            }
        }
    }

    /// Swap to the selected device when the selector changed.
    ///
    /// A failed swap leaves no active device; data-path operations then fail
    /// with `NoDevice` and the next check retries.
    pub fn refresh(&mut self, poller: &mut dyn Poller) {
        if let SelectorCheck::Changed(id) = self.check_selector() {
            if let Err(e) = self.swap(&id, poller) {
                log::error!("swap to {} failed: {}", id, e);
            }
        }
    }

    /// Replace the active device with `id`.
    pub fn swap(&mut self, id: &str, poller: &mut dyn Poller) -> Result<(), AmuxError> {
        log::info!(
            "swapping device {} -> {}",
            self.active_id().unwrap_or("<none>"),
            id
        );

        if let Some(old) = self.active.take() {
            Self::teardown(old);
        }

        let mut device = self.library.open(id, self.direction, self.mode)?;
        self.configure(device.as_mut())?;

        let generation = self.generation + 1;
        if let Some(hw) = &self.hw {
            let mut slave = SlaveContext {
                device: device.as_mut(),
                generation,
                period_size: hw.period_size,
            };
            poller.set_slave(&mut slave)?;
        }

        self.generation = generation;
        self.active = Some(DeviceSession {
            id: id.to_string(),
            device,
            generation,
        });
        log::info!("device {} active (generation {})", id, generation);
        Ok(())
    }

    fn teardown(mut old: DeviceSession) {
        log::debug!("closing device {}", old.id);
        if let Err(e) = old.device.stop() {
            log::warn!("stopping {} failed: {}", old.id, e);
        }
    }

    /// Re-derive slave parameters from the fixed caller geometry, then
    /// prepare.
    fn configure(&self, device: &mut dyn PcmDevice) -> Result<(), AmuxError> {
        let Some(hw) = self.hw else {
            return Ok(());
        };

        let installed = install_hw(device, &hw, self.config.force_resample)?;
        if installed.buffer_size != hw.buffer_size || installed.period_size != hw.period_size {
            log::warn!(
                "{}: geometry {}/{} does not match stream {}/{}",
                device.name(),
                installed.buffer_size,
                installed.period_size,
                hw.buffer_size,
                hw.period_size
            );
            return Err(AmuxError::Params(format!(
                "{} cannot provide buffer {} / period {}",
                device.name(),
                hw.buffer_size,
                hw.period_size
            )));
        }

        if let (Some(sw), Some(geometry)) = (self.sw, self.geometry) {
            let boundary = device.sw_params(&SwParams {
                boundary: geometry.boundary,
                ..sw
            })?;
            if boundary != geometry.boundary {
                log::debug!(
                    "{}: keeping stream boundary {} over device boundary {}",
                    device.name(),
                    geometry.boundary,
                    boundary
                );
            }
        }

        device.prepare()
    }

    /// Negotiate hardware parameters against the active device.
    ///
    /// Returns the caller-side parameters: the caller's access mode with the
    /// device's achieved buffer and period sizes.
    pub fn negotiate(&mut self, params: &HwParams) -> Result<HwParams, AmuxError> {
        params.validate()?;
        let force_resample = self.config.force_resample;
        let session = self.require()?;
        let installed = install_hw(session.device.as_mut(), params, force_resample)?;

        let refined = HwParams {
            access: params.access,
            buffer_size: installed.buffer_size,
            period_size: installed.period_size,
            rate_resample: installed.rate_resample,
            ..*params
        };
        refined.validate()?;

        self.hw = Some(refined);
        self.sw = None;
        self.geometry = None;
        Ok(refined)
    }

    /// Forward software parameters and fix the wraparound boundary.
    pub fn configure_sw(&mut self, params: &SwParams) -> Result<Geometry, AmuxError> {
        let hw = self
            .hw
            .ok_or_else(|| AmuxError::Config("hardware parameters not configured".into()))?;
        let fixed = self.geometry.map(|g| g.boundary);
        if fixed.is_none() && params.boundary != 0 {
            Geometry::new(hw.buffer_size, hw.period_size, params.boundary)?;
        }
        let request = SwParams {
            boundary: fixed.unwrap_or(params.boundary),
            ..*params
        };

        let session = self.require()?;
        let reported = session.device.sw_params(&request)?;
        let geometry = Geometry::new(hw.buffer_size, hw.period_size, fixed.unwrap_or(reported))?;

        self.sw = Some(SwParams {
            boundary: geometry.boundary,
            ..request
        });
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// The active session, closing it first if its device is gone.
    pub fn require(&mut self) -> Result<&mut DeviceSession, AmuxError> {
        match self.active.as_ref().map(DeviceSession::state) {
            None => Err(AmuxError::NoDevice),
            Some(state) if state.is_terminal() => {
                if let Some(dead) = self.active.take() {
                    log::warn!("device {} disconnected", dead.id);
                }
                Err(AmuxError::Disconnected)
            }
            Some(_) => self.active.as_mut().ok_or(AmuxError::NoDevice),
        }
    }

    /// Whether there is no usable device.
    pub fn disconnected(&mut self) -> bool {
        self.require().is_err()
    }

    /// Poller view of the active device.
    pub fn slave_context(&mut self) -> Result<SlaveContext<'_>, AmuxError> {
        let period_size: Frames = self
            .hw
            .map(|hw| hw.period_size)
            .ok_or_else(|| AmuxError::Config("hardware parameters not configured".into()))?;
        let session = self.require()?;
        Ok(SlaveContext {
            device: session.device.as_mut(),
            generation: session.generation,
            period_size,
        })
    }
}

/// Apply the slave-side request derived from `hw`, requiring exact access,
/// format, channel count and rate.
fn install_hw(device: &mut dyn PcmDevice, hw: &HwParams, force_resample: bool) -> Result<HwParams, AmuxError> {
    let request = hw.for_slave(force_resample);
    let installed = device.hw_params(&request)?;
    if installed.access != request.access
        || installed.format != request.format
        || installed.channels != request.channels
        || installed.rate != request.rate
    {
        return Err(AmuxError::Params(format!(
            "{} refused {:?} {}ch {}Hz",
            device.name(),
            request.format,
            request.channels,
            request.rate
        )));
    }
    Ok(installed)
}
