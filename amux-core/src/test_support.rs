//! In-memory device doubles for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::AmuxError;
use crate::models::params::{default_boundary, Frames, HwParams, SwParams};
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::models::state::{Direction, OpenMode, PcmState};
use crate::traits::pcm_device::{DeviceLibrary, MmapWindow, PcmDevice};

/// Playback-style ring: `avail = ring_frames - (appl - hw)`.
#[derive(Debug)]
pub struct FakeDevice {
    name: String,
    ring: Vec<u8>,
    ring_frames: Frames,
    appl_ptr: Frames,
    hw_ptr: Frames,
    state: PcmState,
    avail_override: Option<Frames>,
    buffer_override: Option<Frames>,
    fds: Vec<PollDescriptor>,
    pub prepare_count: usize,
}

impl FakeDevice {
    pub fn new(name: &str, ring_frames: Frames, frame_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            ring: vec![0; ring_frames as usize * frame_bytes],
            ring_frames,
            appl_ptr: 0,
            hw_ptr: 0,
            state: PcmState::Setup,
            avail_override: None,
            buffer_override: None,
            fds: Vec::new(),
            prepare_count: 0,
        }
    }

    pub fn with_fds(mut self, fds: &[i32]) -> Self {
        self.fds = fds
            .iter()
            .map(|&fd| PollDescriptor::new(fd, PollEvents::IN))
            .collect();
        self
    }

    pub fn set_appl_ptr(&mut self, frames: Frames) {
        self.appl_ptr = frames;
        self.hw_ptr = frames;
    }

    pub fn appl_ptr(&self) -> Frames {
        self.appl_ptr
    }

    pub fn consume(&mut self, frames: Frames) {
        self.hw_ptr = (self.hw_ptr + frames).min(self.appl_ptr);
    }

    pub fn set_avail_override(&mut self, avail: Option<Frames>) {
        self.avail_override = avail;
    }

    pub fn set_state(&mut self, state: PcmState) {
        self.state = state;
    }

    pub fn ring(&self) -> &[u8] {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut [u8] {
        &mut self.ring
    }
}

impl PcmDevice for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn hw_params(&mut self, requested: &HwParams) -> Result<HwParams, AmuxError> {
        let mut installed = *requested;
        if let Some(buffer) = self.buffer_override {
            installed.buffer_size = buffer;
        }
        self.state = PcmState::Setup;
        Ok(installed)
    }

    fn sw_params(&mut self, params: &SwParams) -> Result<Frames, AmuxError> {
        if params.boundary != 0 {
            return Ok(params.boundary);
        }
        Ok(default_boundary(self.ring_frames))
    }

    fn prepare(&mut self) -> Result<(), AmuxError> {
        self.appl_ptr = 0;
        self.hw_ptr = 0;
        self.state = PcmState::Prepared;
        self.prepare_count += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AmuxError> {
        self.state = PcmState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AmuxError> {
        self.state = PcmState::Setup;
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn avail_update(&mut self) -> Result<Frames, AmuxError> {
        if let Some(avail) = self.avail_override {
            return Ok(avail);
        }
        Ok(self.ring_frames.saturating_sub(self.appl_ptr - self.hw_ptr))
    }

    fn mmap_begin(&mut self, frames: Frames) -> Result<MmapWindow, AmuxError> {
        let offset = self.appl_ptr % self.ring_frames;
        Ok(MmapWindow {
            offset,
            frames: frames.min(self.ring_frames - offset),
        })
    }

    fn mmap_buffer(&mut self) -> &mut [u8] {
        &mut self.ring
    }

    fn mmap_commit(&mut self, window: MmapWindow) -> Result<Frames, AmuxError> {
        self.appl_ptr += window.frames;
        Ok(window.frames)
    }

    fn poll_descriptors(&self) -> Vec<PollDescriptor> {
        self.fds.clone()
    }

    fn poll_revents(&self, fds: &[PollDescriptor]) -> Result<PollEvents, AmuxError> {
        let ready = fds
            .iter()
            .any(|pfd| pfd.revents.intersects(PollEvents::IN | PollEvents::OUT));
        Ok(if ready { PollEvents::OUT } else { PollEvents::EMPTY })
    }
}

/// Per-identifier behaviour of [`FakeLibrary`].
#[derive(Debug, Clone, Default)]
pub struct FakeSpec {
    pub ring_frames: Frames,
    pub frame_bytes: usize,
    /// Installed buffer size, overriding the requested one.
    pub buffer_override: Option<Frames>,
    pub fail_open: bool,
}

#[derive(Debug, Default)]
pub struct FakeLibrary {
    specs: Mutex<HashMap<String, FakeSpec>>,
    opens: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, spec: FakeSpec) {
        self.specs.lock().insert(id.to_string(), spec);
    }

    pub fn open_count(&self, id: &str) -> usize {
        self.opens.lock().get(id).copied().unwrap_or(0)
    }
}

impl DeviceLibrary for FakeLibrary {
    fn open(
        &self,
        id: &str,
        _direction: Direction,
        _mode: OpenMode,
    ) -> Result<Box<dyn PcmDevice>, AmuxError> {
        let spec = self.specs.lock().get(id).cloned().ok_or_else(|| AmuxError::DeviceOpen {
            id: id.to_string(),
            reason: "no such device".into(),
        })?;
        if spec.fail_open {
            return Err(AmuxError::DeviceOpen {
                id: id.to_string(),
                reason: "busy".into(),
            });
        }
        *self.opens.lock().entry(id.to_string()).or_insert(0) += 1;

        let mut device = FakeDevice::new(id, spec.ring_frames, spec.frame_bytes);
        device.buffer_override = spec.buffer_override;
        Ok(Box::new(device))
    }
}
