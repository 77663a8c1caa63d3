//! Virtual PCM handle.
//!
//! The ring lives in shared state so a [`crate::VirtualHandle`] can play the
//! hardware side: consume playback frames, produce capture frames, inject an
//! xrun or pull the device away. The handle itself works on a private mirror
//! of the ring that is synchronised on `mmap_begin` / `mmap_commit`.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use amux_core::models::error::AmuxError;
use amux_core::models::params::{default_boundary, Frames, HwParams, SwParams, BOUNDARY_LIMIT};
use amux_core::models::poll::{PollDescriptor, PollEvents};
use amux_core::models::state::{Direction, PcmState};
use amux_core::poller::sys::EventFd;
use amux_core::traits::pcm_device::{MmapWindow, PcmDevice};

use crate::caps::DeviceCaps;

#[derive(Debug)]
pub(crate) struct PcmInner {
    pub(crate) state: PcmState,
    pub(crate) hw: Option<HwParams>,
    pub(crate) ring: Vec<u8>,
    pub(crate) appl_ptr: Frames,
    pub(crate) hw_ptr: Frames,
    pub(crate) boundary: Frames,
    pub(crate) avail_min: Frames,
    pub(crate) avail_override: Option<Frames>,
}

impl PcmInner {
    fn buffer_size(&self) -> Frames {
        self.hw.map(|hw| hw.buffer_size).unwrap_or(0)
    }

    fn frame_bytes(&self) -> usize {
        self.hw.map(|hw| hw.frame_bytes()).unwrap_or(0)
    }

    pub(crate) fn avail(&self, direction: Direction) -> Frames {
        if let Some(avail) = self.avail_override {
            return avail;
        }
        let queued = self.appl_ptr.saturating_sub(self.hw_ptr);
        match direction {
            Direction::Playback => self.buffer_size().saturating_sub(queued),
            Direction::Capture => self.hw_ptr.saturating_sub(self.appl_ptr),
        }
    }

    fn ready(&self, direction: Direction) -> bool {
        match self.state {
            PcmState::Xrun | PcmState::Disconnected => true,
            PcmState::Prepared | PcmState::Running => self.avail(direction) >= self.avail_min.max(1),
            _ => false,
        }
    }
}

/// State shared between an open handle and its test-side controller.
#[derive(Debug)]
pub(crate) struct PcmShared {
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) inner: Mutex<PcmInner>,
    events: Vec<EventFd>,
}

impl PcmShared {
    pub(crate) fn new(name: &str, direction: Direction, descriptors: usize) -> Result<Self, AmuxError> {
        let events = (0..descriptors)
            .map(|_| EventFd::new(false))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AmuxError::DeviceOpen {
                id: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            direction,
            inner: Mutex::new(PcmInner {
                state: PcmState::Open,
                hw: None,
                ring: Vec::new(),
                appl_ptr: 0,
                hw_ptr: 0,
                boundary: 0,
                avail_min: 1,
                avail_override: None,
            }),
            events,
        })
    }

    /// Mirror readiness onto the poll descriptors. Call with the lock held.
    pub(crate) fn update_events(&self, inner: &PcmInner) {
        let ready = inner.ready(self.direction);
        for efd in &self.events {
            let result = if ready { efd.set() } else { efd.clear() };
            if let Err(e) = result {
                log::error!("{}: cannot update poll descriptor: {}", self.name, e);
            }
        }
    }
}

/// One open virtual PCM. Dropping it closes the device.
pub struct VirtualPcm {
    shared: Arc<PcmShared>,
    caps: DeviceCaps,
    mirror: Vec<u8>,
}

impl VirtualPcm {
    pub(crate) fn new(shared: Arc<PcmShared>, caps: DeviceCaps) -> Self {
        Self {
            shared,
            caps,
            mirror: Vec::new(),
        }
    }

    /// Byte range of `window` inside the ring, checked against its length.
    fn byte_range(&self, inner: &PcmInner, window: &MmapWindow) -> Result<(usize, usize), AmuxError> {
        let fb = inner.frame_bytes();
        let to_bytes = |n: Frames| usize::try_from(n).ok().and_then(|n| n.checked_mul(fb));
        to_bytes(window.offset)
            .zip(to_bytes(window.frames))
            .and_then(|(start, len)| Some((start, start.checked_add(len)?)))
            .filter(|&(_, end)| end <= inner.ring.len() && end <= self.mirror.len())
            .ok_or_else(|| {
                AmuxError::Device(format!(
                    "{}: window {:?} outside the ring",
                    self.shared.name, window
                ))
            })
    }
}

impl PcmDevice for VirtualPcm {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn hw_params(&mut self, requested: &HwParams) -> Result<HwParams, AmuxError> {
        let mut inner = self.shared.inner.lock();
        if !matches!(inner.state, PcmState::Open | PcmState::Setup | PcmState::Prepared) {
            return Err(AmuxError::BadState(inner.state));
        }

        let installed = self.caps.refine(&self.shared.name, requested)?;
        let bytes = installed.buffer_size as usize * installed.frame_bytes();
        inner.ring = vec![installed.format.silence(); bytes];
        self.mirror = inner.ring.clone();
        inner.hw = Some(installed);
        inner.boundary = default_boundary(installed.buffer_size);
        inner.avail_min = installed.period_size;
        inner.state = PcmState::Setup;
        self.shared.update_events(&inner);
        log::debug!(
            "{}: {:?} {}ch {}Hz buffer {} period {}",
            self.shared.name,
            installed.format,
            installed.channels,
            installed.rate,
            installed.buffer_size,
            installed.period_size
        );
        Ok(installed)
    }

    fn sw_params(&mut self, params: &SwParams) -> Result<Frames, AmuxError> {
        let mut inner = self.shared.inner.lock();
        let Some(hw) = inner.hw else {
            return Err(AmuxError::BadState(inner.state));
        };
        if params.boundary != 0 {
            if params.boundary % hw.buffer_size != 0 || params.boundary > BOUNDARY_LIMIT {
                return Err(AmuxError::Params(format!(
                    "boundary {} is not a multiple of buffer size {} up to {}",
                    params.boundary, hw.buffer_size, BOUNDARY_LIMIT
                )));
            }
            inner.boundary = params.boundary;
        }
        inner.avail_min = if params.avail_min == 0 {
            hw.period_size
        } else {
            params.avail_min
        };
        self.shared.update_events(&inner);
        Ok(inner.boundary)
    }

    fn prepare(&mut self) -> Result<(), AmuxError> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            PcmState::Disconnected => return Err(AmuxError::Disconnected),
            PcmState::Open | PcmState::Closed => return Err(AmuxError::BadState(inner.state)),
            _ => {}
        }
        inner.appl_ptr = 0;
        inner.hw_ptr = 0;
        inner.state = PcmState::Prepared;
        self.shared.update_events(&inner);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AmuxError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != PcmState::Prepared {
            return Err(AmuxError::BadState(inner.state));
        }
        inner.state = PcmState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AmuxError> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            PcmState::Disconnected => return Err(AmuxError::Disconnected),
            PcmState::Prepared | PcmState::Running | PcmState::Xrun => {
                inner.state = PcmState::Setup;
                inner.hw_ptr = inner.appl_ptr;
            }
            _ => {}
        }
        self.shared.update_events(&inner);
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.shared.inner.lock().state
    }

    fn avail_update(&mut self) -> Result<Frames, AmuxError> {
        let inner = self.shared.inner.lock();
        match inner.state {
            PcmState::Disconnected => Err(AmuxError::Disconnected),
            PcmState::Xrun => Err(AmuxError::Xrun),
            _ => Ok(inner.avail(self.shared.direction)),
        }
    }

    fn mmap_begin(&mut self, frames: Frames) -> Result<MmapWindow, AmuxError> {
        let inner = self.shared.inner.lock();
        let buffer = inner.buffer_size();
        if buffer == 0 {
            return Err(AmuxError::BadState(inner.state));
        }

        let offset = inner.appl_ptr % buffer;
        let window = MmapWindow {
            offset,
            frames: frames
                .min(buffer - offset)
                .min(inner.avail(self.shared.direction)),
        };

        if self.shared.direction == Direction::Capture {
            let (start, end) = self.byte_range(&inner, &window)?;
            self.mirror[start..end].copy_from_slice(&inner.ring[start..end]);
        }
        Ok(window)
    }

    fn mmap_buffer(&mut self) -> &mut [u8] {
        &mut self.mirror
    }

    fn mmap_commit(&mut self, window: MmapWindow) -> Result<Frames, AmuxError> {
        let mut inner = self.shared.inner.lock();
        if inner.state == PcmState::Disconnected {
            return Err(AmuxError::Disconnected);
        }
        if window.offset != inner.appl_ptr % inner.buffer_size().max(1) {
            return Err(AmuxError::Device(format!(
                "{}: commit at {} does not match application pointer",
                self.shared.name, window.offset
            )));
        }

        if self.shared.direction == Direction::Playback {
            let (start, end) = self.byte_range(&inner, &window)?;
            inner.ring[start..end].copy_from_slice(&self.mirror[start..end]);
        }
        inner.appl_ptr += window.frames;
        self.shared.update_events(&inner);
        Ok(window.frames)
    }

    fn poll_descriptors(&self) -> Vec<PollDescriptor> {
        self.shared
            .events
            .iter()
            .map(|efd| PollDescriptor::new(efd.as_raw_fd(), PollEvents::IN))
            .collect()
    }

    fn poll_revents(&self, fds: &[PollDescriptor]) -> Result<PollEvents, AmuxError> {
        let ours: Vec<_> = self.shared.events.iter().map(|e| e.as_raw_fd()).collect();
        let woken = fds
            .iter()
            .filter(|pfd| ours.contains(&pfd.fd))
            .any(|pfd| pfd.revents.contains(PollEvents::IN));
        if !woken {
            return Ok(PollEvents::EMPTY);
        }

        let inner = self.shared.inner.lock();
        Ok(match inner.state {
            PcmState::Xrun => PollEvents::ERR,
            PcmState::Disconnected => PollEvents::ERR | PollEvents::HUP,
            _ => match self.shared.direction {
                Direction::Playback => PollEvents::OUT,
                Direction::Capture => PollEvents::IN,
            },
        })
    }
}

impl Drop for VirtualPcm {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != PcmState::Disconnected {
            inner.state = PcmState::Closed;
        }
        log::debug!("{}: closed", self.shared.name);
    }
}
