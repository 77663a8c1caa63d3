//! Registry of named virtual devices.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use amux_core::models::error::AmuxError;
use amux_core::models::params::Frames;
use amux_core::models::state::{Direction, OpenMode, PcmState};
use amux_core::traits::pcm_device::{DeviceLibrary, PcmDevice};

use crate::caps::DeviceCaps;
use crate::pcm::{PcmShared, VirtualPcm};

#[derive(Debug)]
struct DeviceEntry {
    caps: DeviceCaps,
    opens: usize,
    fail_open: bool,
    current: Weak<PcmShared>,
}

/// In-process device library.
///
/// Devices are registered by identifier; each `open` creates a fresh PCM
/// handle, and the [`VirtualHandle`] returned by [`VirtualLibrary::add_device`]
/// drives whichever handle is currently open for that identifier.
#[derive(Debug, Default)]
pub struct VirtualLibrary {
    devices: Mutex<HashMap<String, Arc<Mutex<DeviceEntry>>>>,
}

impl VirtualLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, replacing any previous registration.
    pub fn add_device(&self, id: &str, caps: DeviceCaps) -> VirtualHandle {
        let entry = Arc::new(Mutex::new(DeviceEntry {
            caps,
            opens: 0,
            fail_open: false,
            current: Weak::new(),
        }));
        self.devices.lock().insert(id.to_string(), Arc::clone(&entry));
        VirtualHandle { entry }
    }

    pub fn remove_device(&self, id: &str) -> bool {
        self.devices.lock().remove(id).is_some()
    }

    /// Registered identifiers, sorted.
    pub fn list_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn handle(&self, id: &str) -> Option<VirtualHandle> {
        self.devices
            .lock()
            .get(id)
            .map(|entry| VirtualHandle { entry: Arc::clone(entry) })
    }
}

impl DeviceLibrary for VirtualLibrary {
    fn open(
        &self,
        id: &str,
        direction: Direction,
        _mode: OpenMode,
    ) -> Result<Box<dyn PcmDevice>, AmuxError> {
        let entry = self
            .devices
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AmuxError::DeviceOpen {
                id: id.to_string(),
                reason: "no such device".into(),
            })?;

        let mut entry = entry.lock();
        if entry.fail_open {
            return Err(AmuxError::DeviceOpen {
                id: id.to_string(),
                reason: "device busy".into(),
            });
        }

        let shared = Arc::new(PcmShared::new(id, direction, entry.caps.descriptors)?);
        entry.current = Arc::downgrade(&shared);
        entry.opens += 1;
        log::debug!("{}: opened ({:?}, open #{})", id, direction, entry.opens);
        Ok(Box::new(VirtualPcm::new(shared, entry.caps.clone())))
    }
}

/// Hardware-side controller of one registered virtual device.
///
/// Operations apply to the currently open handle; with none open they do
/// nothing and queries return `None`.
#[derive(Debug, Clone)]
pub struct VirtualHandle {
    entry: Arc<Mutex<DeviceEntry>>,
}

impl VirtualHandle {
    fn current(&self) -> Option<Arc<PcmShared>> {
        self.entry.lock().current.upgrade()
    }

    fn with_open<R>(&self, f: impl FnOnce(&PcmShared, &mut crate::pcm::PcmInner) -> R) -> Option<R> {
        let shared = self.current()?;
        let mut inner = shared.inner.lock();
        if matches!(inner.state, PcmState::Closed) {
            return None;
        }
        let result = f(&shared, &mut inner);
        shared.update_events(&inner);
        Some(result)
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.entry.lock().opens
    }

    /// Make subsequent opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.entry.lock().fail_open = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state().is_some()
    }

    pub fn state(&self) -> Option<PcmState> {
        self.with_open(|_, inner| inner.state)
    }

    pub fn appl_ptr(&self) -> Option<Frames> {
        self.with_open(|_, inner| inner.appl_ptr)
    }

    pub fn hw_ptr(&self) -> Option<Frames> {
        self.with_open(|_, inner| inner.hw_ptr)
    }

    /// Frames the application side may transfer.
    pub fn avail(&self) -> Option<Frames> {
        self.with_open(|shared, inner| inner.avail(shared.direction))
    }

    /// Move the hardware pointer of a running device by `frames`.
    ///
    /// Playback consumes queued frames; consuming more than is queued is an
    /// underrun. Capture produces frames; producing more than fit is an
    /// overrun. Either way the device enters XRUN.
    pub fn advance(&self, frames: Frames) -> Option<PcmState> {
        self.with_open(|shared, inner| {
            if inner.state != PcmState::Running {
                return inner.state;
            }
            let buffer = inner.hw.map(|hw| hw.buffer_size).unwrap_or(0);
            match shared.direction {
                Direction::Playback => {
                    let queued = inner.appl_ptr - inner.hw_ptr;
                    if frames > queued {
                        inner.hw_ptr = inner.appl_ptr;
                        inner.state = PcmState::Xrun;
                        log::debug!("{}: underrun", shared.name);
                    } else {
                        inner.hw_ptr += frames;
                    }
                }
                Direction::Capture => {
                    inner.hw_ptr += frames;
                    if inner.hw_ptr - inner.appl_ptr > buffer {
                        inner.state = PcmState::Xrun;
                        log::debug!("{}: overrun", shared.name);
                    }
                }
            }
            inner.state
        })
    }

    /// Fill the capture ring at the hardware pointer.
    pub fn fill(&self, data: &[u8]) -> Option<()> {
        self.with_open(|_, inner| {
            let Some(hw) = inner.hw else {
                return;
            };
            let fb = hw.frame_bytes();
            let ring_len = inner.ring.len();
            if ring_len == 0 {
                return;
            }
            let start = (inner.hw_ptr % hw.buffer_size) as usize * fb;
            for (i, byte) in data.iter().enumerate() {
                inner.ring[(start + i) % ring_len] = *byte;
            }
        })
    }

    /// Bytes currently in the ring.
    pub fn ring(&self) -> Option<Vec<u8>> {
        self.with_open(|_, inner| inner.ring.clone())
    }

    /// Force an xrun.
    pub fn xrun(&self) -> Option<()> {
        self.with_open(|_, inner| inner.state = PcmState::Xrun)
    }

    /// The device goes away for good.
    pub fn disconnect(&self) -> Option<()> {
        self.with_open(|shared, inner| {
            log::debug!("{}: disconnected", shared.name);
            inner.state = PcmState::Disconnected;
        })
    }

    /// Report `avail` regardless of the pointers (`None` restores them).
    pub fn set_avail(&self, avail: Option<Frames>) -> Option<()> {
        self.with_open(|_, inner| inner.avail_override = avail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amux_core::models::params::{HwParams, SwParams};
    use amux_core::models::poll::PollEvents;
    use amux_core::poller::sys;
    use amux_core::traits::pcm_device::MmapWindow;

    fn configured(library: &VirtualLibrary, id: &str, direction: Direction) -> Box<dyn PcmDevice> {
        let mut pcm = library.open(id, direction, OpenMode::default()).unwrap();
        pcm.hw_params(&HwParams::default()).unwrap();
        pcm.sw_params(&SwParams::default()).unwrap();
        pcm.prepare().unwrap();
        pcm
    }

    #[test]
    fn unknown_device_fails_to_open() {
        let library = VirtualLibrary::new();
        assert!(matches!(
            library.open("ghost", Direction::Playback, OpenMode::default()),
            Err(AmuxError::DeviceOpen { .. })
        ));
    }

    #[test]
    fn open_counts_and_failure_injection() {
        let library = VirtualLibrary::new();
        let handle = library.add_device("a", DeviceCaps::default());
        let pcm = library.open("a", Direction::Playback, OpenMode::default()).unwrap();
        assert_eq!(handle.open_count(), 1);
        assert_eq!(handle.state(), Some(PcmState::Open));

        drop(pcm);
        assert!(!handle.is_open());

        handle.set_fail_open(true);
        assert!(library.open("a", Direction::Playback, OpenMode::default()).is_err());
        assert_eq!(handle.open_count(), 1);
        assert_eq!(library.list_devices(), vec!["a"]);
    }

    #[test]
    fn playback_consumption_and_underrun() {
        let library = VirtualLibrary::new();
        let handle = library.add_device("a", DeviceCaps::default());
        let mut pcm = configured(&library, "a", Direction::Playback);

        let window = pcm.mmap_begin(2048).unwrap();
        assert_eq!(window, MmapWindow { offset: 0, frames: 2048 });
        pcm.mmap_commit(window).unwrap();
        pcm.start().unwrap();
        assert_eq!(pcm.avail_update().unwrap(), 2048);

        handle.advance(1024);
        assert_eq!(pcm.avail_update().unwrap(), 3072);
        assert_eq!(handle.advance(2048), Some(PcmState::Xrun));
        assert!(matches!(pcm.avail_update(), Err(AmuxError::Xrun)));
    }

    #[test]
    fn descriptors_follow_avail_min() {
        let library = VirtualLibrary::new();
        let _handle = library.add_device("a", DeviceCaps::default());
        let mut pcm = configured(&library, "a", Direction::Playback);

        let mut pfds = pcm.poll_descriptors();
        sys::poll(&mut pfds, 0).unwrap();
        assert_eq!(pcm.poll_revents(&pfds).unwrap(), PollEvents::OUT);

        // Fill the ring: nothing left to write.
        let window = pcm.mmap_begin(4096).unwrap();
        pcm.mmap_commit(window).unwrap();
        let mut pfds = pcm.poll_descriptors();
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 0);
        assert!(pcm.poll_revents(&pfds).unwrap().is_empty());
    }

    #[test]
    fn capture_reads_filled_frames() {
        let library = VirtualLibrary::new();
        let handle = library.add_device("mic", DeviceCaps::default());
        let mut pcm = configured(&library, "mic", Direction::Capture);
        pcm.start().unwrap();

        let frame: Vec<u8> = (1u8..=8).collect();
        handle.fill(&frame).unwrap();
        handle.advance(2);
        assert_eq!(pcm.avail_update().unwrap(), 2);

        let window = pcm.mmap_begin(2).unwrap();
        assert_eq!(&pcm.mmap_buffer()[..8], &frame[..]);
        pcm.mmap_commit(window).unwrap();
        assert_eq!(pcm.avail_update().unwrap(), 0);
    }

    #[test]
    fn oversized_commit_is_an_error() {
        let library = VirtualLibrary::new();
        let handle = library.add_device("a", DeviceCaps::default());
        let mut pcm = configured(&library, "a", Direction::Playback);

        let window = MmapWindow { offset: 0, frames: u64::MAX };
        assert!(matches!(pcm.mmap_commit(window), Err(AmuxError::Device(_))));
        let window = MmapWindow { offset: 0, frames: 4097 };
        assert!(matches!(pcm.mmap_commit(window), Err(AmuxError::Device(_))));
        assert_eq!(handle.appl_ptr(), Some(0));
    }

    #[test]
    fn disconnect_is_sticky() {
        let library = VirtualLibrary::new();
        let handle = library.add_device("usb", DeviceCaps::default());
        let mut pcm = configured(&library, "usb", Direction::Playback);

        handle.disconnect();
        assert_eq!(pcm.state(), PcmState::Disconnected);
        assert!(matches!(pcm.prepare(), Err(AmuxError::Disconnected)));
        assert!(matches!(pcm.avail_update(), Err(AmuxError::Disconnected)));
    }
}
