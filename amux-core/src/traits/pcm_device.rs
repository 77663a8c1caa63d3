use crate::models::error::AmuxError;
use crate::models::params::{Frames, HwParams, SwParams};
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::models::state::{Direction, OpenMode, PcmState};

/// Contiguous region of a device ring buffer granted by
/// [`PcmDevice::mmap_begin`], in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapWindow {
    pub offset: Frames,
    pub frames: Frames,
}

/// Entry point of a device library: opens PCM handles by identifier.
pub trait DeviceLibrary: Send + Sync {
    fn open(
        &self,
        id: &str,
        direction: Direction,
        mode: OpenMode,
    ) -> Result<Box<dyn PcmDevice>, AmuxError>;
}

/// One open PCM handle of the underlying device library.
///
/// Implemented by backends (see `amux-virtual`). Dropping the handle
/// closes the device.
pub trait PcmDevice: Send {
    /// Identifier the device was opened with.
    fn name(&self) -> &str;

    /// Apply hardware parameters.
    ///
    /// Access, format, channel count and rate must be honoured exactly;
    /// buffer and period sizes are set to the nearest achievable values.
    /// Returns the parameters actually installed.
    fn hw_params(&mut self, requested: &HwParams) -> Result<HwParams, AmuxError>;

    /// Apply software parameters and return the wraparound boundary in effect.
    fn sw_params(&mut self, params: &SwParams) -> Result<Frames, AmuxError>;

    fn prepare(&mut self) -> Result<(), AmuxError>;

    fn start(&mut self) -> Result<(), AmuxError>;

    /// Stop immediately, discarding pending frames.
    fn stop(&mut self) -> Result<(), AmuxError>;

    fn state(&self) -> PcmState;

    /// Frames the application may transfer right now.
    fn avail_update(&mut self) -> Result<Frames, AmuxError>;

    /// Request up to `frames` of contiguous ring space at the application
    /// pointer. The granted window may be shorter when the ring wraps.
    fn mmap_begin(&mut self, frames: Frames) -> Result<MmapWindow, AmuxError>;

    /// The whole interleaved ring buffer, addressed by frame offset.
    fn mmap_buffer(&mut self) -> &mut [u8];

    /// Commit a window obtained from `mmap_begin`; returns committed frames.
    fn mmap_commit(&mut self, window: MmapWindow) -> Result<Frames, AmuxError>;

    /// Native descriptors to wait on, with requested events.
    fn poll_descriptors(&self) -> Vec<PollDescriptor>;

    /// Translate kernel revents on the native descriptors into stream events.
    fn poll_revents(&self, fds: &[PollDescriptor]) -> Result<PollEvents, AmuxError>;
}
