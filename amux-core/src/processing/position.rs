use crate::models::error::AmuxError;
use crate::models::params::{Frames, Geometry};
use crate::models::state::{Direction, PcmState};
use crate::processing::transfer::{self, TransferBuffer};
use crate::traits::pcm_device::PcmDevice;

/// `ptr + frames` modulo `boundary`.
pub fn advance(ptr: Frames, frames: Frames, boundary: Frames) -> Frames {
    (ptr + frames) % boundary
}

/// Caller-visible hardware position derived from the device's available
/// frame count (already clamped to the buffer size).
pub fn hw_position(direction: Direction, device_avail: Frames, appl_ptr: Frames, geometry: &Geometry) -> Frames {
    let pos = match direction {
        Direction::Playback => {
            appl_ptr as i64 + device_avail as i64 - geometry.buffer_size as i64
        }
        Direction::Capture => appl_ptr as i64 + device_avail as i64,
    };
    normalize(pos, geometry.boundary)
}

/// Frames the caller may transfer according to its own pointer
/// bookkeeping, independent of any device.
pub fn stream_avail(direction: Direction, hw_ptr: Frames, appl_ptr: Frames, geometry: &Geometry) -> Frames {
    let avail = match direction {
        Direction::Playback => hw_ptr as i64 + geometry.buffer_size as i64 - appl_ptr as i64,
        Direction::Capture => hw_ptr as i64 - appl_ptr as i64,
    };
    normalize(avail, geometry.boundary)
}

fn normalize(value: i64, boundary: Frames) -> Frames {
    let boundary = boundary as i64;
    let value = if value < 0 {
        value + boundary
    } else if value >= boundary {
        value - boundary
    } else {
        value
    };
    value as Frames
}

/// Gate a transfer of `size` frames.
///
/// A device reporting less room than the caller's bookkeeping implies has
/// fallen behind: the stream is desynchronized. Partial transfers are never
/// attempted.
pub fn check_transfer(device_avail: Frames, stream_avail: Frames, size: Frames) -> Result<(), AmuxError> {
    if device_avail < stream_avail {
        return Err(AmuxError::Desync {
            device: device_avail,
            stream: stream_avail,
        });
    }
    if device_avail < size {
        return Err(AmuxError::TransferTooLarge {
            requested: size,
            available: device_avail,
        });
    }
    Ok(())
}

/// Caller-side pointer bookkeeping over a swappable device.
///
/// Owns the application and hardware pointers of the stable stream. The
/// geometry is fixed at construction and never re-derived from a device.
#[derive(Debug, Clone)]
pub struct BufferSync {
    direction: Direction,
    geometry: Geometry,
    frame_bytes: usize,
    appl_ptr: Frames,
    hw_ptr: Frames,
}

impl BufferSync {
    pub fn new(direction: Direction, geometry: Geometry, frame_bytes: usize) -> Self {
        Self {
            direction,
            geometry,
            frame_bytes,
            appl_ptr: 0,
            hw_ptr: 0,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn appl_ptr(&self) -> Frames {
        self.appl_ptr
    }

    pub fn hw_ptr(&self) -> Frames {
        self.hw_ptr
    }

    /// Rewind both pointers, as a prepare does.
    pub fn reset(&mut self) {
        self.appl_ptr = 0;
        self.hw_ptr = 0;
    }

    pub fn stream_avail(&self) -> Frames {
        stream_avail(self.direction, self.hw_ptr, self.appl_ptr, &self.geometry)
    }

    /// Query the device and update the hardware pointer.
    ///
    /// A device that is not running is prepared first, so a freshly swapped
    /// or xrun device reports an empty ring.
    pub fn pointer(&mut self, device: &mut dyn PcmDevice) -> Result<Frames, AmuxError> {
        if !device.state().is_running() {
            device.prepare()?;
        }

        let avail = device.avail_update()?.min(self.geometry.buffer_size);
        self.hw_ptr = hw_position(self.direction, avail, self.appl_ptr, &self.geometry);
        Ok(self.hw_ptr)
    }

    /// Transfer exactly `size` frames at frame `offset` of `buf`.
    pub fn transfer(
        &mut self,
        device: &mut dyn PcmDevice,
        mut buf: TransferBuffer<'_>,
        offset: Frames,
        size: Frames,
    ) -> Result<Frames, AmuxError> {
        if buf.direction() != self.direction {
            return Err(AmuxError::Params(format!(
                "{:?} buffer on a {:?} stream",
                buf.direction(),
                self.direction
            )));
        }
        transfer::check_bounds(&buf, offset, size, self.frame_bytes)?;
        if size == 0 {
            return Ok(0);
        }

        // Several transfers may run without a pointer query in between.
        let device_avail = device.avail_update()?;
        self.hw_ptr = hw_position(
            self.direction,
            device_avail.min(self.geometry.buffer_size),
            self.appl_ptr,
            &self.geometry,
        );
        let expected = self.stream_avail();
        if let Err(e) = check_transfer(device_avail, expected, size) {
            log::error!("{}: transfer rejected: {}", device.name(), e);
            return Err(e);
        }

        let xfer = transfer::mmap_copy(device, &mut buf, offset, size, self.frame_bytes)?;

        match device.state() {
            PcmState::Prepared => device.start()?,
            PcmState::Running => {}
            other => return Err(AmuxError::BadState(other)),
        }

        self.appl_ptr = advance(self.appl_ptr, xfer, self.geometry.boundary);
        Ok(xfer)
    }
}
