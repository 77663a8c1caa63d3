use crate::models::error::AmuxError;
use crate::models::params::Frames;
use crate::models::state::Direction;
use crate::traits::pcm_device::PcmDevice;

/// Caller-side interleaved buffer handed to a transfer.
///
/// Playback streams lend their data read-only; capture streams lend the
/// buffer the device frames are copied into.
#[derive(Debug)]
pub enum TransferBuffer<'a> {
    Playback(&'a [u8]),
    Capture(&'a mut [u8]),
}

impl TransferBuffer<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Playback(_) => Direction::Playback,
            Self::Capture(_) => Direction::Capture,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Playback(data) => data.len(),
            Self::Capture(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byte range of `frames` frames starting at frame `first`.
///
/// Counts that do not fit the address space are a parameter error.
pub(crate) fn byte_span(first: Frames, frames: Frames, frame_bytes: usize) -> Result<(usize, usize), AmuxError> {
    let to_bytes = |n: Frames| {
        usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_mul(frame_bytes))
    };
    to_bytes(first)
        .zip(to_bytes(frames))
        .and_then(|(start, len)| Some((start, start.checked_add(len)?)))
        .ok_or_else(|| {
            AmuxError::Params(format!(
                "{} frames at frame {} exceed the addressable range",
                frames, first
            ))
        })
}

/// Check that `size` frames at `offset` fit in the caller buffer.
pub(crate) fn check_bounds(
    buf: &TransferBuffer<'_>,
    offset: Frames,
    size: Frames,
    frame_bytes: usize,
) -> Result<(), AmuxError> {
    let (_, end) = byte_span(offset, size, frame_bytes)?;
    if end > buf.len() {
        return Err(AmuxError::Params(format!(
            "transfer of {} frames at offset {} overruns a {} byte buffer",
            size,
            offset,
            buf.len()
        )));
    }
    Ok(())
}

/// Move exactly `size` frames through the device's mmap windows.
///
/// The device ring may wrap, so the copy can take more than one
/// contiguous run.
pub(crate) fn mmap_copy(
    device: &mut dyn PcmDevice,
    buf: &mut TransferBuffer<'_>,
    offset: Frames,
    size: Frames,
    frame_bytes: usize,
) -> Result<Frames, AmuxError> {
    let mut xfer: Frames = 0;
    while xfer < size {
        let window = device.mmap_begin(size - xfer)?;
        if window.frames == 0 {
            return Err(AmuxError::Device(format!(
                "{} granted an empty mmap window",
                device.name()
            )));
        }

        let (ring_start, ring_end) = byte_span(window.offset, window.frames, frame_bytes)?;
        let (user_start, user_end) = byte_span(offset + xfer, window.frames, frame_bytes)?;
        let ring = device.mmap_buffer();
        if ring_end > ring.len() {
            return Err(AmuxError::Device(format!(
                "mmap window {:?} outside a {} byte ring",
                window,
                ring.len()
            )));
        }

        match buf {
            TransferBuffer::Playback(src) => {
                ring[ring_start..ring_end].copy_from_slice(&src[user_start..user_end])
            }
            TransferBuffer::Capture(dst) => {
                dst[user_start..user_end].copy_from_slice(&ring[ring_start..ring_end])
            }
        }

        let committed = device.mmap_commit(window)?;
        if committed == 0 {
            return Err(AmuxError::Device(format!("{} committed no frames", device.name())));
        }
        xfer += committed;
    }
    Ok(xfer)
}
