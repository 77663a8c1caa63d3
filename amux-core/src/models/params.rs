use serde::{Deserialize, Serialize};

use super::error::AmuxError;

/// Frame count or frame position.
pub type Frames = u64;

/// Largest boundary a device may report; positions are kept below it.
pub const BOUNDARY_LIMIT: Frames = 1 << 32;

/// Buffer access layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    MmapInterleaved,
    MmapNonInterleaved,
    RwInterleaved,
    RwNonInterleaved,
}

/// Sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8,
    S16Le,
    S24Le,
    S32Le,
    FloatLe,
}

impl SampleFormat {
    /// Storage size of one sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16Le => 2,
            Self::S24Le | Self::S32Le | Self::FloatLe => 4,
        }
    }

    /// Byte pattern of digital silence.
    pub fn silence(&self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0,
        }
    }
}

/// Hardware parameters, requested or negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    pub access: Access,
    pub format: SampleFormat,
    pub channels: u32,
    pub rate: u32,
    pub buffer_size: Frames,
    pub period_size: Frames,
    pub rate_resample: bool,
}

impl HwParams {
    /// Bytes of one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    pub fn validate(&self) -> Result<(), AmuxError> {
        if self.channels == 0 {
            return Err(AmuxError::Params("channel count must be positive".into()));
        }
        if self.rate == 0 {
            return Err(AmuxError::Params("rate must be positive".into()));
        }
        if self.period_size == 0 || self.buffer_size == 0 {
            return Err(AmuxError::Params("buffer and period sizes must be positive".into()));
        }
        if self.period_size > self.buffer_size {
            return Err(AmuxError::Params(format!(
                "period size {} exceeds buffer size {}",
                self.period_size, self.buffer_size
            )));
        }
        Ok(())
    }

    /// Slave-side request derived from caller params.
    ///
    /// The transfer path addresses the slave buffer directly, so the slave is
    /// always asked for mmap interleaved access whatever the caller chose.
    pub fn for_slave(&self, force_resample: bool) -> Self {
        Self {
            access: Access::MmapInterleaved,
            rate_resample: force_resample || self.rate_resample,
            ..*self
        }
    }
}

impl Default for HwParams {
    fn default() -> Self {
        Self {
            access: Access::MmapInterleaved,
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
            buffer_size: 4096,
            period_size: 1024,
            rate_resample: true,
        }
    }
}

/// Software parameters. A zero `boundary` lets the device pick one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwParams {
    pub avail_min: Frames,
    pub start_threshold: Frames,
    pub stop_threshold: Frames,
    pub boundary: Frames,
}

/// Caller-visible ring geometry, fixed once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub buffer_size: Frames,
    pub period_size: Frames,
    pub boundary: Frames,
}

impl Geometry {
    pub fn new(buffer_size: Frames, period_size: Frames, boundary: Frames) -> Result<Self, AmuxError> {
        if buffer_size == 0 || boundary == 0 || boundary % buffer_size != 0 {
            return Err(AmuxError::Config(format!(
                "boundary {} is not a multiple of buffer size {}",
                boundary, buffer_size
            )));
        }
        if boundary > BOUNDARY_LIMIT {
            return Err(AmuxError::Config(format!(
                "boundary {} exceeds the {} frame limit",
                boundary, BOUNDARY_LIMIT
            )));
        }
        Ok(Self {
            buffer_size,
            period_size,
            boundary,
        })
    }
}

/// Largest `buffer_size * 2^k` not above [`BOUNDARY_LIMIT`].
pub fn default_boundary(buffer_size: Frames) -> Frames {
    if buffer_size == 0 {
        return 0;
    }
    let mut boundary = buffer_size;
    while boundary * 2 <= BOUNDARY_LIMIT {
        boundary *= 2;
    }
    boundary
}
