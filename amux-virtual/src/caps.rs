use amux_core::models::error::AmuxError;
use amux_core::models::params::{Access, Frames, HwParams, SampleFormat};

/// What a virtual device accepts during hardware negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Native rates. Other rates are accepted only with resampling enabled.
    pub rates: Vec<u32>,
    pub formats: Vec<SampleFormat>,
    pub min_channels: u32,
    pub max_channels: u32,
    pub min_buffer: Frames,
    pub max_buffer: Frames,
    /// Buffer and period sizes are multiples of this.
    pub step: Frames,
    /// Poll descriptors exposed per open handle.
    pub descriptors: usize,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            rates: vec![44100, 48000],
            formats: vec![SampleFormat::S16Le, SampleFormat::S32Le, SampleFormat::FloatLe],
            min_channels: 1,
            max_channels: 8,
            min_buffer: 64,
            max_buffer: 65536,
            step: 32,
            descriptors: 1,
        }
    }
}

impl DeviceCaps {
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    pub fn with_buffer_range(mut self, min: Frames, max: Frames) -> Self {
        self.min_buffer = min;
        self.max_buffer = max;
        self
    }

    pub fn with_step(mut self, step: Frames) -> Self {
        self.step = step;
        self
    }

    pub fn with_descriptors(mut self, descriptors: usize) -> Self {
        self.descriptors = descriptors;
        self
    }

    fn nearest(&self, frames: Frames, max: Frames) -> Frames {
        let step = self.step.max(1);
        let clamped = frames.clamp(self.min_buffer.min(max), max);
        let rounded = (clamped + step / 2) / step * step;
        rounded.min(max / step * step).max(step)
    }

    /// Exact match on access, format, channels and rate; nearest buffer and
    /// period.
    pub fn refine(&self, name: &str, requested: &HwParams) -> Result<HwParams, AmuxError> {
        if !matches!(requested.access, Access::MmapInterleaved | Access::RwInterleaved) {
            return Err(AmuxError::Params(format!(
                "{}: {:?} access unsupported",
                name, requested.access
            )));
        }
        if !self.formats.contains(&requested.format) {
            return Err(AmuxError::Params(format!(
                "{}: format {:?} unsupported",
                name, requested.format
            )));
        }
        if requested.channels < self.min_channels || requested.channels > self.max_channels {
            return Err(AmuxError::Params(format!(
                "{}: {} channels unsupported",
                name, requested.channels
            )));
        }
        if !requested.rate_resample && !self.rates.contains(&requested.rate) {
            return Err(AmuxError::Params(format!(
                "{}: rate {} unsupported without resampling",
                name, requested.rate
            )));
        }

        let buffer_size = self.nearest(requested.buffer_size, self.max_buffer);
        let period_size = self.nearest(requested.period_size, buffer_size);
        Ok(HwParams {
            buffer_size,
            period_size,
            ..*requested
        })
    }
}
