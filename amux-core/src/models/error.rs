use thiserror::Error;

use super::state::PcmState;

/// Errors surfaced by the transport and its collaborators.
///
/// Variants follow the four failure families of the stream: configuration
/// problems, missing device after a failed swap, caller/device buffer
/// desynchronization and disconnection. `errno()` gives the negative code a
/// C host boundary reports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmuxError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported parameters: {0}")]
    Params(String),

    #[error("cannot open device {id}: {reason}")]
    DeviceOpen { id: String, reason: String },

    #[error("no active device")]
    NoDevice,

    #[error("buffer desynchronized (device avail {device}, stream avail {stream})")]
    Desync { device: u64, stream: u64 },

    #[error("transfer of {requested} frames exceeds device space ({available})")]
    TransferTooLarge { requested: u64, available: u64 },

    #[error("device disconnected")]
    Disconnected,

    #[error("device xrun")]
    Xrun,

    #[error("invalid device state: {0:?}")]
    BadState(PcmState),

    #[error("unknown poller: {0}")]
    UnknownPoller(String),

    #[error("selector store error: {0}")]
    Selector(String),

    #[error("poller error: {0}")]
    Poller(String),

    #[error("device error: {0}")]
    Device(String),
}

impl AmuxError {
    /// Negative errno equivalent for a C host boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Params(_) | Self::UnknownPoller(_) => -libc::EINVAL,
            Self::DeviceOpen { .. }
            | Self::NoDevice
            | Self::Desync { .. }
            | Self::TransferTooLarge { .. }
            | Self::Xrun
            | Self::BadState(_) => -libc::EPIPE,
            Self::Disconnected => -libc::ENODEV,
            Self::Selector(_) => -libc::EBUSY,
            Self::Poller(_) | Self::Device(_) => -libc::EIO,
        }
    }

    /// Whether the caller should treat the stream as broken and re-prepare.
    pub fn is_broken_pipe(&self) -> bool {
        self.errno() == -libc::EPIPE
    }

    pub(crate) fn poller(context: &str, err: std::io::Error) -> Self {
        Self::Poller(format!("{}: {}", context, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_stream_family_maps_to_epipe() {
        assert_eq!(AmuxError::NoDevice.errno(), -libc::EPIPE);
        assert!(AmuxError::Desync { device: 1, stream: 2 }.is_broken_pipe());
        assert!(AmuxError::TransferTooLarge { requested: 8, available: 4 }.is_broken_pipe());
        assert!(!AmuxError::Disconnected.is_broken_pipe());
        assert_eq!(AmuxError::Disconnected.errno(), -libc::ENODEV);
    }

    #[test]
    fn configuration_errors_map_to_einval() {
        assert_eq!(AmuxError::Config("x".into()).errno(), -libc::EINVAL);
        assert_eq!(AmuxError::UnknownPoller("x".into()).errno(), -libc::EINVAL);
    }

    #[test]
    fn display_includes_counts() {
        let err = AmuxError::Desync { device: 12, stream: 64 };
        assert_eq!(
            err.to_string(),
            "buffer desynchronized (device avail 12, stream avail 64)"
        );
    }
}
