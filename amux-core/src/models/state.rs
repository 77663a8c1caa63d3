use serde::{Deserialize, Serialize};

/// PCM device state machine.
///
/// State transitions:
/// ```text
/// closed → open → setup → prepared → running
///                            ↑          ↓
///                            └── xrun ←─┤
///                                       ↓
///                                 disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmState {
    Closed,
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Disconnected,
}

impl PcmState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Prepared or running: the device accepts data transfers.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Prepared | Self::Running)
    }

    /// No recovery is possible on the same handle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Disconnected)
    }
}

/// Direction of the stream, fixed at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

/// Flags the stream was opened with; forwarded to every slave open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenMode {
    pub nonblock: bool,
    pub async_notify: bool,
}
