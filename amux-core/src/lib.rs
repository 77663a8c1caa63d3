//! # amux-core
//!
//! Live PCM multiplexer: a stable stream whose slave device can be swapped
//! at runtime, driven by an external selector file.
//!
//! Device backends implement the `DeviceLibrary` / `PcmDevice` traits and
//! plug into the generic `TransportSession`. The host drives the stream
//! through `PcmIoPlugin`.
//!
//! ## Architecture
//!
//! ```text
//! amux-core (this crate)
//! ├── traits/       ← PcmDevice, DeviceLibrary, Poller, PcmIoPlugin
//! ├── models/       ← AmuxError, PcmState, HwParams/SwParams/Geometry, AmuxConfig, PollEvents
//! ├── processing/   ← BufferSync (pointer bookkeeping), mmap transfer
//! ├── poller/       ← DupFdPoller, EpollPoller, ThreadPoller, PollerRegistry
//! ├── session/      ← DeviceManager (hot swap), TransportSession
//! └── storage/      ← SelectorStore, SelectorWriter
//! ```

pub mod models;
pub mod poller;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root for convenience.
pub use models::config::AmuxConfig;
pub use models::error::AmuxError;
pub use models::params::{Access, Frames, Geometry, HwParams, SampleFormat, SwParams};
pub use models::poll::{PollDescriptor, PollEvents};
pub use models::state::{Direction, OpenMode, PcmState};
pub use poller::registry::{PollerFactory, PollerRegistry};
pub use poller::sys::EventFd;
pub use processing::position::BufferSync;
pub use processing::transfer::TransferBuffer;
pub use session::device::{DeviceManager, SelectorCheck};
pub use session::transport::TransportSession;
pub use storage::selector_store::{SelectorRead, SelectorStore, SelectorWriter};
pub use traits::io_plugin::PcmIoPlugin;
pub use traits::pcm_device::{DeviceLibrary, MmapWindow, PcmDevice};
pub use traits::poller::{Poller, SlaveContext};
