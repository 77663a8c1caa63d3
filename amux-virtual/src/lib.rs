//! # amux-virtual
//!
//! In-process virtual PCM backend for amux.
//!
//! Provides:
//! - `VirtualLibrary`: a `DeviceLibrary` of named virtual devices
//! - `VirtualPcm`: an open handle with an mmap ring and real eventfd poll descriptors
//! - `VirtualHandle`: the hardware side of a device: consume, produce, xrun, unplug
//! - `DeviceCaps`: what a device accepts during hardware negotiation
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use amux_core::{AmuxConfig, Direction, OpenMode, TransportSession};
//! use amux_virtual::{DeviceCaps, VirtualLibrary};
//!
//! let library = Arc::new(VirtualLibrary::new());
//! let speakers = library.add_device("speakers", DeviceCaps::default());
//! let stream = TransportSession::open(
//!     AmuxConfig::new("/run/amux/selector"),
//!     library,
//!     Direction::Playback,
//!     OpenMode::default(),
//! )?;
//! ```

pub mod caps;
pub mod library;
pub mod pcm;

pub use caps::DeviceCaps;
pub use library::{VirtualHandle, VirtualLibrary};
pub use pcm::VirtualPcm;
