#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use amux_core::{
    AmuxConfig, Direction, HwParams, OpenMode, PcmIoPlugin, SelectorStore, SwParams,
    TransportSession,
};
use amux_virtual::{DeviceCaps, VirtualHandle, VirtualLibrary};

/// Bytes per frame of `HwParams::default()` (S16LE stereo).
pub const FRAME_BYTES: usize = 4;

/// A selector file plus a library with `deviceA`, `deviceB` and `deviceC`.
pub struct Fixture {
    pub path: PathBuf,
    pub library: Arc<VirtualLibrary>,
    pub a: VirtualHandle,
    pub b: VirtualHandle,
    pub c: VirtualHandle,
}

impl Fixture {
    pub fn new(name: &str, initial: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "amux_scenario_{}_{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, b"").unwrap();
        SelectorStore::write(&path, initial).unwrap();

        let library = Arc::new(VirtualLibrary::new());
        let a = library.add_device("deviceA", DeviceCaps::default());
        let b = library.add_device("deviceB", DeviceCaps::default());
        let c = library.add_device("deviceC", DeviceCaps::default().with_rates(&[44100]));
        Self { path, library, a, b, c }
    }

    pub fn config(&self, poller: &str) -> AmuxConfig {
        AmuxConfig::new(&self.path).with_poller(poller)
    }

    pub fn open(&self, poller: &str, direction: Direction) -> TransportSession {
        TransportSession::open(self.config(poller), self.library.clone(), direction, OpenMode::default())
            .unwrap()
    }

    /// Open, negotiate 4096/1024 and prepare.
    pub fn prepared(&self, poller: &str, direction: Direction) -> TransportSession {
        let mut stream = self.open(poller, direction);
        let hw = stream.configure_hw(&HwParams::default()).unwrap();
        assert_eq!((hw.buffer_size, hw.period_size), (4096, 1024));
        assert_eq!(stream.configure_sw(&SwParams::default()).unwrap(), 1 << 32);
        stream.prepare().unwrap();
        stream
    }

    pub fn select(&self, token: &str) {
        SelectorStore::write(&self.path, token).unwrap();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

pub fn frames(n: usize, fill: u8) -> Vec<u8> {
    vec![fill; n * FRAME_BYTES]
}
