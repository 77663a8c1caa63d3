//! Selector store: a small file naming the desired slave device.
//!
//! An external control tool writes the token under an exclusive advisory
//! lock and truncates the file to the token length. The transport reads it
//! under a non-blocking shared lock and treats contention as "busy".

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::models::error::AmuxError;

/// Longest accepted selector token, in bytes.
pub const MAX_TOKEN_LEN: usize = 128;

/// Result of one non-blocking selector read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorRead {
    Token(String),
    /// A writer holds the exclusive lock.
    Busy,
    /// The store holds no token.
    Empty,
}

/// Read side of the selector store, kept open for the stream lifetime.
#[derive(Debug)]
pub struct SelectorStore {
    path: PathBuf,
    file: File,
}

impl SelectorStore {
    pub fn open(path: &Path) -> Result<Self, AmuxError> {
        let file = File::open(path).map_err(|e| {
            AmuxError::Selector(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current token without ever blocking.
    pub fn read(&self) -> Result<SelectorRead, AmuxError> {
        let lock = match FlockGuard::try_shared(&self.file) {
            Ok(Some(lock)) => lock,
            Ok(None) => return Ok(SelectorRead::Busy),
            Err(e) => {
                return Err(AmuxError::Selector(format!(
                    "cannot lock {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut buf = [0u8; MAX_TOKEN_LEN];
        let mut len = 0;
        while len < buf.len() {
            match self.file.read_at(&mut buf[len..], len as u64) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(AmuxError::Selector(format!(
                        "cannot read {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
        drop(lock);

        Ok(parse_token(&buf[..len]))
    }

    /// Replace the stored token (exclusive lock, write, truncate).
    pub fn write(path: &Path, token: &str) -> Result<(), AmuxError> {
        SelectorWriter::lock(path)?.commit(token)
    }
}

fn parse_token(raw: &[u8]) -> SelectorRead {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let token = String::from_utf8_lossy(&raw[..end]);
    let token = token.trim();
    if token.is_empty() {
        SelectorRead::Empty
    } else {
        SelectorRead::Token(token.to_string())
    }
}

/// Write side of the store. Holds the exclusive lock until committed or
/// dropped.
#[derive(Debug)]
pub struct SelectorWriter {
    // Declared first so the lock is released before the file closes.
    _lock: FlockGuard,
    file: File,
}

impl SelectorWriter {
    /// Open (creating if needed) and lock the store exclusively. Blocks
    /// while readers hold their short shared locks.
    pub fn lock(path: &Path) -> Result<Self, AmuxError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| AmuxError::Selector(format!("cannot open {}: {}", path.display(), e)))?;
        let lock = FlockGuard::exclusive(&file)
            .map_err(|e| AmuxError::Selector(format!("cannot lock {}: {}", path.display(), e)))?;
        Ok(Self { _lock: lock, file })
    }

    /// Write raw bytes at the start of the file without truncating.
    pub fn write_partial(&mut self, bytes: &[u8]) -> Result<(), AmuxError> {
        self.file
            .write_all_at(bytes, 0)
            .map_err(|e| AmuxError::Selector(format!("write failed: {}", e)))
    }

    /// Store `token`, truncate to its length and release the lock.
    pub fn commit(mut self, token: &str) -> Result<(), AmuxError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(AmuxError::Selector(format!(
                "token must be 1..={} bytes, got {}",
                MAX_TOKEN_LEN,
                token.len()
            )));
        }
        self.write_partial(token.as_bytes())?;
        self.file
            .set_len(token.len() as u64)
            .map_err(|e| AmuxError::Selector(format!("truncate failed: {}", e)))?;
        Ok(())
    }
}

/// Advisory `flock(2)` held on a borrowed descriptor, released on drop.
#[derive(Debug)]
struct FlockGuard {
    fd: std::os::fd::RawFd,
}

impl FlockGuard {
    fn try_shared(file: &File) -> io::Result<Option<Self>> {
        let fd = file.as_raw_fd();
        loop {
            let rc = unsafe { libc::flock(fd, libc::LOCK_SH | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(Some(Self { fd }));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    fn exclusive(file: &File) -> io::Result<Self> {
        let fd = file.as_raw_fd();
        loop {
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if rc == 0 {
                return Ok(Self { fd });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_store(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "amux_selector_test_{}_{}",
            std::process::id(),
            name
        ));
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn write_then_read() {
        let path = temp_store("write_then_read");
        let store = SelectorStore::open(&path).unwrap();
        assert_eq!(store.read().unwrap(), SelectorRead::Empty);

        SelectorStore::write(&path, "deviceA").unwrap();
        assert_eq!(store.read().unwrap(), SelectorRead::Token("deviceA".into()));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn shorter_token_truncates_previous() {
        let path = temp_store("truncate");
        let store = SelectorStore::open(&path).unwrap();

        SelectorStore::write(&path, "a-long-device-name").unwrap();
        SelectorStore::write(&path, "hw:1").unwrap();
        assert_eq!(store.read().unwrap(), SelectorRead::Token("hw:1".into()));
        assert_eq!(fs::read(&path).unwrap(), b"hw:1");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn reader_reports_busy_while_writer_holds_lock() {
        let path = temp_store("busy");
        SelectorStore::write(&path, "deviceA").unwrap();
        let store = SelectorStore::open(&path).unwrap();

        let mut writer = SelectorWriter::lock(&path).unwrap();
        writer.write_partial(b"devi").unwrap();
        assert_eq!(store.read().unwrap(), SelectorRead::Busy);

        writer.commit("deviceB").unwrap();
        assert_eq!(store.read().unwrap(), SelectorRead::Token("deviceB".into()));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn oversized_token_is_rejected() {
        let path = temp_store("oversized");
        let token = "x".repeat(MAX_TOKEN_LEN + 1);
        assert!(matches!(
            SelectorStore::write(&path, &token),
            Err(AmuxError::Selector(_))
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn whitespace_and_nul_are_trimmed() {
        assert_eq!(parse_token(b"hw:0\n"), SelectorRead::Token("hw:0".into()));
        assert_eq!(parse_token(b"usb\0junk"), SelectorRead::Token("usb".into()));
        assert_eq!(parse_token(b"  \n"), SelectorRead::Empty);
    }

    #[test]
    fn missing_store_fails_to_open() {
        let path = std::env::temp_dir().join("amux_selector_test_does_not_exist");
        assert!(SelectorStore::open(&path).is_err());
    }
}
