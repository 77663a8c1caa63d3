//! Thin wrappers over the descriptor syscalls the pollers need.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::models::poll::PollDescriptor;

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn retry<F>(mut f: F) -> io::Result<libc::c_int>
where
    F: FnMut() -> libc::c_int,
{
    loop {
        match cvt(f()) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Non-blocking eventfd used as a level-triggered readiness flag.
///
/// The counter is non-zero ("set") exactly when a `poll` on the descriptor
/// reports `POLLIN`.
#[derive(Debug)]
pub struct EventFd(OwnedFd);

impl EventFd {
    pub fn new(initially_set: bool) -> io::Result<Self> {
        let init = u32::from(initially_set);
        let fd = cvt(unsafe { libc::eventfd(init, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Make the descriptor readable.
    pub fn set(&self) -> io::Result<()> {
        let one: u64 = 1;
        let rc = retry(|| unsafe {
            libc::write(self.0.as_raw_fd(), &one as *const u64 as *const libc::c_void, 8) as libc::c_int
        });
        match rc {
            Ok(_) => Ok(()),
            // Counter saturated: already readable.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Make the descriptor non-readable. Never blocks.
    pub fn clear(&self) -> io::Result<()> {
        let mut value: u64 = 0;
        let rc = retry(|| unsafe {
            libc::read(self.0.as_raw_fd(), &mut value as *mut u64 as *mut libc::c_void, 8) as libc::c_int
        });
        match rc {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_set(&self) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.0.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        retry(|| unsafe { libc::poll(&mut pfd, 1, 0) })?;
        Ok(pfd.revents & libc::POLLIN != 0)
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Close-on-exec pipe, returned as (read end, write end).
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

/// Duplicate `fd` onto a fresh close-on-exec descriptor number.
pub fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    let new = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

/// Atomically point descriptor number `target` at the file behind `src`.
///
/// `target` keeps its number, so anyone holding it observes the new file on
/// their next `poll`.
pub fn dup_onto(src: RawFd, target: &OwnedFd) -> io::Result<()> {
    let dst = target.as_raw_fd();
    if src == dst {
        return Ok(());
    }
    retry(|| unsafe { libc::dup3(src, dst, libc::O_CLOEXEC) })?;
    Ok(())
}

/// `poll(2)` over `pfds`, writing back `revents`. Returns the ready count.
pub fn poll(pfds: &mut [PollDescriptor], timeout_ms: i32) -> io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = pfds.iter().map(|p| p.to_raw()).collect();
    let n = retry(|| unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, timeout_ms) })?;
    for (pfd, r) in pfds.iter_mut().zip(&raw) {
        pfd.revents = crate::models::poll::PollEvents::from_bits(r.revents);
    }
    Ok(n as usize)
}
