use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::models::error::AmuxError;
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::poller::dupfd::slave_revents;
use crate::traits::poller::{Poller, SlaveContext};

/// Presents a single epoll descriptor, readable whenever any registered
/// slave descriptor is ready.
#[derive(Debug)]
pub struct EpollPoller {
    epoll: OwnedFd,
    registered: Vec<PollDescriptor>,
}

impl EpollPoller {
    pub const NAME: &'static str = "epoller";

    pub fn new() -> Result<Self, AmuxError> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(AmuxError::poller("epoll_create1", io::Error::last_os_error()));
        }
        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            registered: Vec::new(),
        })
    }

    fn add(&self, pfd: &PollDescriptor) -> io::Result<()> {
        let mut flags = 0;
        if pfd.events.contains(PollEvents::IN) {
            flags |= libc::EPOLLIN;
        }
        if pfd.events.contains(PollEvents::OUT) {
            flags |= libc::EPOLLOUT;
        }

        let mut event = libc::epoll_event {
            events: flags as u32,
            u64: pfd.fd as u64,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, pfd.fd, &mut event)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete(&self, fd: RawFd) {
        unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }
}

impl Poller for EpollPoller {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn descriptors_count(&self) -> usize {
        1
    }

    fn descriptors(&self, pfds: &mut [PollDescriptor]) -> Result<usize, AmuxError> {
        if pfds.len() != 1 {
            return Err(AmuxError::Params(format!("expected 1 descriptor, got {}", pfds.len())));
        }
        pfds[0] = PollDescriptor::new(self.epoll.as_raw_fd(), PollEvents::IN);
        Ok(1)
    }

    fn set_slave(&mut self, slave: &mut SlaveContext<'_>) -> Result<(), AmuxError> {
        let slave_fds = slave.device.poll_descriptors();

        // The old device may already be closed, and a new one can reuse its
        // descriptor numbers: drop stale registrations before adding.
        for old in std::mem::take(&mut self.registered) {
            self.delete(old.fd);
        }

        for (i, pfd) in slave_fds.iter().enumerate() {
            if let Err(e) = self.add(pfd) {
                for added in &slave_fds[..i] {
                    self.delete(added.fd);
                }
                return Err(AmuxError::poller("epoll_ctl", e));
            }
        }

        log::debug!(
            "epoller: watching {} descriptors of {}",
            slave_fds.len(),
            slave.device.name()
        );
        self.registered = slave_fds;
        Ok(())
    }

    fn poll_revents(
        &mut self,
        slave: &mut SlaveContext<'_>,
        _pfds: &[PollDescriptor],
    ) -> Result<PollEvents, AmuxError> {
        slave_revents(slave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::sys;
    use crate::test_support::FakeDevice;

    fn epoll_fd(poller: &EpollPoller) -> PollDescriptor {
        let mut pfds = [PollDescriptor::new(-1, PollEvents::EMPTY)];
        poller.descriptors(&mut pfds).unwrap();
        pfds[0]
    }

    #[test]
    fn follows_the_bound_slave() {
        let mut poller = EpollPoller::new().unwrap();
        let handle = epoll_fd(&poller);

        let a = sys::EventFd::new(false).unwrap();
        let mut dev_a = FakeDevice::new("a", 8, 2).with_fds(&[a.as_raw_fd()]);
        poller
            .set_slave(&mut SlaveContext { device: &mut dev_a, generation: 1, period_size: 2 })
            .unwrap();

        let mut pfds = [handle];
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 0);
        a.set().unwrap();
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 1);

        // Swap to an idle slave: the epoll handle goes quiet and keeps its number.
        let b = sys::EventFd::new(false).unwrap();
        let mut dev_b = FakeDevice::new("b", 8, 2).with_fds(&[b.as_raw_fd()]);
        poller
            .set_slave(&mut SlaveContext { device: &mut dev_b, generation: 2, period_size: 2 })
            .unwrap();

        assert_eq!(epoll_fd(&poller).fd, handle.fd);
        let mut pfds = [handle];
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 0);
    }

    #[test]
    fn failed_registration_leaves_nothing_behind() {
        let mut poller = EpollPoller::new().unwrap();
        let a = sys::EventFd::new(true).unwrap();
        // -1 cannot be registered.
        let mut dev = FakeDevice::new("bad", 8, 2).with_fds(&[a.as_raw_fd(), -1]);
        assert!(poller
            .set_slave(&mut SlaveContext { device: &mut dev, generation: 1, period_size: 2 })
            .is_err());

        let mut pfds = [epoll_fd(&poller)];
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 0);
    }
}
