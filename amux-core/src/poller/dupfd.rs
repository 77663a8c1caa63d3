use std::os::fd::{AsRawFd, OwnedFd};

use crate::models::error::AmuxError;
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::poller::sys;
use crate::traits::poller::{Poller, SlaveContext};

/// Largest slave descriptor set the strategy can mirror.
pub const MAX_SLAVE_FDS: usize = 4;

/// Presents `2 * MAX_SLAVE_FDS` descriptors whose numbers never change.
///
/// Even slots are polled for `IN`, odd slots for `OUT`. On every swap each
/// slot is re-pointed with `dup3` at the matching slave descriptor, or at an
/// end of a private pipe that never reports the requested event.
#[derive(Debug)]
pub struct DupFdPoller {
    infds: Vec<OwnedFd>,
    outfds: Vec<OwnedFd>,
    // Never readable when polled for IN.
    idle_in: OwnedFd,
    // Never writable when polled for OUT.
    idle_out: OwnedFd,
}

impl DupFdPoller {
    pub const NAME: &'static str = "dupfd";

    pub fn new() -> Result<Self, AmuxError> {
        let (rd, wr) = sys::pipe().map_err(|e| AmuxError::poller("pipe", e))?;

        let mut infds = Vec::with_capacity(MAX_SLAVE_FDS);
        let mut outfds = Vec::with_capacity(MAX_SLAVE_FDS);
        for _ in 0..MAX_SLAVE_FDS {
            infds.push(sys::dup(wr.as_raw_fd()).map_err(|e| AmuxError::poller("dup", e))?);
            outfds.push(sys::dup(rd.as_raw_fd()).map_err(|e| AmuxError::poller("dup", e))?);
        }

        Ok(Self {
            infds,
            outfds,
            idle_in: wr,
            idle_out: rd,
        })
    }

    fn bind(&self, slave_fds: &[PollDescriptor]) -> Result<(), AmuxError> {
        for i in 0..MAX_SLAVE_FDS {
            let sfd = slave_fds.get(i % slave_fds.len().max(1));

            let src = match sfd {
                Some(s) if s.events.contains(PollEvents::IN) => s.fd,
                _ => self.idle_in.as_raw_fd(),
            };
            sys::dup_onto(src, &self.infds[i]).map_err(|e| AmuxError::poller("dup3", e))?;

            let src = match sfd {
                Some(s) if s.events.contains(PollEvents::OUT) => s.fd,
                _ => self.idle_out.as_raw_fd(),
            };
            sys::dup_onto(src, &self.outfds[i]).map_err(|e| AmuxError::poller("dup3", e))?;
        }
        Ok(())
    }
}

impl Poller for DupFdPoller {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn descriptors_count(&self) -> usize {
        MAX_SLAVE_FDS * 2
    }

    fn descriptors(&self, pfds: &mut [PollDescriptor]) -> Result<usize, AmuxError> {
        if pfds.len() != self.descriptors_count() {
            return Err(AmuxError::Params(format!(
                "expected {} descriptors, got {}",
                self.descriptors_count(),
                pfds.len()
            )));
        }
        for i in 0..MAX_SLAVE_FDS {
            pfds[2 * i] = PollDescriptor::new(self.infds[i].as_raw_fd(), PollEvents::IN);
            pfds[2 * i + 1] = PollDescriptor::new(self.outfds[i].as_raw_fd(), PollEvents::OUT);
        }
        Ok(pfds.len())
    }

    fn set_slave(&mut self, slave: &mut SlaveContext<'_>) -> Result<(), AmuxError> {
        let slave_fds = slave.device.poll_descriptors();
        if slave_fds.len() > MAX_SLAVE_FDS {
            log::error!(
                "{}: {} poll descriptors, at most {} supported",
                slave.device.name(),
                slave_fds.len(),
                MAX_SLAVE_FDS
            );
            return Err(AmuxError::Poller(format!(
                "{} has too many poll descriptors ({})",
                slave.device.name(),
                slave_fds.len()
            )));
        }
        self.bind(&slave_fds)
    }

    fn poll_revents(
        &mut self,
        slave: &mut SlaveContext<'_>,
        _pfds: &[PollDescriptor],
    ) -> Result<PollEvents, AmuxError> {
        slave_revents(slave)
    }
}

/// Re-poll the slave's own descriptors and gate readiness on a full period.
///
/// Shared by the strategies whose caller descriptors only wake the caller:
/// the true readiness always comes from the slave.
pub(crate) fn slave_revents(slave: &mut SlaveContext<'_>) -> Result<PollEvents, AmuxError> {
    let mut sfds = slave.device.poll_descriptors();
    sys::poll(&mut sfds, 0).map_err(|e| AmuxError::poller("poll", e))?;
    let mut revents = slave.device.poll_revents(&sfds)?;

    // Woken too early: less than one period of room.
    if slave.below_period()? {
        revents.remove(PollEvents::IN | PollEvents::OUT);
    }
    Ok(revents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::PcmState;
    use crate::test_support::FakeDevice;
    use crate::traits::pcm_device::PcmDevice;

    fn caller_fds(poller: &DupFdPoller) -> Vec<PollDescriptor> {
        let mut pfds = vec![PollDescriptor::new(-1, PollEvents::EMPTY); poller.descriptors_count()];
        poller.descriptors(&mut pfds).unwrap();
        pfds
    }

    #[test]
    fn descriptor_numbers_survive_rebinding() {
        let mut poller = DupFdPoller::new().unwrap();
        let before = caller_fds(&poller);
        assert_eq!(before.len(), 8);

        let a = sys::EventFd::new(true).unwrap();
        let mut device = FakeDevice::new("a", 8, 2).with_fds(&[a.as_raw_fd()]);
        let mut ctx = SlaveContext {
            device: &mut device,
            generation: 1,
            period_size: 2,
        };
        poller.set_slave(&mut ctx).unwrap();

        let mut after = caller_fds(&poller);
        assert_eq!(
            before.iter().map(|p| p.fd).collect::<Vec<_>>(),
            after.iter().map(|p| p.fd).collect::<Vec<_>>()
        );

        // IN slots now follow the readable eventfd, OUT slots stay idle.
        sys::poll(&mut after, 0).unwrap();
        assert!(after[0].revents.contains(PollEvents::IN));
        assert!(after[1].revents.is_empty());
    }

    #[test]
    fn unbound_poller_never_wakes() {
        let poller = DupFdPoller::new().unwrap();
        let mut pfds = caller_fds(&poller);
        assert_eq!(sys::poll(&mut pfds, 0).unwrap(), 0);
    }

    #[test]
    fn too_many_slave_descriptors() {
        let mut poller = DupFdPoller::new().unwrap();
        let mut device = FakeDevice::new("wide", 8, 2).with_fds(&[0, 1, 2, 3, 4]);
        let mut ctx = SlaveContext {
            device: &mut device,
            generation: 1,
            period_size: 2,
        };
        assert!(matches!(poller.set_slave(&mut ctx), Err(AmuxError::Poller(_))));
    }

    #[test]
    fn readiness_is_gated_on_a_period() {
        let mut poller = DupFdPoller::new().unwrap();
        let efd = sys::EventFd::new(true).unwrap();
        let mut device = FakeDevice::new("a", 8, 2).with_fds(&[efd.as_raw_fd()]);
        device.prepare().unwrap();
        assert_eq!(device.state(), PcmState::Prepared);

        device.set_avail_override(Some(1));
        let mut ctx = SlaveContext {
            device: &mut device,
            generation: 1,
            period_size: 2,
        };
        assert!(poller.poll_revents(&mut ctx, &[]).unwrap().is_empty());

        device.set_avail_override(Some(4));
        let mut ctx = SlaveContext {
            device: &mut device,
            generation: 1,
            period_size: 2,
        };
        assert!(poller.poll_revents(&mut ctx, &[]).unwrap().contains(PollEvents::OUT));
    }
}
