use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::models::error::AmuxError;
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::poller::sys::{self, EventFd};
use crate::traits::poller::{Poller, SlaveContext};

/// Most native descriptors a slave may expose to the worker.
pub const MAX_SLAVE_FDS: usize = 16;

#[derive(Debug, Default)]
struct Shared {
    /// Native descriptors of the bound slave.
    slave_fds: Vec<PollDescriptor>,
    /// Last poll result for `slave_fds`.
    results: Vec<PollDescriptor>,
    /// The worker waits on `slave_fds` only while armed.
    armed: bool,
    /// Binding the descriptors belong to.
    generation: Option<u64>,
    stop: bool,
}

#[derive(Debug)]
struct Inner {
    shared: Mutex<Shared>,
    /// Handed to the caller; readable when the slave may be ready.
    user: EventFd,
    /// Interrupts the worker's blocking poll.
    wake: EventFd,
}

impl Inner {
    /// Record a worker poll result unless the slave changed meanwhile.
    fn publish(&self, generation: Option<u64>, fds: &[PollDescriptor]) -> bool {
        let mut shared = self.shared.lock();
        if shared.stop || shared.generation != generation {
            return false;
        }
        shared.results = fds.to_vec();
        shared.armed = false;
        if let Err(e) = self.user.set() {
            log::error!("thread poller: cannot unblock caller: {}", e);
        }
        true
    }

    /// Block the caller and have the worker watch the slave.
    fn arm(&self, shared: &mut Shared) {
        if let Err(e) = self.user.clear() {
            log::error!("thread poller: cannot block caller: {}", e);
        }
        shared.armed = true;
    }

    fn wake(&self) {
        if let Err(e) = self.wake.set() {
            log::error!("thread poller: cannot wake worker: {}", e);
        }
    }

    fn run(&self) {
        loop {
            let (mut pfds, generation) = {
                let shared = self.shared.lock();
                if shared.stop {
                    break;
                }
                let mut pfds = Vec::with_capacity(shared.slave_fds.len() + 1);
                pfds.push(PollDescriptor::new(self.wake.as_raw_fd(), PollEvents::IN));
                if shared.armed {
                    pfds.extend_from_slice(&shared.slave_fds);
                }
                (pfds, shared.generation)
            };

            let ready = match sys::poll(&mut pfds, -1) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("thread poller: poll failed: {}", e);
                    break;
                }
            };

            if !pfds[0].revents.is_empty() {
                if let Err(e) = self.wake.clear() {
                    log::error!("thread poller: cannot ack wake-up: {}", e);
                }
                if ready == 1 {
                    continue;
                }
            }

            if !self.publish(generation, &pfds[1..]) {
                log::trace!("thread poller: discarding stale readiness");
            }
        }
        log::debug!("thread poller: worker exiting");
    }
}

/// Presents one eventfd to the caller. A worker thread waits on the slave's
/// native descriptors and flags the eventfd when the slave becomes ready.
pub struct ThreadPoller {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadPoller {
    pub const NAME: &'static str = "thread";

    pub fn new() -> Result<Self, AmuxError> {
        // Readable until a slave says otherwise.
        let user = EventFd::new(true).map_err(|e| AmuxError::poller("eventfd", e))?;
        let wake = EventFd::new(false).map_err(|e| AmuxError::poller("eventfd", e))?;
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared::default()),
            user,
            wake,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("amux-poll".into())
            .spawn(move || worker_inner.run())
            .map_err(|e| AmuxError::poller("spawn", e))?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }
}

impl Poller for ThreadPoller {
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
        pfds[0] = PollDescriptor::new(self.inner.user.as_raw_fd(), PollEvents::IN);
        Ok(1)
    }

    fn set_slave(&mut self, slave: &mut SlaveContext<'_>) -> Result<(), AmuxError> {
        let mut sfds = slave.device.poll_descriptors();
        if sfds.len() > MAX_SLAVE_FDS {
            return Err(AmuxError::Poller(format!(
                "{} has too many poll descriptors ({})",
                slave.device.name(),
                sfds.len()
            )));
        }
        sys::poll(&mut sfds, 0).map_err(|e| AmuxError::poller("poll", e))?;

        {
            let mut shared = self.inner.shared.lock();
            if slave.below_period()? {
                self.inner.arm(&mut shared);
            } else {
                shared.armed = false;
                self.inner
                    .user
                    .set()
                    .map_err(|e| AmuxError::poller("eventfd", e))?;
            }
            shared.generation = Some(slave.generation);
            shared.results = sfds.clone();
            shared.slave_fds = sfds;
        }
        self.inner.wake();
        Ok(())
    }

    fn poll_revents(
        &mut self,
        slave: &mut SlaveContext<'_>,
        pfds: &[PollDescriptor],
    ) -> Result<PollEvents, AmuxError> {
        let ours = pfds.len() == 1
            && pfds[0].fd == self.inner.user.as_raw_fd()
            && pfds[0].revents.contains(PollEvents::IN);
        if !ours {
            return Ok(PollEvents::EMPTY);
        }

        let mut shared = self.inner.shared.lock();
        if shared.generation != Some(slave.generation) {
            return Ok(PollEvents::EMPTY);
        }

        let mut revents = slave.device.poll_revents(&shared.results)?;
        if slave.below_period()? {
            // Woken too early: rearm and keep the caller blocked.
            self.inner.arm(&mut shared);
            drop(shared);
            self.inner.wake();
            revents.remove(PollEvents::IN | PollEvents::OUT);
        }
        Ok(revents)
    }

    fn transfer_done(&mut self, slave: &mut SlaveContext<'_>) -> Result<(), AmuxError> {
        if slave.below_period()? {
            let mut shared = self.inner.shared.lock();
            self.inner.arm(&mut shared);
            drop(shared);
            self.inner.wake();
        }
        Ok(())
    }
}

impl Drop for ThreadPoller {
    fn drop(&mut self) {
        self.inner.shared.lock().stop = true;
        self.inner.wake();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("thread poller: worker panicked");
            }
        }
    }
}
