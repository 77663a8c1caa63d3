use crate::models::error::AmuxError;
use crate::models::params::Frames;
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::traits::pcm_device::PcmDevice;

/// View of the active slave handed to a poller on every call.
pub struct SlaveContext<'a> {
    pub device: &'a mut dyn PcmDevice,
    /// Bumped on every successful swap; identifies the device binding.
    pub generation: u64,
    /// Write-readiness low-water mark.
    pub period_size: Frames,
}

impl SlaveContext<'_> {
    /// Whether the slave has less than one period of room.
    pub(crate) fn below_period(&mut self) -> Result<bool, AmuxError> {
        Ok(self.device.avail_update()? < self.period_size)
    }
}

/// Readiness strategy presenting a fixed descriptor set to the caller over
/// whichever slave is currently active.
///
/// Implementations:
/// - `DupFdPoller`: fixed descriptor numbers rebound with `dup3`
/// - `EpollPoller`: one epoll instance, slave descriptors re-registered
/// - `ThreadPoller`: worker thread polls the slave, caller waits on an eventfd
pub trait Poller: Send {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Number of caller descriptors. Constant for the poller's lifetime.
    fn descriptors_count(&self) -> usize;

    /// Fill `pfds` (exactly `descriptors_count()` long) with caller descriptors.
    fn descriptors(&self, pfds: &mut [PollDescriptor]) -> Result<usize, AmuxError>;

    /// Re-bind to the slave's native descriptors after a swap or prepare.
    fn set_slave(&mut self, slave: &mut SlaveContext<'_>) -> Result<(), AmuxError>;

    /// Demangle the caller's poll result into the slave's true readiness.
    fn poll_revents(
        &mut self,
        slave: &mut SlaveContext<'_>,
        pfds: &[PollDescriptor],
    ) -> Result<PollEvents, AmuxError>;

    /// Called after each successful transfer.
    fn transfer_done(&mut self, _slave: &mut SlaveContext<'_>) -> Result<(), AmuxError> {
        Ok(())
    }
}
