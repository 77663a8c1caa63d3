use crate::models::error::AmuxError;
use crate::models::params::{Frames, HwParams, SwParams};
use crate::models::poll::{PollDescriptor, PollEvents};
use crate::processing::transfer::TransferBuffer;

/// Operations a host plugin layer invokes on a multiplexed stream.
///
/// The host serializes calls per stream. Every failure is an [`AmuxError`];
/// `AmuxError::errno()` gives the negative code for C callers.
pub trait PcmIoPlugin {
    /// Release the stream, the active slave and the poller.
    fn close(self) -> Result<(), AmuxError>
    where
        Self: Sized;

    fn start(&mut self) -> Result<(), AmuxError>;

    /// Stop and drop pending frames.
    fn stop(&mut self) -> Result<(), AmuxError>;

    fn prepare(&mut self) -> Result<(), AmuxError>;

    /// Negotiate hardware params; returns the refined caller-side params.
    fn configure_hw(&mut self, params: &HwParams) -> Result<HwParams, AmuxError>;

    /// Apply software params; returns the wraparound boundary.
    fn configure_sw(&mut self, params: &SwParams) -> Result<Frames, AmuxError>;

    /// Current hardware position, modulo the boundary.
    fn query_pointer(&mut self) -> Result<Frames, AmuxError>;

    /// Move exactly `size` frames at frame `offset` of the caller buffer.
    fn transfer(
        &mut self,
        areas: TransferBuffer<'_>,
        offset: Frames,
        size: Frames,
    ) -> Result<Frames, AmuxError>;

    fn poll_descriptor_count(&self) -> usize;

    fn poll_descriptors(&mut self) -> Result<Vec<PollDescriptor>, AmuxError>;

    fn poll_revents(&mut self, handles: &[PollDescriptor]) -> Result<PollEvents, AmuxError>;
}
