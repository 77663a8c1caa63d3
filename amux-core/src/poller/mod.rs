pub mod dupfd;
pub mod epoller;
pub mod registry;
pub mod sys;
pub mod thread;

pub use dupfd::DupFdPoller;
pub use epoller::EpollPoller;
pub use registry::{PollerFactory, PollerRegistry};
pub use thread::ThreadPoller;
