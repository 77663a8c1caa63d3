use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::os::fd::RawFd;

/// Poll event bits, with the kernel `poll(2)` values.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PollEvents(i16);

impl PollEvents {
    pub const EMPTY: Self = Self(0);
    pub const IN: Self = Self(libc::POLLIN);
    pub const OUT: Self = Self(libc::POLLOUT);
    pub const ERR: Self = Self(libc::POLLERR);
    pub const HUP: Self = Self(libc::POLLHUP);
    pub const NVAL: Self = Self(libc::POLLNVAL);

    pub const fn from_bits(bits: i16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PollEvents {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for PollEvents {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::IN, "IN"),
            (Self::OUT, "OUT"),
            (Self::ERR, "ERR"),
            (Self::HUP, "HUP"),
            (Self::NVAL, "NVAL"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "PollEvents(EMPTY)")
        } else {
            write!(f, "PollEvents({})", set.join("|"))
        }
    }
}

/// One waitable descriptor with requested and returned events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDescriptor {
    pub fd: RawFd,
    pub events: PollEvents,
    pub revents: PollEvents,
}

impl PollDescriptor {
    pub fn new(fd: RawFd, events: PollEvents) -> Self {
        Self {
            fd,
            events,
            revents: PollEvents::EMPTY,
        }
    }

    pub(crate) fn to_raw(self) -> libc::pollfd {
        libc::pollfd {
            fd: self.fd,
            events: self.events.bits(),
            revents: self.revents.bits(),
        }
    }
}
