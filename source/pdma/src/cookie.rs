//! Transfer cookies.
//!
//! Every descriptor of a submitted chain receives the next cookie of its
//! channel. A chain is identified by the cookie of its last descriptor, and
//! chains complete in cookie order, so one "last completed" watermark is
//! enough to answer whether any cookie has finished.
use core::fmt;

/// Identifies a submitted transfer on its channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Cookie(i32);

/// Where a cookie is in its lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Progress {
    Complete,
    InFlight,
    /// Never handed out by this channel.
    Unknown,
}

/// Per-channel cookie counters.
#[derive(Debug)]
pub(crate) struct Cookies {
    last_used: i32,
    last_completed: i32,
    wrapped: bool,
}

// === impl Cookie ===

impl Cookie {
    /// The first cookie a channel hands out.
    pub const MIN: Self = Self(1);

    /// Returned when a transfer is submitted to a channel whose resources
    /// were freed after the transfer was prepared. Never completes.
    pub const BUSY: Self = Self(-16);

    /// Wraps a raw cookie value, as returned by [`Cookie::get`].
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// === impl Cookies ===

impl Cookies {
    pub(crate) const fn new() -> Self {
        Self {
            last_used: 0,
            last_completed: 0,
            wrapped: false,
        }
    }

    /// Hands out the next cookie, wrapping back to [`Cookie::MIN`] after
    /// `i32::MAX`.
    pub(crate) fn assign(&mut self) -> Cookie {
        self.last_used = match self.last_used.checked_add(1) {
            Some(next) => next,
            None => {
                self.wrapped = true;
                Cookie::MIN.0
            }
        };
        Cookie(self.last_used)
    }

    pub(crate) fn complete(&mut self, cookie: Cookie) {
        self.last_completed = cookie.0;
    }

    pub(crate) fn progress(&self, cookie: Cookie) -> Progress {
        let c = cookie.0;
        if c < Cookie::MIN.0 || (!self.wrapped && c > self.last_used) {
            return Progress::Unknown;
        }

        let (completed, used) = (self.last_completed, self.last_used);
        let done = if completed <= used {
            c <= completed || c > used
        } else {
            c <= completed && c > used
        };

        if done {
            Progress::Complete
        } else {
            Progress::InFlight
        }
    }
}
