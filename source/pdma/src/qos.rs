//! Runtime power votes.
//!
//! A channel with work queued on the hardware keeps the controller powered
//! by holding one runtime-PM reference. Each channel holds at most one such
//! reference, taken when work is issued and dropped when the channel runs
//! dry or is terminated. Clients that manage the controller's power
//! themselves opt out when requesting the channel.
use portable_atomic::{AtomicUsize, Ordering::*};

/// The platform's runtime power management for the controller.
///
/// Both operations are called with the channel's descriptor-queue lock held,
/// so implementations must not sleep.
pub trait RuntimePm: Send + Sync {
    /// Powers the controller up, if it isn't already, before returning.
    fn get_sync(&self);

    /// Drops one reference; the controller may be suspended once it is idle.
    fn put_autosuspend(&self);
}

/// A controller that is always powered.
#[derive(Copy, Clone, Debug, Default)]
pub struct AlwaysOn;

/// A [`RuntimePm`] that counts references.
#[derive(Debug, Default)]
pub struct PmCounter {
    active: AtomicUsize,
    gets: AtomicUsize,
}

/// One channel's vote.
#[derive(Debug)]
pub(crate) struct Vote {
    held: bool,
    client_managed: bool,
}

impl RuntimePm for AlwaysOn {
    #[inline]
    fn get_sync(&self) {}

    #[inline]
    fn put_autosuspend(&self) {}
}

// === impl PmCounter ===

impl PmCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    /// References currently held.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Acquire)
    }

    /// Total number of references ever taken.
    #[must_use]
    pub fn total_gets(&self) -> usize {
        self.gets.load(Acquire)
    }
}

impl RuntimePm for PmCounter {
    fn get_sync(&self) {
        self.gets.fetch_add(1, AcqRel);
        self.active.fetch_add(1, AcqRel);
    }

    fn put_autosuspend(&self) {
        let prev = self.active.fetch_sub(1, AcqRel);
        debug_assert!(prev > 0, "runtime PM reference count underflow");
    }
}

// === impl Vote ===

impl Vote {
    pub(crate) const fn new(client_managed: bool) -> Self {
        Self {
            held: false,
            client_managed,
        }
    }

    pub(crate) fn get(&mut self, pm: &dyn RuntimePm) {
        if self.client_managed || self.held {
            return;
        }
        self.held = true;
        pm.get_sync();
    }

    pub(crate) fn put(&mut self, pm: &dyn RuntimePm) {
        if self.client_managed || !self.held {
            return;
        }
        self.held = false;
        pm.put_autosuspend();
    }

    #[inline]
    pub(crate) fn is_held(&self) -> bool {
        self.held
    }
}
