//! Interrupt handling and deferred completion.
//!
//! The interrupt handler does as little as possible: it acknowledges the
//! channel's status bits and counts one unit of deferred work for the
//! virtual channel that owns it. Each virtual channel has one completion
//! task, spawned when its resources are allocated, which retires one chain
//! per counted interrupt. Since a channel only ever has one such task, its
//! completions never run concurrently with each other.
use alloc::sync::Arc;

use maitake::sync::WaitCell;
use portable_atomic::{AtomicUsize, Ordering::*};

use crate::{
    channel::ChanRef,
    descriptor::HwDescriptor,
    regs::Dcsr,
    Shared,
};

/// Deferred work for one channel's completion task.
pub(crate) struct Deferred {
    cell: WaitCell,
    /// Interrupts not yet processed by the task.
    pending: AtomicUsize,
}

// === impl Deferred ===

impl Deferred {
    pub(crate) fn new() -> Self {
        Self {
            cell: WaitCell::new(),
            pending: AtomicUsize::new(0),
        }
    }

    /// Called from interrupt context.
    pub(crate) fn schedule(&self) {
        self.pending.fetch_add(1, AcqRel);
        self.cell.wake();
    }

    /// Stops the completion task. Unprocessed interrupts are dropped.
    pub(crate) fn cancel(&self) {
        self.cell.close();
    }

    /// Forgets interrupts counted but not yet processed.
    pub(crate) fn clear(&self) {
        self.pending.store(0, Release);
    }

    fn take(&self) -> bool {
        self.pending
            .fetch_update(AcqRel, Acquire, |pending| pending.checked_sub(1))
            .is_ok()
    }
}

/// A channel's completion task.
pub(crate) async fn run_completions<D: HwDescriptor>(chan: ChanRef<D>, work: Arc<Deferred>) {
    loop {
        // subscribe before draining, so that an interrupt arriving while we
        // drain is not missed.
        let wait = work.cell.subscribe().await;
        while work.take() {
            chan.complete();
        }

        if wait.await.is_err() {
            tracing::trace!(chan = chan.id, "completion task cancelled");
            return;
        }
    }
}

// === impl Shared ===

impl<D: HwDescriptor> Shared<D> {
    /// Acknowledges physical channel `phy`'s interrupt and schedules its
    /// owner's completion work.
    ///
    /// Returns `false` if the channel had no interrupt pending.
    pub(crate) fn handle_phy_irq(&self, phy: u8) -> bool {
        critical_section::with(|cs| {
            if self.regs.dint() & (1 << phy) == 0 {
                return false;
            }

            let dcsr = self.regs.dcsr(phy);
            self.regs.set_dcsr(phy, dcsr);

            let owner = self.phys.owner(cs, phy);
            if dcsr.get(Dcsr::BUS_ERR) {
                if let Some(vchan) = owner {
                    tracing::warn!(phy, vchan, %dcsr, "DMA bus error");
                }
            }

            match owner {
                Some(vchan) => self.chans[vchan as usize].schedule_completion(cs),
                None => tracing::debug!(phy, "interrupt on unassigned channel"),
            }
            true
        })
    }
}
