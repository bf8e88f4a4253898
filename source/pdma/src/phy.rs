//! The physical channel allocator.
//!
//! Virtual channels only hold a physical channel while they have work
//! running. Every allocation scans the physical channels from the highest
//! priority group to the lowest, so a channel that gives its physical
//! channel back between transfers may get a better one on its next issue.
//!
//! The hardware groups channels four at a time into priority levels: level 0
//! is channels 0-3 (and 16-19), level 1 is channels 4-7 (and 20-23) and so
//! on. Channels named in the reservation table never take part in the scan;
//! they can only be handed to the request line they are reserved for.
use core::cell::RefCell;

use alloc::{boxed::Box, vec};
use critical_section::{CriticalSection, Mutex};
use k1x_pdma_config::PdmaConfig;

pub(crate) struct PhyTable {
    /// The virtual channel each physical channel is assigned to.
    owners: Mutex<RefCell<Box<[Option<u8>]>>>,
    /// Holds the reservation table.
    config: PdmaConfig,
}

/// Priority level of physical channel `idx`.
#[inline]
fn priority(idx: usize) -> usize {
    (idx & 0xf) >> 2
}

impl PhyTable {
    pub(crate) fn new(config: &PdmaConfig) -> Self {
        Self {
            owners: Mutex::new(RefCell::new(
                vec![None; config.channels as usize].into_boxed_slice(),
            )),
            config: config.clone(),
        }
    }

    /// Assigns a free physical channel to virtual channel `vchan`, which
    /// serves `request_line`.
    pub(crate) fn acquire(&self, cs: CriticalSection<'_>, vchan: u8, request_line: u32) -> Option<u8> {
        let mut owners = self.owners.borrow_ref_mut(cs);

        if let Some(phy) = self.config.reservation_for(request_line) {
            let slot = owners.get_mut(phy as usize)?;
            if slot.is_some() {
                return None;
            }
            *slot = Some(vchan);
            return Some(phy);
        }

        let n = owners.len();
        if n == 0 {
            return None;
        }
        for prio in 0..=priority(n - 1) {
            for idx in (0..n).filter(|&idx| priority(idx) == prio) {
                if self.config.is_reserved(idx as u8) || owners[idx].is_some() {
                    continue;
                }
                owners[idx] = Some(vchan);
                return Some(idx as u8);
            }
        }

        None
    }

    /// Unassigns physical channel `phy`. Releasing an unassigned channel does
    /// nothing.
    pub(crate) fn release(&self, cs: CriticalSection<'_>, phy: u8) {
        if let Some(slot) = self.owners.borrow_ref_mut(cs).get_mut(phy as usize) {
            *slot = None;
        }
    }

    /// The virtual channel physical channel `phy` is assigned to.
    pub(crate) fn owner(&self, cs: CriticalSection<'_>, phy: u8) -> Option<u8> {
        self.owners
            .borrow_ref(cs)
            .get(phy as usize)
            .copied()
            .flatten()
    }
}
