//! Per-channel descriptor pools.
//!
//! A pool is a fixed number of descriptor slots in storage that never moves
//! while the pool exists, so the bus address of a slot can be handed to the
//! hardware. Free slots are tracked in a bitmap and the lowest free slot is
//! always handed out first.
use core::mem;

use alloc::{boxed::Box, vec, vec::Vec};
use k1x_pdma_config::PoolConfig;

use crate::{
    descriptor::HwDescriptor,
    errors::{AllocError, ConfigError},
};

pub(crate) struct DescPool<D> {
    slots: Box<[D]>,
    /// One bit per slot, set while the slot is allocated.
    used: Vec<u64>,
    in_use: usize,
    /// Bus address of slot 0 when descriptors live in a fixed bus window.
    window: Option<u64>,
    generation: u32,
}

/// An allocated descriptor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Slot {
    pub(crate) idx: usize,
    /// The address the hardware fetches this descriptor from.
    pub(crate) bus: u64,
}

/// Checks that `config` describes a pool the descriptor format `D` can use.
pub(crate) fn validate<D: HwDescriptor>(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.capacity == 0 {
        return Err(ConfigError::EmptyPool);
    }

    let Some(base) = config.bus_base else {
        return Ok(());
    };

    let align = mem::align_of::<D>();
    if base % align as u64 != 0 {
        return Err(ConfigError::MisalignedPoolWindow { base, align });
    }

    let end = base.saturating_add((config.capacity * mem::size_of::<D>()) as u64);
    if !D::LONG_ADDRESSING && end > u32::MAX as u64 + 1 {
        return Err(ConfigError::PoolWindowTooHigh { base, end });
    }

    Ok(())
}

impl<D: HwDescriptor> DescPool<D> {
    pub(crate) fn new(config: &PoolConfig, generation: u32) -> Self {
        let slots = (0..config.capacity).map(|_| D::zeroed()).collect();
        Self {
            slots,
            used: vec![0; (config.capacity + 63) / 64],
            in_use: 0,
            window: config.bus_base,
            generation,
        }
    }

    /// Allocates a zeroed descriptor.
    pub(crate) fn alloc(&mut self) -> Result<Slot, AllocError> {
        let Some(idx) = self.find_free() else {
            tracing::error!(
                capacity = self.capacity(),
                "out of memory for link descriptor"
            );
            return Err(AllocError::PoolExhausted {
                capacity: self.capacity(),
            });
        };

        self.used[idx / 64] |= 1 << (idx % 64);
        self.in_use += 1;
        self.slots[idx] = D::zeroed();
        Ok(Slot {
            idx,
            bus: self.bus_addr(idx),
        })
    }

    pub(crate) fn free(&mut self, idx: usize) {
        let bit = 1 << (idx % 64);
        debug_assert!(
            self.used[idx / 64] & bit != 0,
            "descriptor {idx} freed twice"
        );
        if self.used[idx / 64] & bit != 0 {
            self.used[idx / 64] &= !bit;
            self.in_use -= 1;
        }
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> &D {
        &self.slots[idx]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut D {
        &mut self.slots[idx]
    }

    #[inline]
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    fn find_free(&self) -> Option<usize> {
        self.used
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(i, word)| i * 64 + word.trailing_ones() as usize)
            .filter(|&idx| idx < self.capacity())
    }

    fn bus_addr(&self, idx: usize) -> u64 {
        let offset = (idx * mem::size_of::<D>()) as u64;
        match self.window {
            Some(base) => base + offset,
            None => self.slots.as_ptr() as usize as u64 + offset,
        }
    }
}
