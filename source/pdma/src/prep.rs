//! Transfer preparation.
//!
//! Every transfer is built as a chain of descriptors, each moving at most
//! [`MAX_DESC_BYTES`]. Linear chains end with a descriptor that has the stop
//! flag and its end interrupt set; a cyclic chain instead links its last
//! descriptor back to its first and raises an end interrupt for every
//! period.
use alloc::{sync::Arc, vec::Vec};
use core::fmt;

use mycelium_bitfield::bitfield;

use crate::{
    channel::{ChanRef, Channel},
    cookie::Cookie,
    descriptor::{Dcmd, HwDescriptor, MAX_DESC_BYTES},
    errors::PrepError,
    pool::{DescPool, Slot},
    slave::Direction,
};

/// A completion callback. Runs on the engine's scheduler, with no channel
/// lock held, so it may call back into the channel.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

bitfield! {
    /// Flags recorded on a prepared transfer.
    #[derive(Eq, PartialEq)]
    pub struct TxFlags<u8> {
        /// The client wants the completion callback.
        pub const PREP_INTERRUPT: bool;
        /// The client will not reuse the descriptors.
        pub const CTRL_ACK: bool;
    }
}

/// One contiguous piece of host memory in a scatter-gather list.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    /// Bus address of the first byte.
    pub addr: u64,
    pub len: usize,
}

/// A prepared descriptor chain, owned by the client until it is submitted.
///
/// Dropping a `Transfer` without submitting it returns its descriptors to the
/// channel's pool.
#[must_use = "a prepared transfer does nothing until it is submitted"]
pub struct Transfer<D: HwDescriptor> {
    chan: ChanRef<D>,
    generation: u32,
    slots: Vec<Slot>,
    cyclic: bool,
    flags: TxFlags,
    callback: Option<Callback>,
    len: usize,
}

/// A chain under construction. Unless it is finished, dropping the builder
/// frees every descriptor it allocated.
struct Chain<'pool, D: HwDescriptor> {
    pool: &'pool mut DescPool<D>,
    slots: Vec<Slot>,
}

// === impl Channel ===

impl<D: HwDescriptor> Channel<D> {
    /// Prepares a memory-to-memory copy of `len` bytes from `src` to `dst`.
    ///
    /// The copy is split into descriptors of at most [`MAX_DESC_BYTES`],
    /// moved with the engine's maximum burst size.
    pub fn prepare_copy(
        &self,
        dst: u64,
        src: u64,
        len: usize,
        flags: TxFlags,
    ) -> Result<Transfer<D>, PrepError> {
        if len == 0 {
            return Err(PrepError::ZeroLength);
        }

        let chan = &self.chan;
        let mut guard = chan.lock();
        let st = &mut *guard;
        let pool = st.pool.as_mut().ok_or(PrepError::NoResources)?;
        let generation = pool.generation();

        let mut chain = Chain::new(pool);
        let mut byte_align = false;
        let (mut src, mut dst, mut left) = (src, dst, len);
        while left > 0 {
            let copy = left.min(MAX_DESC_BYTES as usize);
            if src & 7 != 0 || dst & 7 != 0 {
                byte_align = true;
            }
            let dcmd = chan.shared.copy_dcmd.with(Dcmd::LENGTH, copy as u32);
            chain.push(src, dst, dcmd)?;
            src += copy as u64;
            dst += copy as u64;
            left -= copy;
        }
        let slots = chain.finish();

        st.byte_align = byte_align;
        if st.dir.is_none() {
            st.dir = Some(Direction::MemToMem);
        }
        drop(guard);

        tracing::trace!(chan = chan.id, len, descriptors = slots.len(), "copy prepared");
        Ok(Transfer::new(chan.clone(), generation, slots, false, flags, len))
    }

    /// Prepares a peripheral transfer over a scatter-gather list, using the
    /// configuration stored by [`Channel::configure`].
    ///
    /// The host address advances through each segment while the peripheral
    /// address stays fixed.
    pub fn prepare_slave_sg(
        &self,
        segments: &[Segment],
        dir: Direction,
        flags: TxFlags,
    ) -> Result<Transfer<D>, PrepError> {
        if segments.is_empty() {
            return Err(PrepError::EmptyScatterList);
        }
        if segments.iter().any(|seg| seg.len == 0) {
            return Err(PrepError::ZeroLength);
        }

        let chan = &self.chan;
        let mut guard = chan.lock();
        let st = &mut *guard;
        let params = st.slave.params(dir).ok_or(PrepError::Direction(dir))?;
        let pool = st.pool.as_mut().ok_or(PrepError::NoResources)?;
        let generation = pool.generation();

        let mut chain = Chain::new(pool);
        let mut total = 0;
        for seg in segments {
            let mut addr = seg.addr;
            let mut left = seg.len;
            while left > 0 {
                let len = left.min(MAX_DESC_BYTES as usize);
                let dcmd = params.dcmd.with(Dcmd::LENGTH, len as u32);
                let (src, dst) = match dir {
                    Direction::MemToDev => (addr, params.dev_addr),
                    _ => (params.dev_addr, addr),
                };
                chain.push(src, dst, dcmd)?;
                addr += len as u64;
                left -= len;
            }
            total += seg.len;
        }
        let slots = chain.finish();

        st.byte_align = true;
        st.dir = Some(dir);
        drop(guard);

        tracing::trace!(
            chan = chan.id,
            ?dir,
            segments = segments.len(),
            descriptors = slots.len(),
            "slave transfer prepared"
        );
        Ok(Transfer::new(chan.clone(), generation, slots, false, flags, total))
    }

    /// Prepares a peripheral transfer of one contiguous buffer.
    pub fn prepare_slave_single(
        &self,
        addr: u64,
        len: usize,
        dir: Direction,
        flags: TxFlags,
    ) -> Result<Transfer<D>, PrepError> {
        self.prepare_slave_sg(&[Segment { addr, len }], dir, flags)
    }

    /// Prepares a cyclic peripheral transfer: a ring of `len / period`
    /// descriptors over `buf` that repeats until the channel is terminated.
    ///
    /// The transfer's callback runs each time a period completes.
    pub fn prepare_cyclic(
        &self,
        buf: u64,
        len: usize,
        period: usize,
        dir: Direction,
        flags: TxFlags,
    ) -> Result<Transfer<D>, PrepError> {
        if len == 0 || period == 0 {
            return Err(PrepError::ZeroLength);
        }
        if len % period != 0 {
            return Err(PrepError::CyclicLength { len, period });
        }
        if period > MAX_DESC_BYTES as usize {
            return Err(PrepError::PeriodTooLong(period));
        }

        let chan = &self.chan;
        let mut guard = chan.lock();
        let st = &mut *guard;
        let params = st.slave.params(dir).ok_or(PrepError::Direction(dir))?;
        let pool = st.pool.as_mut().ok_or(PrepError::NoResources)?;
        let generation = pool.generation();

        let dcmd = params
            .dcmd
            .with(Dcmd::LENGTH, period as u32)
            .with(Dcmd::END_IRQ_EN, true);
        let mut chain = Chain::new(pool);
        let mut addr = buf;
        for _ in 0..len / period {
            let (src, dst) = match dir {
                Direction::MemToDev => (addr, params.dev_addr),
                _ => (params.dev_addr, addr),
            };
            chain.push(src, dst, dcmd)?;
            addr += period as u64;
        }
        let slots = chain.finish_ring();

        st.dir = Some(dir);
        drop(guard);

        tracing::trace!(chan = chan.id, ?dir, len, period, "cyclic transfer prepared");
        Ok(Transfer::new(chan.clone(), generation, slots, true, flags, len))
    }
}

// === impl Transfer ===

impl<D: HwDescriptor> Transfer<D> {
    fn new(
        chan: ChanRef<D>,
        generation: u32,
        slots: Vec<Slot>,
        cyclic: bool,
        flags: TxFlags,
        len: usize,
    ) -> Self {
        Self {
            chan,
            generation,
            slots,
            cyclic,
            flags,
            callback: None,
            len,
        }
    }

    /// Sets the function called when this transfer completes (or, for a
    /// cyclic transfer, when each period completes).
    pub fn set_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.callback = Some(Arc::new(callback));
    }

    #[must_use]
    pub fn flags(&self) -> TxFlags {
        self.flags
    }

    /// Total bytes moved by the transfer (one trip around the ring, for a
    /// cyclic transfer).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// A copy of the descriptor chain as the hardware will fetch it, with
    /// each descriptor's bus address.
    #[must_use]
    pub fn hw_descriptors(&self) -> Vec<(u64, D)> {
        let st = self.chan.lock();
        match st.pool.as_ref() {
            Some(pool) if pool.generation() == self.generation => self
                .slots
                .iter()
                .map(|slot| (slot.bus, pool.get(slot.idx).clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Queues the transfer on its channel. It starts once the channel is
    /// issued.
    ///
    /// Returns the cookie identifying the transfer, or [`Cookie::BUSY`] if
    /// the channel's resources were freed after the transfer was prepared.
    pub fn submit(mut self) -> Cookie {
        let slots = core::mem::take(&mut self.slots);
        let callback = self.callback.take();
        self.chan
            .submit(self.generation, &slots, self.cyclic, callback)
    }
}

impl<D: HwDescriptor> Drop for Transfer<D> {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let mut st = self.chan.lock();
        if let Some(pool) = st.pool.as_mut() {
            if pool.generation() == self.generation {
                for slot in &self.slots {
                    pool.free(slot.idx);
                }
            }
        }
    }
}

impl<D: HwDescriptor> fmt::Debug for Transfer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("chan", &self.chan.id)
            .field("descriptors", &self.slots.len())
            .field("len", &self.len)
            .field("cyclic", &self.cyclic)
            .field("flags", &self.flags)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

// === impl Chain ===

impl<'pool, D: HwDescriptor> Chain<'pool, D> {
    fn new(pool: &'pool mut DescPool<D>) -> Self {
        Self {
            pool,
            slots: Vec::new(),
        }
    }

    /// Appends a descriptor, linking the previous one to it.
    fn push(&mut self, src: u64, dst: u64, dcmd: Dcmd) -> Result<(), PrepError> {
        let slot = self.pool.alloc()?;
        let desc = self.pool.get_mut(slot.idx);
        desc.set_source(src);
        desc.set_target(dst);
        desc.set_command(dcmd);

        if let Some(prev) = self.slots.last() {
            self.pool.get_mut(prev.idx).set_next(slot.bus);
        }
        self.slots.push(slot);
        Ok(())
    }

    /// Terminates the chain: the last descriptor stops the channel and raises
    /// the end interrupt.
    fn finish(mut self) -> Vec<Slot> {
        if let Some(last) = self.slots.last() {
            let desc = self.pool.get_mut(last.idx);
            desc.set_stop();
            desc.set_command(desc.command().with(Dcmd::END_IRQ_EN, true));
        }
        core::mem::take(&mut self.slots)
    }

    /// Closes the chain into a ring.
    fn finish_ring(mut self) -> Vec<Slot> {
        if let (Some(first), Some(last)) = (self.slots.first(), self.slots.last()) {
            let first = first.bus;
            self.pool.get_mut(last.idx).set_next(first);
        }
        core::mem::take(&mut self.slots)
    }
}

impl<D: HwDescriptor> Drop for Chain<'_, D> {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        tracing::debug!(allocated = self.slots.len(), "abandoning descriptor chain");
        for slot in self.slots.drain(..) {
            self.pool.free(slot.idx);
        }
    }
}
