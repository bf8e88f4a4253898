//! Virtual channels.
//!
//! A virtual channel owns two descriptor queues. Submitted chains wait on the
//! *pending* queue until they are issued; issuing moves the next chain onto
//! the *running* queue and points a physical channel at it. When the chain's
//! last descriptor raises its end interrupt, the channel's completion task
//! retires it, starts whatever is pending, and runs the client's callbacks
//! with the queue lock released.
use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::{cell::RefCell, fmt};

use mycelium_util::sync::spin::{Mutex, MutexGuard};

use crate::{
    cookie::{Cookie, Cookies, Progress},
    descriptor::{HwDescriptor, ShortDescriptor},
    errors::{ConfigError, PauseError},
    irq::{self, Deferred},
    pool::{DescPool, Slot},
    prep::Callback,
    qos::Vote,
    regs::DRCMR_INVALID,
    residue::{self, Span},
    slave::{Direction, SlaveConfig},
    Shared,
};

/// A client's DMA specifier: the two cells of a `dmas` reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DmaSpec {
    /// The peripheral request line the channel serves.
    pub request_line: u32,
    /// The client takes runtime power references itself, so the channel
    /// never does.
    pub client_manages_power: bool,
}

impl DmaSpec {
    /// Translates the `<request-line flags>` cells of a device tree `dmas`
    /// property. Any nonzero flag means the client manages power.
    #[must_use]
    pub const fn from_cells(cells: [u32; 2]) -> Self {
        Self {
            request_line: cells[0],
            client_manages_power: cells[1] != 0,
        }
    }
}

/// The state of a channel, or of one of its transfers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// The channel has no resources allocated.
    Idle,
    /// The hardware is executing a chain.
    InProgress,
    /// The hardware was stopped mid-chain by [`Channel::pause`].
    Paused,
    /// Nothing is running.
    Complete,
    /// The cookie was never handed out by this channel.
    Error,
}

/// The result of [`Channel::tx_status`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxState {
    pub status: Status,
    /// Bytes the transfer has yet to move.
    pub residue: u32,
}

/// A virtual DMA channel, claimed with
/// [`Pdma::request_channel`](crate::Pdma::request_channel).
///
/// Dropping the handle frees the channel's resources, discarding any queued
/// transfers, and returns the virtual channel to the engine.
pub struct Channel<D: HwDescriptor = ShortDescriptor> {
    pub(crate) chan: ChanRef<D>,
}

/// A reference to one of the engine's virtual channels, shared by the client
/// handle, its transfers, and its completion task.
pub(crate) struct ChanRef<D: HwDescriptor> {
    pub(crate) shared: Arc<Shared<D>>,
    pub(crate) id: u8,
}

pub(crate) struct VirtChan<D: HwDescriptor> {
    state: Mutex<ChanState<D>>,
    /// Wakes the completion task. Shared with the interrupt handler, so only
    /// accessed with interrupts masked.
    work: critical_section::Mutex<RefCell<Option<Arc<Deferred>>>>,
}

pub(crate) struct ChanState<D: HwDescriptor> {
    pub(crate) status: Status,
    pub(crate) request_line: u32,
    vote: Vote,
    /// Direction of the last prepared transfer; selects which live address
    /// register tracks progress.
    pub(crate) dir: Option<Direction>,
    pub(crate) slave: SlaveConfig,
    /// Program `DALGN` for this channel on the next start.
    pub(crate) byte_align: bool,
    pending: VecDeque<Queued>,
    running: VecDeque<Queued>,
    /// Set while the submitted work is a cyclic ring.
    cyclic: Option<Cyclic>,
    /// Residue snapshot taken when the last chain completed.
    bytes_residue: u32,
    phy: Option<u8>,
    pub(crate) pool: Option<DescPool<D>>,
    /// Generation of the most recently created pool.
    generation: u32,
    cookies: Cookies,
}

/// One submitted descriptor.
struct Queued {
    slot: Slot,
    cookie: Cookie,
    callback: Option<Callback>,
}

struct Cyclic {
    callback: Option<Callback>,
}

// === impl Channel ===

impl<D: HwDescriptor> Channel<D> {
    pub(crate) fn new(chan: ChanRef<D>) -> Self {
        Self { chan }
    }

    /// This channel's index within the engine.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.chan.id
    }

    /// The peripheral request line this channel serves.
    #[must_use]
    pub fn request_line(&self) -> u32 {
        self.chan.lock().request_line
    }

    /// The current channel status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.chan.lock().status
    }

    /// The physical channel currently executing this channel's work, if any.
    #[must_use]
    pub fn physical_channel(&self) -> Option<u8> {
        self.chan.lock().phy
    }

    /// Number of descriptors allocated from this channel's pool, including
    /// those of prepared transfers that were not submitted yet.
    #[must_use]
    pub fn descriptors_in_use(&self) -> usize {
        self.chan
            .lock()
            .pool
            .as_ref()
            .map(DescPool::in_use)
            .unwrap_or(0)
    }

    /// Allocates the channel's descriptor pool and starts its completion
    /// task. Does nothing if resources are already allocated.
    pub fn allocate_resources(&self) {
        self.chan.allocate_resources()
    }

    /// Frees the channel's descriptor pool, discarding every queued
    /// transfer without running its callback, and stops the completion task.
    pub fn free_resources(&self) {
        self.chan.free_resources()
    }

    /// Stores the peripheral-side configuration for subsequent slave
    /// transfers.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(())` if the configuration was stored.
    /// - [`Err`]`(`[`ConfigError::SlaveBurst`]`)` if a burst size cannot be
    ///   programmed. The previous configuration is kept.
    pub fn configure(&self, config: &SlaveConfig) -> Result<(), ConfigError> {
        if let Some(burst) = config.unsupported_burst() {
            return Err(ConfigError::SlaveBurst(burst));
        }
        self.chan.lock().slave = *config;
        Ok(())
    }

    /// Starts executing submitted transfers, if the channel isn't already
    /// busy.
    pub fn issue_pending(&self) {
        self.chan.issue_pending()
    }

    /// Stops the hardware mid-chain.
    ///
    /// A paused channel keeps its queues and its physical channel, so the
    /// progress of the interrupted transfer can still be read with
    /// [`Channel::tx_status`].
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(())` if the hardware was stopped.
    /// - [`Err`]`(`[`PauseError::NotRunning`]`)` if the channel holds no
    ///   physical channel.
    pub fn pause(&self) -> Result<(), PauseError> {
        self.chan.pause()
    }

    /// Stops the hardware and discards every queued transfer, without
    /// running their callbacks.
    pub fn terminate_all(&self) {
        self.chan.terminate_all()
    }

    /// Reports the state of the transfer identified by `cookie`, and the
    /// bytes it has yet to move.
    #[must_use]
    pub fn tx_status(&self, cookie: Cookie) -> TxState {
        self.chan.tx_status(cookie)
    }
}

impl<D: HwDescriptor> Drop for Channel<D> {
    fn drop(&mut self) {
        self.chan.free_resources();
        self.chan.shared.release_claim(self.chan.id);
    }
}

impl<D: HwDescriptor> fmt::Debug for Channel<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.chan.lock();
        f.debug_struct("Channel")
            .field("id", &self.chan.id)
            .field("request_line", &st.request_line)
            .field("status", &st.status)
            .field("phy", &st.phy)
            .field("pending", &st.pending.len())
            .field("running", &st.running.len())
            .field("cyclic", &st.cyclic.is_some())
            .finish()
    }
}

// === impl ChanRef ===

impl<D: HwDescriptor> Clone for ChanRef<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            id: self.id,
        }
    }
}

impl<D: HwDescriptor> ChanRef<D> {
    pub(crate) fn new(shared: Arc<Shared<D>>, id: u8) -> Self {
        Self { shared, id }
    }

    fn vchan(&self) -> &VirtChan<D> {
        &self.shared.chans[self.id as usize]
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChanState<D>> {
        self.vchan().state.lock()
    }

    pub(crate) fn bind(&self, spec: DmaSpec) {
        let mut st = self.lock();
        st.request_line = spec.request_line;
        st.vote = Vote::new(spec.client_manages_power);
        st.dir = None;
        st.slave = SlaveConfig::default();
        st.byte_align = false;
    }

    #[tracing::instrument(level = "debug", skip(self), fields(chan = self.id))]
    fn allocate_resources(&self) {
        {
            let mut st = self.lock();
            if st.pool.is_some() {
                return;
            }
            st.generation = st.generation.wrapping_add(1);
            st.pool = Some(DescPool::new(&self.shared.pool, st.generation));
            st.status = Status::Complete;
        }

        let work = Arc::new(Deferred::new());
        critical_section::with(|cs| {
            self.vchan().work.borrow_ref_mut(cs).replace(work.clone());
        });
        self.shared
            .scheduler
            .spawn(irq::run_completions(self.clone(), work));

        tracing::debug!(capacity = self.shared.pool.capacity, "channel resources allocated");
    }

    #[tracing::instrument(level = "debug", skip(self), fields(chan = self.id))]
    fn free_resources(&self) {
        let work = critical_section::with(|cs| self.vchan().work.borrow_ref_mut(cs).take());
        if let Some(work) = work {
            work.cancel();
        }

        let mut guard = self.lock();
        let st = &mut *guard;
        if let Some(phy) = st.phy {
            self.shared.disable_chan(phy);
        }
        self.release_phy(st);
        let discarded = st.drain_queues();
        let cyclic = st.cyclic.take();
        st.pool = None;
        st.status = Status::Idle;
        st.bytes_residue = 0;
        st.dir = None;
        st.slave = SlaveConfig::default();
        st.byte_align = false;
        st.vote.put(&*self.shared.pm);
        drop(guard);

        if !discarded.is_empty() {
            tracing::debug!(discarded = discarded.len(), "channel resources freed");
        }
        drop((discarded, cyclic));
    }

    /// Queues a prepared chain, returning the cookie of its last descriptor.
    pub(crate) fn submit(
        &self,
        generation: u32,
        slots: &[Slot],
        cyclic: bool,
        callback: Option<Callback>,
    ) -> Cookie {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.pool.as_ref().map(DescPool::generation) != Some(generation) {
            tracing::warn!(
                chan = self.id,
                "transfer submitted after the channel's resources were freed"
            );
            return Cookie::BUSY;
        }

        let mut callback = if cyclic {
            st.cyclic = Some(Cyclic {
                callback: callback.clone(),
            });
            None
        } else {
            st.cyclic = None;
            callback
        };

        let mut cookie = Cookie::BUSY;
        for &slot in slots {
            cookie = st.cookies.assign();
            st.pending.push_back(Queued {
                slot,
                cookie,
                callback: callback.take(),
            });
        }

        tracing::trace!(
            chan = self.id,
            %cookie,
            descriptors = slots.len(),
            cyclic,
            "transfer submitted"
        );
        cookie
    }

    #[tracing::instrument(level = "debug", skip(self), fields(chan = self.id))]
    fn issue_pending(&self) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let pm = &*self.shared.pm;
        st.vote.get(pm);
        if !self.start_pending(st) && st.status != Status::InProgress {
            st.vote.put(pm);
        }
    }

    /// Moves the next pending chain to the running queue and starts the
    /// hardware on it.
    ///
    /// Returns `false` if nothing was started: the hardware is still busy,
    /// nothing is pending (in which case the physical channel is given back),
    /// or no physical channel is free.
    fn start_pending(&self, st: &mut ChanState<D>) -> bool {
        if st.status == Status::InProgress {
            tracing::trace!(chan = self.id, "DMA controller still busy");
            return false;
        }

        if st.pending.is_empty() {
            self.release_phy(st);
            tracing::trace!(chan = self.id, "no pending list");
            return false;
        }

        let phy = match st.phy {
            Some(phy) => phy,
            None => {
                let request_line = st.request_line;
                let acquired = critical_section::with(|cs| {
                    self.shared.phys.acquire(cs, self.id, request_line)
                });
                match acquired {
                    Some(phy) => {
                        st.phy = Some(phy);
                        phy
                    }
                    None => {
                        tracing::debug!(chan = self.id, request_line, "no free dma channel");
                        return false;
                    }
                }
            }
        };

        let Some(pool) = st.pool.as_ref() else {
            return false;
        };
        while let Some(queued) = st.pending.pop_front() {
            let stop = pool.get(queued.slot.idx).is_stop();
            st.running.push_back(queued);
            if stop {
                break;
            }
        }

        let Some(first) = st.running.front() else {
            return false;
        };
        self.shared
            .regs
            .set_descriptor_addr(phy, first.slot.bus, D::LONG_ADDRESSING);
        self.shared.enable_chan(phy, st.request_line, st.byte_align);
        st.status = Status::InProgress;
        st.bytes_residue = 0;

        tracing::trace!(chan = self.id, phy, running = st.running.len(), "chain started");
        true
    }

    fn release_phy(&self, st: &mut ChanState<D>) {
        if let Some(phy) = st.phy.take() {
            self.shared.free_phy(phy, st.request_line);
            tracing::trace!(chan = self.id, phy, "physical channel released");
        }
    }

    /// Retires the chain whose end interrupt fired, starts the next one, and
    /// runs the retired chain's callbacks.
    pub(crate) fn complete(&self) {
        let mut guard = self.lock();
        let st = &mut *guard;
        if matches!(st.status, Status::Complete | Status::Idle) {
            return;
        }

        if let Some(cyclic) = st.cyclic.as_ref() {
            let callback = cyclic.callback.clone();
            drop(guard);
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        let Some(pool) = st.pool.as_ref() else {
            return;
        };
        let chain_end = st
            .running
            .iter()
            .find(|queued| pool.get(queued.slot.idx).ends_chain())
            .map(|queued| queued.cookie);
        if let Some(cookie) = chain_end {
            st.bytes_residue = self.residue_locked(st, cookie);
        }

        let mut done = Vec::new();
        while let Some(queued) = st.running.pop_front() {
            let ends_chain = st
                .pool
                .as_ref()
                .map_or(false, |pool| pool.get(queued.slot.idx).ends_chain());
            if ends_chain {
                st.cookies.complete(queued.cookie);
            }
            done.push(queued);
            if ends_chain {
                break;
            }
        }

        st.status = if st.running.is_empty() {
            Status::Complete
        } else {
            Status::InProgress
        };

        let pm = &*self.shared.pm;
        if !self.start_pending(st) && st.status != Status::InProgress {
            st.vote.put(pm);
        }

        if let Some(pool) = st.pool.as_mut() {
            for queued in &done {
                pool.free(queued.slot.idx);
            }
        }
        drop(guard);

        tracing::trace!(chan = self.id, retired = done.len(), "chain complete");
        for callback in done.into_iter().filter_map(|queued| queued.callback) {
            callback();
        }
    }

    fn pause(&self) -> Result<(), PauseError> {
        let mut st = self.lock();
        let phy = st.phy.ok_or(PauseError::NotRunning)?;
        self.shared.disable_chan(phy);
        st.status = Status::Paused;
        tracing::debug!(chan = self.id, phy, "channel paused");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(chan = self.id))]
    pub(crate) fn terminate_all(&self) {
        let mut guard = self.lock();
        let st = &mut *guard;
        if let Some(phy) = st.phy {
            self.shared.disable_chan(phy);
        }
        // interrupts counted for the discarded chains must not retire the
        // next one
        critical_section::with(|cs| self.vchan().discard_completions(cs));
        st.status = if st.pool.is_some() {
            Status::Complete
        } else {
            Status::Idle
        };
        self.release_phy(st);
        let discarded = st.drain_queues();
        let cyclic = st.cyclic.take();
        st.bytes_residue = 0;
        st.vote.put(&*self.shared.pm);
        drop(guard);

        tracing::debug!(discarded = discarded.len(), "channel terminated");
        drop((discarded, cyclic));
    }

    fn tx_status(&self, cookie: Cookie) -> TxState {
        let st = self.lock();
        match st.cookies.progress(cookie) {
            Progress::Unknown => TxState {
                status: Status::Error,
                residue: 0,
            },
            Progress::Complete => TxState {
                status: Status::Complete,
                residue: self.residue_locked(&st, cookie),
            },
            Progress::InFlight => TxState {
                status: st.status,
                residue: self.residue_locked(&st, cookie),
            },
        }
    }

    /// Bytes remaining in the chain identified by `cookie`.
    ///
    /// Once the channel has given its physical channel back, this is the
    /// snapshot taken when the last chain completed. A chain ended early by
    /// its peripheral (end of request) keeps the bytes it never moved.
    fn residue_locked(&self, st: &ChanState<D>, cookie: Cookie) -> u32 {
        let Some(pool) = st.pool.as_ref() else {
            return st.bytes_residue;
        };
        let dir = st.dir.unwrap_or(Direction::MemToMem);
        let spans = |queue: &VecDeque<Queued>| {
            queue
                .iter()
                .map(|queued| {
                    let desc = pool.get(queued.slot.idx);
                    Span {
                        start: desc.host_addr(dir),
                        len: desc.len(),
                        ends_chain: desc.ends_chain(),
                        cookie: queued.cookie,
                    }
                })
                .collect::<Vec<_>>()
        };

        if let Some(phy) = st.phy {
            let curr = match dir {
                Direction::DevToMem => self.shared.regs.target_addr(phy, D::LONG_ADDRESSING),
                Direction::MemToDev | Direction::MemToMem => {
                    self.shared.regs.source_addr(phy, D::LONG_ADDRESSING)
                }
            };
            if let Some(residue) =
                residue::walk(curr, spans(&st.running), st.cyclic.is_some(), cookie)
            {
                return residue;
            }
        }

        match residue::queued(spans(&st.pending), cookie) {
            Some(residue) => residue,
            None if st.phy.is_some() => 0,
            None => st.bytes_residue,
        }
    }
}

// === impl VirtChan ===

impl<D: HwDescriptor> VirtChan<D> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ChanState {
                status: Status::Idle,
                request_line: DRCMR_INVALID,
                vote: Vote::new(false),
                dir: None,
                slave: SlaveConfig::default(),
                byte_align: false,
                pending: VecDeque::new(),
                running: VecDeque::new(),
                cyclic: None,
                bytes_residue: 0,
                phy: None,
                pool: None,
                generation: 0,
                cookies: Cookies::new(),
            }),
            work: critical_section::Mutex::new(RefCell::new(None)),
        }
    }

    fn discard_completions(&self, cs: critical_section::CriticalSection<'_>) {
        if let Some(work) = self.work.borrow_ref(cs).as_ref() {
            work.clear();
        }
    }

    /// Wakes the completion task, if the channel has one.
    pub(crate) fn schedule_completion(&self, cs: critical_section::CriticalSection<'_>) {
        if let Some(work) = self.work.borrow_ref(cs).as_ref() {
            work.schedule();
        }
    }
}

// === impl ChanState ===

impl<D: HwDescriptor> ChanState<D> {
    /// Empties both queues, returning every descriptor to the pool.
    ///
    /// The drained entries are returned so that their callbacks can be
    /// dropped after the lock is released.
    fn drain_queues(&mut self) -> Vec<Queued> {
        let drained: Vec<Queued> = self.running.drain(..).chain(self.pending.drain(..)).collect();
        if let Some(pool) = self.pool.as_mut() {
            for queued in &drained {
                pool.free(queued.slot.idx);
            }
        }
        drained
    }

    #[cfg(test)]
    pub(crate) fn queue_lens(&self) -> (usize, usize) {
        (self.pending.len(), self.running.len())
    }

    #[cfg(test)]
    pub(crate) fn holds_vote(&self) -> bool {
        self.vote.is_held()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_util::{config, TestPdma},
        TxFlags,
    };
    use portable_atomic::{AtomicUsize, Ordering};

    #[test]
    fn issue_moves_one_chain_at_a_time() {
        let test = TestPdma::new(config());
        let chan = test.request(5);

        let a = chan.prepare_copy(0x9000_0000, 0x8000_0000, 20_000, TxFlags::new()).unwrap();
        let b = chan.prepare_copy(0x9100_0000, 0x8100_0000, 64, TxFlags::new()).unwrap();
        a.submit();
        b.submit();
        assert_eq!(chan.chan.lock().queue_lens(), (4, 0));

        chan.issue_pending();
        assert_eq!(chan.chan.lock().queue_lens(), (1, 3));
        assert_eq!(chan.status(), Status::InProgress);

        // issuing again while busy doesn't start the second chain
        chan.issue_pending();
        assert_eq!(chan.chan.lock().queue_lens(), (1, 3));

        let phy = chan.physical_channel().unwrap();
        test.finish_chain(phy);
        assert_eq!(chan.chan.lock().queue_lens(), (0, 1));
        assert_eq!(chan.descriptors_in_use(), 1);

        test.finish_chain(phy);
        assert_eq!(chan.chan.lock().queue_lens(), (0, 0));
        assert_eq!(chan.status(), Status::Complete);
        assert_eq!(chan.physical_channel(), None);
        assert_eq!(chan.descriptors_in_use(), 0);
    }

    #[test]
    fn power_vote_follows_activity() {
        let test = TestPdma::new(config());
        let chan = test.request(5);

        chan.prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
            .unwrap()
            .submit();
        chan.issue_pending();
        assert!(chan.chan.lock().holds_vote());
        assert_eq!(test.pm.active(), 1);

        // still busy: the vote is kept
        chan.issue_pending();
        assert_eq!(test.pm.active(), 1);
        assert_eq!(test.pm.total_gets(), 1);

        test.finish_chain(chan.physical_channel().unwrap());
        assert!(!chan.chan.lock().holds_vote());
        assert_eq!(test.pm.active(), 0);
    }

    #[test]
    fn client_managed_power() {
        let test = TestPdma::new(config());
        let chan = test
            .pdma
            .request_channel(DmaSpec {
                request_line: 5,
                client_manages_power: true,
            })
            .unwrap();
        chan.allocate_resources();

        chan.prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
            .unwrap()
            .submit();
        chan.issue_pending();
        assert_eq!(chan.status(), Status::InProgress);
        assert_eq!(test.pm.total_gets(), 0);

        chan.terminate_all();
        assert_eq!(test.pm.total_gets(), 0);
    }

    #[test]
    fn stale_interrupts_are_ignored() {
        let test = TestPdma::new(config());
        let chan = test.request(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut xfer = chan
            .prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
            .unwrap();
        xfer.set_callback({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });
        xfer.submit();
        chan.issue_pending();
        let phy = chan.physical_channel().unwrap();
        test.finish_chain(phy);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a late completion for the same channel finds it complete
        chan.chan.complete();
        test.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(chan.status(), Status::Complete);
    }

    #[test]
    fn terminate_forgets_counted_interrupts() {
        let test = TestPdma::new(config());
        let chan = test.request(5);
        chan.prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
            .unwrap()
            .submit();
        chan.issue_pending();
        let phy = chan.physical_channel().unwrap();
        test.sim.end_of_chain(phy);
        assert_eq!(test.pdma.handle_interrupt(), crate::IrqReturn::Handled);

        // terminated before the completion task got to run
        chan.terminate_all();
        let cookie = chan
            .prepare_copy(0x9100_0000, 0x8100_0000, 64, TxFlags::new())
            .unwrap()
            .submit();
        chan.issue_pending();
        test.run();
        assert_eq!(chan.tx_status(cookie).status, Status::InProgress);
    }

    #[test]
    fn free_resources_goes_idle() {
        let test = TestPdma::new(config());
        let chan = test.request(5);
        chan.prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
            .unwrap()
            .submit();
        chan.issue_pending();
        let phy = chan.physical_channel().unwrap();

        chan.free_resources();
        assert_eq!(chan.status(), Status::Idle);
        assert_eq!(chan.physical_channel(), None);
        assert_eq!(chan.descriptors_in_use(), 0);
        assert!(!test.sim.is_running(phy));
        assert_eq!(test.pm.active(), 0);

        // the completion task exits once its work is cancelled
        test.run();

        // and allocating again starts over
        chan.allocate_resources();
        assert_eq!(chan.status(), Status::Complete);
    }
}
