//! # K1X PDMA
//!
//! A driver for the peripheral DMA controller (PDMA) found in the SpacemiT
//! K1X SoC.
//!
//! The controller has up to 32 *physical* channels, each of which walks a
//! chain of hardware [descriptors](descriptor) in memory. Clients never own a
//! physical channel. Instead, they [request](Pdma::request_channel) a
//! virtual [`Channel`] bound to a peripheral request line, prepare
//! [`Transfer`]s on it, submit them, and issue them. A physical channel is
//! only assigned while the virtual channel has work running, and is handed
//! back as soon as its queue runs dry.
//!
//! Transfer completion is reported by the controller's interrupt. The
//! platform's interrupt handler calls [`Pdma::handle_interrupt`], which only
//! acknowledges the hardware and wakes the completion task of the channel
//! that fired. Completion processing (recycling descriptors, starting the
//! next queued chain, and running client callbacks) happens on the
//! [`Scheduler`] the engine was constructed with.
//!
//! ```rust,ignore
//! let pdma: Pdma = Pdma::new(&config, platform)?;
//! let chan = pdma.request_channel(DmaSpec::from_cells([22, 0]))?;
//! chan.allocate_resources();
//!
//! let mut xfer = chan.prepare_copy(dst, src, len, TxFlags::new())?;
//! xfer.set_callback(|| tracing::info!("copy done!"));
//! let cookie = xfer.submit();
//! chan.issue_pending();
//! ```
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, sync::Arc};
use core::fmt;

use embedded_hal::delay::DelayNs;
use k1x_pdma_config::{PdmaConfig, PoolConfig};
use maitake::scheduler::Scheduler;
use mycelium_util::sync::spin::Mutex;
use portable_atomic::{AtomicU32, Ordering::*};

use self::{
    channel::{ChanRef, VirtChan},
    descriptor::{Burst, Dcmd, HwDescriptor},
    phy::PhyTable,
    regs::{Dcsr, Drcmr, Regs},
};

pub use self::{
    channel::{Channel, DmaSpec, Status, TxState},
    cookie::Cookie,
    descriptor::{LongDescriptor, ShortDescriptor},
    errors::{AllocError, ConfigError, PauseError, PrepError, RequestError},
    prep::{Callback, Segment, Transfer, TxFlags},
    qos::{AlwaysOn, PmCounter, RuntimePm},
    regs::{Mmio, RawMmio},
    slave::{BusWidth, Direction, SlaveConfig},
};

mod channel;
pub mod cookie;
pub mod descriptor;
pub mod errors;
mod irq;
mod phy;
mod pool;
mod prep;
mod qos;
pub mod regs;
mod residue;
pub mod sim;
mod slave;

#[cfg(test)]
mod test_util;

/// A handle to the PDMA controller.
///
/// The `Pdma` owns the controller's physical channels and one virtual
/// channel per physical channel. Virtual channels are claimed with
/// [`Pdma::request_channel`] and returned to the engine when the
/// [`Channel`] handle is dropped.
///
/// The descriptor format is selected with the `D` type parameter: either
/// [`ShortDescriptor`] (the default, 32-bit bus addresses), or
/// [`LongDescriptor`] for controllers running with the long physical address
/// extension.
pub struct Pdma<D: HwDescriptor = ShortDescriptor> {
    shared: Arc<Shared<D>>,
}

/// The platform services a [`Pdma`] is built on.
pub struct Platform {
    /// The controller's register window.
    pub mmio: Arc<dyn Mmio>,
    /// Runs each channel's deferred completion task.
    pub scheduler: Arc<Scheduler>,
    /// Keeps the controller powered while channels have work queued.
    pub pm: Arc<dyn RuntimePm>,
    /// Paces the stop-state poll when a channel is disabled.
    pub delay: Box<dyn DelayNs + Send>,
}

/// Whether an interrupt was raised by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IrqReturn {
    /// No channel of this controller had an interrupt pending.
    None,
    /// At least one channel's interrupt was acknowledged.
    Handled,
}

/// State shared by the engine, its channels, and their completion tasks.
pub(crate) struct Shared<D: HwDescriptor> {
    pub(crate) regs: Regs,
    pub(crate) phys: PhyTable,
    pub(crate) chans: Box<[VirtChan<D>]>,
    /// One bit per virtual channel, set while a [`Channel`] handle exists.
    claims: AtomicU32,
    /// Command template for memory-to-memory copies.
    pub(crate) copy_dcmd: Dcmd,
    pub(crate) pool: PoolConfig,
    pub(crate) pm: Arc<dyn RuntimePm>,
    delay: Mutex<Box<dyn DelayNs + Send>>,
    pub(crate) scheduler: Arc<Scheduler>,
}

/// Number of times the stop-state bit is polled when disabling a channel.
const STOP_POLLS: u32 = 1000;

/// Delay between stop-state polls.
const STOP_POLL_US: u32 = 10;

// === impl Pdma ===

impl<D: HwDescriptor> Pdma<D> {
    /// Binds the engine to a controller.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Pdma`]`)` if `config` describes a controller this driver
    ///   can run.
    /// - [`Err`]`(`[`ConfigError`]`)` naming the first invalid setting
    ///   otherwise.
    pub fn new(config: &PdmaConfig, platform: Platform) -> Result<Self, ConfigError> {
        let channels = config.channels;
        if channels == 0 || channels > 32 {
            return Err(ConfigError::ChannelCount(channels));
        }

        let max_burst = match Burst::from_bytes(config.max_burst_size) {
            Some(burst) => burst,
            None => return Err(ConfigError::MaxBurst(config.max_burst_size)),
        };

        for (i, r) in config.reserved_channels.iter().enumerate() {
            if r.channel >= channels {
                return Err(ConfigError::ReservedChannelOutOfRange {
                    channel: r.channel,
                    channels,
                });
            }
            if r.request_line >= regs::DRCMR_INVALID {
                return Err(ConfigError::ReservedRequestLine(r.request_line));
            }
            let conflict = config.reserved_channels[..i]
                .iter()
                .any(|prev| prev.channel == r.channel || prev.request_line == r.request_line);
            if conflict {
                return Err(ConfigError::DuplicateReservation {
                    channel: r.channel,
                    request_line: r.request_line,
                });
            }
        }

        pool::validate::<D>(&config.descriptor_pool)?;

        let copy_dcmd = Dcmd::new()
            .with(Dcmd::INC_SRC_ADDR, true)
            .with(Dcmd::INC_TRG_ADDR, true)
            .with(Dcmd::BURST, max_burst);

        let shared = Arc::new(Shared {
            regs: Regs::new(platform.mmio),
            phys: PhyTable::new(config),
            chans: (0..channels).map(|_| VirtChan::new()).collect(),
            claims: AtomicU32::new(0),
            copy_dcmd,
            pool: config.descriptor_pool.clone(),
            pm: platform.pm,
            delay: Mutex::new(platform.delay),
            scheduler: platform.scheduler,
        });

        tracing::info!(
            channels,
            max_burst = config.max_burst_size,
            reserved = config.reserved_channels.len(),
            long_descriptors = D::LONG_ADDRESSING,
            pool_capacity = config.descriptor_pool.capacity,
            "PDMA engine initialized"
        );

        Ok(Self { shared })
    }

    /// The number of physical (and virtual) channels.
    #[must_use]
    pub fn channels(&self) -> u8 {
        self.shared.chans.len() as u8
    }

    /// Claims a free virtual channel and binds it to a peripheral request
    /// line.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Channel`]`)` if a virtual channel was free.
    /// - [`Err`]`(`[`RequestError::InvalidRequestLine`]`)` if the request
    ///   line cannot be routed by the controller.
    /// - [`Err`]`(`[`RequestError::NoFreeChannel`]`)` if every virtual
    ///   channel is already claimed.
    pub fn request_channel(&self, spec: DmaSpec) -> Result<Channel<D>, RequestError> {
        if spec.request_line >= regs::DRCMR_INVALID {
            return Err(RequestError::InvalidRequestLine(spec.request_line));
        }

        let id = self.shared.claim().ok_or(RequestError::NoFreeChannel)?;
        let chan = ChanRef::new(self.shared.clone(), id);
        chan.bind(spec);

        if spec.client_manages_power {
            tracing::debug!(chan = id, request_line = spec.request_line, "client does power votes itself");
        } else {
            tracing::debug!(chan = id, request_line = spec.request_line, "pdma does power votes");
        }

        Ok(Channel::new(chan))
    }

    /// Handles the controller's shared interrupt.
    ///
    /// Every channel with an interrupt pending has its status acknowledged,
    /// and its virtual channel's completion task is woken. Nothing else is
    /// done in interrupt context.
    pub fn handle_interrupt(&self) -> IrqReturn {
        let dint = self.shared.regs.dint();
        tracing::trace!(dint = ?format_args!("{dint:#b}"), "PDMA interrupt");

        let mut pending = dint & self.shared.channel_mask();
        let mut handled = IrqReturn::None;
        while pending != 0 {
            let phy = pending.trailing_zeros() as u8;
            pending &= pending - 1;
            if self.shared.handle_phy_irq(phy) {
                handled = IrqReturn::Handled;
            }
        }
        handled
    }

    /// Handles the interrupt of a single physical channel, for controllers
    /// wired with one interrupt line per channel.
    pub fn handle_channel_interrupt(&self, phy: u8) -> IrqReturn {
        if phy < self.channels() && self.shared.handle_phy_irq(phy) {
            IrqReturn::Handled
        } else {
            IrqReturn::None
        }
    }

    /// Terminates the transfers of every claimed channel.
    ///
    /// This is generally used when shutting down the system, such as in panic
    /// and exception handlers.
    pub fn cancel_all(&self) {
        let claims = self.shared.claims.load(Acquire);
        for id in 0..self.channels() {
            if claims & (1 << id) != 0 {
                ChanRef::new(self.shared.clone(), id).terminate_all();
            }
        }
    }
}

impl<D: HwDescriptor> fmt::Debug for Pdma<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pdma")
            .field("channels", &self.channels())
            .field("claims", &format_args!("{:#034b}", self.shared.claims.load(Relaxed)))
            .field("long_descriptors", &D::LONG_ADDRESSING)
            .finish()
    }
}

// === impl Shared ===

impl<D: HwDescriptor> Shared<D> {
    fn channel_mask(&self) -> u32 {
        match self.chans.len() {
            32 => u32::MAX,
            n => (1 << n) - 1,
        }
    }

    /// Claims the lowest-numbered free virtual channel.
    fn claim(&self) -> Option<u8> {
        let mask = self.channel_mask();
        let mut bitmap = self.claims.load(Acquire);
        loop {
            let free = !bitmap & mask;
            if free == 0 {
                return None;
            }
            let idx = free.trailing_zeros();
            match self
                .claims
                .compare_exchange_weak(bitmap, bitmap | (1 << idx), AcqRel, Acquire)
            {
                Ok(_) => return Some(idx as u8),
                Err(actual) => bitmap = actual,
            }
        }
    }

    pub(crate) fn release_claim(&self, id: u8) {
        self.claims.fetch_and(!(1 << id), Release);
    }

    /// Routes the request line to `phy`, programs its byte alignment, and
    /// starts it.
    pub(crate) fn enable_chan(&self, phy: u8, request_line: u32, byte_align: bool) {
        critical_section::with(|_cs| {
            let drcmr = Drcmr::new()
                .with(Drcmr::MAP_VALID, true)
                .with(Drcmr::CHANNEL, phy as u32);
            self.regs.set_drcmr(request_line, drcmr);
            self.regs.set_byte_align(phy, byte_align);

            let dcsr = self
                .regs
                .dcsr(phy)
                .with(Dcsr::RUN, true)
                .with(Dcsr::EOR_IRQ_EN, true)
                .with(Dcsr::EOR_STOP_EN, true)
                .with(Dcsr::LPAE_EN, D::LONG_ADDRESSING);
            self.regs.set_dcsr(phy, dcsr);
        });
    }

    /// Stops `phy`, waiting for the hardware to report that it stopped.
    ///
    /// If it never does, a warning is logged and the channel is treated as
    /// stopped anyway.
    pub(crate) fn disable_chan(&self, phy: u8) {
        let dcsr = self
            .regs
            .dcsr(phy)
            .with(Dcsr::RUN, false)
            .with(Dcsr::EOR_IRQ_EN, false)
            .with(Dcsr::EOR_STOP_EN, false)
            .with(Dcsr::LPAE_EN, false);
        self.regs.set_dcsr(phy, dcsr);

        let mut delay = self.delay.lock();
        for _ in 1..STOP_POLLS {
            if self.regs.dcsr(phy).get(Dcsr::STOP_STATE) {
                return;
            }
            delay.delay_us(STOP_POLL_US);
        }

        if !self.regs.dcsr(phy).get(Dcsr::STOP_STATE) {
            tracing::warn!(
                phy,
                dcsr = %self.regs.dcsr(phy),
                "DMA channel did not stop within {}us",
                STOP_POLLS * STOP_POLL_US,
            );
        }
    }

    /// Unroutes `request_line` and gives `phy` back to the allocator.
    pub(crate) fn free_phy(&self, phy: u8, request_line: u32) {
        critical_section::with(|cs| {
            self.regs.set_drcmr(request_line, Drcmr::new());
            self.phys.release(cs, phy);
        });
    }
}
