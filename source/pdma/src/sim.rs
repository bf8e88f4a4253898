//! A register-file model of the PDMA controller.
//!
//! [`SimPdma`] implements [`Mmio`] so that the engine can be driven without
//! hardware. It does not move any data. It models what the driver relies on:
//!
//! - `DCSR` interrupt status bits are write-one-to-clear, and `STOP_STATE`
//!   is read-only.
//! - Clearing `RUN` stops the channel, setting `STOP_STATE`, unless the
//!   channel was made [stuck](SimPdma::set_stuck).
//! - `DINT` is computed from the interrupt status bits of every channel.
//!
//! Tests play the hardware's part with the methods that raise interrupts
//! and move the live address registers.
use alloc::{collections::BTreeMap, sync::Arc};

use embedded_hal::delay::DelayNs;
use mycelium_util::sync::spin::Mutex;
use portable_atomic::{AtomicU64, Ordering::*};

use crate::{
    regs::{offsets, Dcsr, Drcmr, Mmio},
    slave::Direction,
};

/// A simulated PDMA register window.
pub struct SimPdma {
    regs: Mutex<SimRegs>,
    elapsed_ns: AtomicU64,
}

/// A [`DelayNs`] that only advances a [`SimPdma`]'s clock.
#[derive(Clone)]
pub struct SimDelay {
    sim: Arc<SimPdma>,
}

#[derive(Debug, Default)]
struct SimRegs {
    words: BTreeMap<usize, u32>,
    /// Channels that ignore being stopped.
    stuck: u32,
}

const CHANNELS: u8 = 32;

/// `BUS_ERR`, `START_INTR`, `END_INTR` and `EOR_INTR`.
const DCSR_W1C: u32 = 0b10_0000_0111;

/// `STOP_STATE`, `REQ_PEND` and `CMP_ST`.
const DCSR_RO: u32 = 0b101_0000_1000;

// === impl SimPdma ===

impl SimPdma {
    /// Returns a controller with every channel stopped and nothing mapped.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Mutex::new(SimRegs::default()),
            elapsed_ns: AtomicU64::new(0),
        }
    }

    /// A delay source for [`Platform::delay`](crate::Platform::delay) that
    /// advances this controller's clock instead of sleeping.
    #[must_use]
    pub fn delay(self: &Arc<Self>) -> SimDelay {
        SimDelay { sim: self.clone() }
    }

    /// Total time spent in [`SimDelay`]s, in microseconds.
    #[must_use]
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns.load(Acquire) / 1000
    }

    #[must_use]
    pub fn dcsr(&self, ch: u8) -> Dcsr {
        self.regs.lock().dcsr(ch)
    }

    #[must_use]
    pub fn is_running(&self, ch: u8) -> bool {
        self.dcsr(ch).get(Dcsr::RUN)
    }

    /// The request-line map entry for `request_line`.
    #[must_use]
    pub fn drcmr(&self, request_line: u32) -> Drcmr {
        Drcmr::from_bits(self.regs.lock().word(offsets::drcmr(request_line)))
    }

    /// Whether byte-aligned transfers are selected for `ch`.
    #[must_use]
    pub fn byte_aligned(&self, ch: u8) -> bool {
        self.regs.lock().word(offsets::DALGN) & (1 << ch) != 0
    }

    /// The descriptor address last programmed into `ch`.
    #[must_use]
    pub fn descriptor_addr(&self, ch: u8) -> u64 {
        let regs = self.regs.lock();
        ((regs.word(offsets::ddadrh(ch)) as u64) << 32) | regs.word(offsets::ddadr(ch)) as u64
    }

    /// Moves `ch`'s live source address.
    pub fn set_source_addr(&self, ch: u8, addr: u64) {
        let mut regs = self.regs.lock();
        regs.words.insert(offsets::dsadr(ch), addr as u32);
        regs.words.insert(offsets::dsadrh(ch), (addr >> 32) as u32);
    }

    /// Moves `ch`'s live target address.
    pub fn set_target_addr(&self, ch: u8, addr: u64) {
        let mut regs = self.regs.lock();
        regs.words.insert(offsets::dtadr(ch), addr as u32);
        regs.words.insert(offsets::dtadrh(ch), (addr >> 32) as u32);
    }

    /// Finishes the chain `ch` is running: the channel stops and raises its
    /// end interrupt.
    ///
    /// The live address registers are left where they are, so a test that
    /// cares about residue moves them to where the hardware stopped first.
    pub fn end_of_chain(&self, ch: u8) {
        self.regs.lock().update_dcsr(ch, |dcsr| {
            dcsr.with(Dcsr::END_INTR, true)
                .with(Dcsr::RUN, false)
                .with(Dcsr::STOP_STATE, true)
        });
    }

    /// The peripheral on `ch` ends its request early, having moved the data
    /// up to `host_addr` on the memory side of a `dir` transfer. The channel
    /// stops and raises its end-of-request interrupt.
    pub fn end_of_request(&self, ch: u8, dir: Direction, host_addr: u64) {
        match dir {
            Direction::DevToMem => self.set_target_addr(ch, host_addr),
            Direction::MemToDev | Direction::MemToMem => self.set_source_addr(ch, host_addr),
        }
        self.regs.lock().update_dcsr(ch, |dcsr| {
            dcsr.with(Dcsr::EOR_INTR, true)
                .with(Dcsr::RUN, false)
                .with(Dcsr::STOP_STATE, true)
        });
    }

    /// Raises `ch`'s end interrupt without stopping it, as a cyclic ring does
    /// at the end of every period.
    pub fn end_of_period(&self, ch: u8) {
        self.regs
            .lock()
            .update_dcsr(ch, |dcsr| dcsr.with(Dcsr::END_INTR, true));
    }

    /// Raises a bus error on `ch`.
    pub fn bus_error(&self, ch: u8) {
        self.regs
            .lock()
            .update_dcsr(ch, |dcsr| dcsr.with(Dcsr::BUS_ERR, true));
    }

    /// Makes `ch` keep running when `RUN` is cleared, or behave again.
    pub fn set_stuck(&self, ch: u8, stuck: bool) {
        let mut regs = self.regs.lock();
        if stuck {
            regs.stuck |= 1 << ch;
        } else {
            regs.stuck &= !(1 << ch);
        }
    }
}

impl Default for SimPdma {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmio for SimPdma {
    fn read32(&self, offset: usize) -> u32 {
        let regs = self.regs.lock();
        if offset == offsets::DINT {
            return regs.dint();
        }
        regs.word(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut regs = self.regs.lock();
        match offset {
            offsets::DINT => {}
            _ if offset < offsets::dcsr(CHANNELS) => {
                regs.write_dcsr((offset >> 2) as u8, value);
            }
            _ => {
                regs.words.insert(offset, value);
            }
        }
    }
}

// === impl SimRegs ===

impl SimRegs {
    fn word(&self, offset: usize) -> u32 {
        match self.words.get(&offset) {
            Some(&value) => value,
            // channels come out of reset stopped
            None if offset < offsets::dcsr(CHANNELS) => {
                Dcsr::new().with(Dcsr::STOP_STATE, true).bits()
            }
            None => 0,
        }
    }

    fn dcsr(&self, ch: u8) -> Dcsr {
        Dcsr::from_bits(self.word(offsets::dcsr(ch)))
    }

    fn update_dcsr(&mut self, ch: u8, f: impl FnOnce(Dcsr) -> Dcsr) {
        let dcsr = f(self.dcsr(ch));
        self.words.insert(offsets::dcsr(ch), dcsr.bits());
    }

    fn write_dcsr(&mut self, ch: u8, value: u32) {
        let old = self.dcsr(ch).bits();
        let status = old & DCSR_W1C & !(value & DCSR_W1C);
        let control = value & !(DCSR_W1C | DCSR_RO);
        let mut dcsr = Dcsr::from_bits(status | control | (old & DCSR_RO));

        if dcsr.get(Dcsr::RUN) {
            dcsr.set(Dcsr::STOP_STATE, false);
        } else if self.stuck & (1 << ch) == 0 {
            dcsr.set(Dcsr::STOP_STATE, true);
        }
        self.words.insert(offsets::dcsr(ch), dcsr.bits());
    }

    fn dint(&self) -> u32 {
        (0..CHANNELS)
            .filter(|&ch| self.dcsr(ch).irq_pending())
            .fold(0, |dint, ch| dint | (1 << ch))
    }
}

// === impl SimDelay ===

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.sim.elapsed_ns.fetch_add(ns as u64, AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_are_write_one_to_clear() {
        let sim = SimPdma::new();
        sim.write32(offsets::dcsr(2), Dcsr::new().with(Dcsr::RUN, true).bits());
        sim.end_of_period(2);
        sim.bus_error(2);
        assert_eq!(sim.read32(offsets::DINT), 1 << 2);

        // writing zeros leaves the status alone
        sim.write32(offsets::dcsr(2), Dcsr::new().with(Dcsr::RUN, true).bits());
        assert!(sim.dcsr(2).get(Dcsr::END_INTR));

        // writing back what was read clears it
        let dcsr = sim.read32(offsets::dcsr(2));
        sim.write32(offsets::dcsr(2), dcsr);
        assert!(!sim.dcsr(2).irq_pending());
        assert!(sim.is_running(2));
        assert_eq!(sim.read32(offsets::DINT), 0);
    }

    #[test]
    fn stopping() {
        let sim = SimPdma::new();
        assert!(sim.dcsr(0).get(Dcsr::STOP_STATE));

        sim.write32(offsets::dcsr(0), Dcsr::new().with(Dcsr::RUN, true).bits());
        assert!(!sim.dcsr(0).get(Dcsr::STOP_STATE));

        sim.write32(offsets::dcsr(0), 0);
        assert!(sim.dcsr(0).get(Dcsr::STOP_STATE));

        sim.set_stuck(0, true);
        sim.write32(offsets::dcsr(0), Dcsr::new().with(Dcsr::RUN, true).bits());
        sim.write32(offsets::dcsr(0), 0);
        assert!(!sim.dcsr(0).get(Dcsr::STOP_STATE));
    }

    #[test]
    fn end_of_chain_stops() {
        let sim = SimPdma::new();
        sim.write32(offsets::dcsr(7), Dcsr::new().with(Dcsr::RUN, true).bits());
        sim.end_of_chain(7);
        assert!(!sim.is_running(7));
        assert_eq!(sim.read32(offsets::DINT), 1 << 7);
    }

    #[test]
    fn end_of_request_leaves_the_live_address() {
        let sim = SimPdma::new();
        sim.write32(offsets::dcsr(3), Dcsr::new().with(Dcsr::RUN, true).bits());
        sim.end_of_request(3, Direction::DevToMem, 0x1_4000_0064);
        assert!(!sim.is_running(3));
        assert!(sim.dcsr(3).get(Dcsr::EOR_INTR));
        assert_eq!(sim.read32(offsets::DINT), 1 << 3);
        assert_eq!(sim.read32(offsets::dtadr(3)), 0x4000_0064);
        assert_eq!(sim.read32(offsets::dtadrh(3)), 0x1);
        assert_eq!(sim.read32(offsets::dsadr(3)), 0);
    }

    #[test]
    fn masks_match_register_layout() {
        let w1c = Dcsr::new()
            .with(Dcsr::BUS_ERR, true)
            .with(Dcsr::START_INTR, true)
            .with(Dcsr::END_INTR, true)
            .with(Dcsr::EOR_INTR, true);
        assert_eq!(w1c.bits(), DCSR_W1C);

        let ro = Dcsr::new()
            .with(Dcsr::STOP_STATE, true)
            .with(Dcsr::REQ_PEND, true)
            .with(Dcsr::CMP_ST, true);
        assert_eq!(ro.bits(), DCSR_RO);
    }

    #[test]
    fn delay_advances_clock() {
        let sim = Arc::new(SimPdma::new());
        let mut delay = sim.delay();
        delay.delay_us(10);
        delay.delay_us(15);
        assert_eq!(sim.elapsed_us(), 25);
    }
}
