//! Register access for the PDMA controller.
//!
//! The controller exposes one register window. Every physical channel has a
//! control/status register (`DCSR`) and a block of four descriptor registers,
//! plus (with the long address extension) three high-address registers. The
//! request-line map (`DRCMR`) routes a peripheral request line to a physical
//! channel, and two global registers report interrupts (`DINT`) and select
//! byte-aligned transfers (`DALGN`).
//!
//! All access goes through the [`Mmio`] trait so the engine can be driven by
//! real hardware ([`RawMmio`]) or by the register-file simulator in
//! [`crate::sim`].
// Unusual groupings are used in binary literals in this file in order to
// separate the bits by which field they represent, rather than by their byte.
#![allow(clippy::unusual_byte_groupings)]

use core::ptr::{self, NonNull};

use alloc::sync::Arc;
use mycelium_bitfield::bitfield;

/// 32-bit register access to the controller's MMIO window.
pub trait Mmio: Send + Sync {
    /// Reads the register at byte offset `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Writes `value` to the register at byte offset `offset`.
    fn write32(&self, offset: usize, value: u32);
}

/// Volatile access to a mapped register window.
pub struct RawMmio {
    base: NonNull<u8>,
}

/// Register offsets within the controller window.
pub mod offsets {
    /// Channel control/status register of physical channel `ch`.
    #[inline]
    pub const fn dcsr(ch: u8) -> usize {
        (ch as usize) << 2
    }

    /// Byte-alignment select, one bit per physical channel.
    pub const DALGN: usize = 0xa0;

    /// Interrupt status, one bit per physical channel.
    pub const DINT: usize = 0xf0;

    /// Request-line map entry for `request_line`.
    #[inline]
    pub const fn drcmr(request_line: u32) -> usize {
        let base = if request_line < 64 { 0x100 } else { 0x1100 };
        base + (((request_line & 0x3f) as usize) << 2)
    }

    #[inline]
    pub const fn ddadr(ch: u8) -> usize {
        0x200 + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn dsadr(ch: u8) -> usize {
        0x204 + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn dtadr(ch: u8) -> usize {
        0x208 + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn dcmd(ch: u8) -> usize {
        0x20c + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn ddadrh(ch: u8) -> usize {
        0x300 + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn dsadrh(ch: u8) -> usize {
        0x304 + ((ch as usize) << 4)
    }

    #[inline]
    pub const fn dtadrh(ch: u8) -> usize {
        0x308 + ((ch as usize) << 4)
    }
}

bitfield! {
    /// A channel control/status register (`DCSR`) value.
    ///
    /// The interrupt status bits (`BUS_ERR`, `START_INTR`, `END_INTR` and
    /// `EOR_INTR`) are write-one-to-clear.
    pub struct Dcsr<u32> {
        pub const BUS_ERR: bool;
        pub const START_INTR: bool;
        pub const END_INTR: bool;
        /// Set by the hardware once the channel has stopped.
        pub const STOP_STATE: bool;
        const _RESERVED_0 = 4;
        pub const REQ_PEND: bool;
        pub const EOR_INTR: bool;
        pub const CMP_ST: bool;
        const _RESERVED_1 = 10;
        /// Long physical address extension: fetch [`LongDescriptor`]s.
        ///
        /// [`LongDescriptor`]: crate::descriptor::LongDescriptor
        pub const LPAE_EN: bool;
        const _RESERVED_2 = 2;
        pub const CLR_CMP_ST: bool;
        pub const SET_CMP_ST: bool;
        pub const EOR_STOP_EN: bool;
        pub const EOR_JMP_EN: bool;
        pub const EOR_IRQ_EN: bool;
        pub const STOP_IRQ_EN: bool;
        pub const NO_DESC: bool;
        pub const RUN: bool;
    }
}

bitfield! {
    /// A request-line map (`DRCMR`) entry.
    pub struct Drcmr<u32> {
        /// The physical channel the request line is routed to.
        pub const CHANNEL = 5;
        const _RESERVED_0 = 2;
        /// The mapping is valid.
        pub const MAP_VALID: bool;
    }
}

/// Request lines at or above this value are not routable.
pub const DRCMR_INVALID: u32 = 100;

/// Typed register accessors on top of an [`Mmio`] window.
#[derive(Clone)]
pub(crate) struct Regs {
    mmio: Arc<dyn Mmio>,
}

// === impl RawMmio ===

impl RawMmio {
    /// Wraps the register window mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to the PDMA controller's register window, mapped
    /// for device access for the lifetime of the returned value, and no other
    /// code may drive the controller concurrently.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }
}

// Safety: the window is only ever accessed with volatile 32-bit loads and
// stores, which the hardware serializes.
unsafe impl Send for RawMmio {}
unsafe impl Sync for RawMmio {}

impl Mmio for RawMmio {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.base.as_ptr().add(offset).cast::<u32>()) }
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.base.as_ptr().add(offset).cast::<u32>(), value) }
    }
}

// === impl Regs ===

impl Regs {
    pub(crate) fn new(mmio: Arc<dyn Mmio>) -> Self {
        Self { mmio }
    }

    #[inline]
    pub(crate) fn dcsr(&self, ch: u8) -> Dcsr {
        Dcsr::from_bits(self.mmio.read32(offsets::dcsr(ch)))
    }

    #[inline]
    pub(crate) fn set_dcsr(&self, ch: u8, dcsr: Dcsr) {
        self.mmio.write32(offsets::dcsr(ch), dcsr.bits());
    }

    #[inline]
    pub(crate) fn dint(&self) -> u32 {
        self.mmio.read32(offsets::DINT)
    }

    pub(crate) fn set_byte_align(&self, ch: u8, enabled: bool) {
        let mut dalgn = self.mmio.read32(offsets::DALGN);
        if enabled {
            dalgn |= 1 << ch;
        } else {
            dalgn &= !(1 << ch);
        }
        self.mmio.write32(offsets::DALGN, dalgn);
    }

    #[inline]
    pub(crate) fn set_drcmr(&self, request_line: u32, drcmr: Drcmr) {
        self.mmio.write32(offsets::drcmr(request_line), drcmr.bits());
    }

    /// Programs the address of the first descriptor of a chain.
    pub(crate) fn set_descriptor_addr(&self, ch: u8, addr: u64, long: bool) {
        if long {
            self.mmio.write32(offsets::ddadrh(ch), (addr >> 32) as u32);
        }
        self.mmio.write32(offsets::ddadr(ch), addr as u32);
    }

    /// The channel's live source address.
    pub(crate) fn source_addr(&self, ch: u8, long: bool) -> u64 {
        let lo = self.mmio.read32(offsets::dsadr(ch)) as u64;
        if long {
            ((self.mmio.read32(offsets::dsadrh(ch)) as u64) << 32) | lo
        } else {
            lo
        }
    }

    /// The channel's live target address.
    pub(crate) fn target_addr(&self, ch: u8, long: bool) -> u64 {
        let lo = self.mmio.read32(offsets::dtadr(ch)) as u64;
        if long {
            ((self.mmio.read32(offsets::dtadrh(ch)) as u64) << 32) | lo
        } else {
            lo
        }
    }
}

// === impl Dcsr ===

impl Dcsr {
    /// Whether any write-one-to-clear interrupt status bit is set.
    #[must_use]
    pub fn irq_pending(self) -> bool {
        self.get(Self::BUS_ERR)
            || self.get(Self::START_INTR)
            || self.get(Self::END_INTR)
            || self.get(Self::EOR_INTR)
    }
}
