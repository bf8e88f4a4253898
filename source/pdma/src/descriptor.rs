//! Hardware descriptor formats.
//!
//! The PDMA fetches a chain of descriptors from coherent memory. Each
//! descriptor describes one contiguous piece of a transfer and links to the
//! next one through its `DDADR` word. Two layouts exist: the classic four-word
//! [`ShortDescriptor`], which can only address the low 4GiB, and the
//! [`LongDescriptor`] used when the controller runs with the long physical
//! address extension (`DCSR.LPAEEN`), which carries the high address bits in
//! four additional words.
//!
//! The engine is generic over the layout through [`HwDescriptor`], so which
//! one a build uses is decided when the [`Pdma`](crate::Pdma) is constructed.
// Unusual groupings are used in binary literals in this file in order to
// separate the bits by which field they represent, rather than by their byte.
#![allow(clippy::unusual_byte_groupings)]

use core::fmt;

use mycelium_bitfield::{bitfield, enum_from_bits};

use crate::slave::Direction;

enum_from_bits! {
    /// Peripheral-side access width of a transfer (`DCMD.WIDTH`).
    #[derive(Debug, Eq, PartialEq)]
    #[cfg_attr(test, derive(proptest_derive::Arbitrary))]
    pub enum Width<u8> {
        /// No width programmed; used for memory-to-memory copies.
        Unspecified = 0b00,
        Byte1 = 0b01,
        Byte2 = 0b10,
        Byte4 = 0b11,
    }
}

enum_from_bits! {
    /// Maximum burst size of a transfer (`DCMD.SIZE`).
    ///
    /// The 64-byte encoding overlaps the `ENDIAN` bit of older parts of this
    /// DMA family; the K1X reuses it as a third burst bit.
    #[derive(Debug, Eq, PartialEq)]
    #[cfg_attr(test, derive(proptest_derive::Arbitrary))]
    pub enum Burst<u8> {
        Unspecified = 0b000,
        Burst8 = 0b001,
        Burst16 = 0b010,
        Burst32 = 0b011,
        Burst64 = 0b100,
    }
}

bitfield! {
    /// A descriptor command word (`DCMD`).
    pub struct Dcmd<u32> {
        /// Number of bytes moved by this descriptor.
        pub const LENGTH = 13;

        const _RESERVED_0 = 1;

        /// Peripheral access width.
        pub const WIDTH: Width;

        /// Maximum burst size.
        pub const BURST: Burst;

        const _RESERVED_1 = 2;

        /// Raise an end interrupt once this descriptor completes. The driver
        /// uses this as the end-of-chain marker.
        pub const END_IRQ_EN: bool;

        /// Raise a start interrupt when this descriptor is fetched.
        pub const START_IRQ_EN: bool;

        const _RESERVED_2 = 5;

        /// Flow control by the target.
        pub const FLOW_TRG: bool;

        /// Flow control by the source.
        pub const FLOW_SRC: bool;

        /// Increment the target address after each access.
        pub const INC_TRG_ADDR: bool;

        /// Increment the source address after each access.
        pub const INC_SRC_ADDR: bool;
    }
}

/// The largest number of bytes a single descriptor can move (`DCMD.LENGTH`
/// is 13 bits wide).
pub const MAX_DESC_BYTES: u32 = (1 << 13) - 1;

/// `DDADR` stop flag: the channel stops after this descriptor.
const DDADR_STOP: u32 = 0b1;

/// `DDADR` bits holding the (16-byte aligned) address of the next descriptor.
const DDADR_DESC_ADDR: u32 = 0xffff_fff0;

/// Common access to the descriptor layouts understood by the PDMA.
///
/// Addresses are passed around as `u64` bus addresses. Layouts that cannot
/// represent the high half simply drop it, matching what the hardware would
/// see.
pub trait HwDescriptor: Clone + fmt::Debug + Send + Sync + 'static {
    /// Whether channels must be enabled with `DCSR.LPAEEN` set to fetch this
    /// layout.
    const LONG_ADDRESSING: bool;

    /// Returns an all-zero descriptor.
    fn zeroed() -> Self;

    /// Raw `DDADR` word.
    fn ddadr(&self) -> u32;

    /// Bus address of the next descriptor, or `None` if this descriptor has
    /// the stop flag set.
    fn next(&self) -> Option<u64>;

    /// Links this descriptor to the descriptor at `addr`, clearing the stop
    /// flag.
    fn set_next(&mut self, addr: u64);

    /// Marks this descriptor as the last one the channel fetches.
    fn set_stop(&mut self);

    fn source(&self) -> u64;
    fn set_source(&mut self, addr: u64);

    fn target(&self) -> u64;
    fn set_target(&mut self, addr: u64);

    fn command(&self) -> Dcmd;
    fn set_command(&mut self, cmd: Dcmd);

    /// Number of bytes this descriptor moves.
    #[inline]
    fn len(&self) -> u32 {
        self.command().get(Dcmd::LENGTH)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn is_stop(&self) -> bool {
        self.ddadr() & DDADR_STOP != 0
    }

    /// Whether this descriptor ends a submitted chain.
    #[inline]
    fn ends_chain(&self) -> bool {
        self.command().get(Dcmd::END_IRQ_EN)
    }

    /// The memory-side address of this descriptor for a transfer in `dir`.
    #[inline]
    fn host_addr(&self, dir: Direction) -> u64 {
        match dir {
            Direction::DevToMem => self.target(),
            Direction::MemToDev | Direction::MemToMem => self.source(),
        }
    }
}

/// The 16-byte descriptor layout, limited to 32-bit bus addresses.
#[derive(Clone, Debug)]
#[repr(C, align(32))]
pub struct ShortDescriptor {
    ddadr: u32,
    dsadr: u32,
    dtadr: u32,
    dcmd: Dcmd,
}

/// The 32-byte descriptor layout used with the long physical address
/// extension.
#[derive(Clone, Debug)]
#[repr(C, align(64))]
pub struct LongDescriptor {
    ddadr: u32,
    dsadr: u32,
    dtadr: u32,
    dcmd: Dcmd,
    ddadrh: u32,
    dsadrh: u32,
    dtadrh: u32,
    _rsvd: u32,
}

#[inline]
fn lo(addr: u64) -> u32 {
    addr as u32
}

#[inline]
fn hi(addr: u64) -> u32 {
    (addr >> 32) as u32
}

// === impl ShortDescriptor ===

impl HwDescriptor for ShortDescriptor {
    const LONG_ADDRESSING: bool = false;

    fn zeroed() -> Self {
        Self {
            ddadr: 0,
            dsadr: 0,
            dtadr: 0,
            dcmd: Dcmd::new(),
        }
    }

    #[inline]
    fn ddadr(&self) -> u32 {
        self.ddadr
    }

    fn next(&self) -> Option<u64> {
        if self.is_stop() {
            return None;
        }
        Some((self.ddadr & DDADR_DESC_ADDR) as u64)
    }

    fn set_next(&mut self, addr: u64) {
        self.ddadr = lo(addr) & DDADR_DESC_ADDR;
    }

    fn set_stop(&mut self) {
        self.ddadr = DDADR_STOP;
    }

    #[inline]
    fn source(&self) -> u64 {
        self.dsadr as u64
    }

    #[inline]
    fn set_source(&mut self, addr: u64) {
        self.dsadr = lo(addr);
    }

    #[inline]
    fn target(&self) -> u64 {
        self.dtadr as u64
    }

    #[inline]
    fn set_target(&mut self, addr: u64) {
        self.dtadr = lo(addr);
    }

    #[inline]
    fn command(&self) -> Dcmd {
        self.dcmd
    }

    #[inline]
    fn set_command(&mut self, cmd: Dcmd) {
        self.dcmd = cmd;
    }
}

// === impl LongDescriptor ===

impl HwDescriptor for LongDescriptor {
    const LONG_ADDRESSING: bool = true;

    fn zeroed() -> Self {
        Self {
            ddadr: 0,
            dsadr: 0,
            dtadr: 0,
            dcmd: Dcmd::new(),
            ddadrh: 0,
            dsadrh: 0,
            dtadrh: 0,
            _rsvd: 0,
        }
    }

    #[inline]
    fn ddadr(&self) -> u32 {
        self.ddadr
    }

    fn next(&self) -> Option<u64> {
        if self.is_stop() {
            return None;
        }
        Some(((self.ddadrh as u64) << 32) | (self.ddadr & DDADR_DESC_ADDR) as u64)
    }

    fn set_next(&mut self, addr: u64) {
        self.ddadr = lo(addr) & DDADR_DESC_ADDR;
        self.ddadrh = hi(addr);
    }

    fn set_stop(&mut self) {
        self.ddadr = DDADR_STOP;
        self.ddadrh = 0;
    }

    #[inline]
    fn source(&self) -> u64 {
        ((self.dsadrh as u64) << 32) | self.dsadr as u64
    }

    #[inline]
    fn set_source(&mut self, addr: u64) {
        self.dsadr = lo(addr);
        self.dsadrh = hi(addr);
    }

    #[inline]
    fn target(&self) -> u64 {
        ((self.dtadrh as u64) << 32) | self.dtadr as u64
    }

    #[inline]
    fn set_target(&mut self, addr: u64) {
        self.dtadr = lo(addr);
        self.dtadrh = hi(addr);
    }

    #[inline]
    fn command(&self) -> Dcmd {
        self.dcmd
    }

    #[inline]
    fn set_command(&mut self, cmd: Dcmd) {
        self.dcmd = cmd;
    }
}

// === impl Burst ===

impl Burst {
    /// Maps a burst size in bytes to its `DCMD` encoding.
    #[must_use]
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            8 => Some(Self::Burst8),
            16 => Some(Self::Burst16),
            32 => Some(Self::Burst32),
            64 => Some(Self::Burst64),
            _ => None,
        }
    }
}
