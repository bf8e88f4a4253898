//! Errors returned by the PDMA engine.
use core::fmt;

use crate::{descriptor::MAX_DESC_BYTES, regs::DRCMR_INVALID, slave::Direction};

/// Errors returned by [`Pdma::new`](crate::Pdma::new) and
/// [`Channel::configure`](crate::Channel::configure) for configuration the
/// hardware cannot honor.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The controller has between 1 and 32 physical channels.
    ChannelCount(u8),
    /// Only 8, 16, 32 and 64 byte bursts exist.
    MaxBurst(u32),
    /// A reservation names a physical channel the controller doesn't have.
    ReservedChannelOutOfRange { channel: u8, channels: u8 },
    /// Two reservations name the same physical channel or request line.
    DuplicateReservation { channel: u8, request_line: u32 },
    /// A reservation names a request line that cannot be routed.
    ReservedRequestLine(u32),
    /// The per-channel descriptor pool must hold at least one descriptor.
    EmptyPool,
    /// A fixed descriptor bus window must be aligned to the descriptor size.
    MisalignedPoolWindow { base: u64, align: usize },
    /// The descriptor bus window does not fit below 4GiB, but the
    /// descriptor format can only link 32-bit addresses.
    PoolWindowTooHigh { base: u64, end: u64 },
    /// Slave transfers only program 8, 16 or 32 byte bursts.
    SlaveBurst(u32),
}

/// Errors returned by [`Pdma::request_channel`](crate::Pdma::request_channel).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    /// The request line is not below [`DRCMR_INVALID`].
    InvalidRequestLine(u32),
    /// Every virtual channel is already claimed.
    NoFreeChannel,
}

/// Errors returned when a channel's descriptor pool cannot satisfy an
/// allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AllocError {
    /// Every descriptor in the pool is in use.
    PoolExhausted { capacity: usize },
}

/// Errors returned by the transfer preparation operations on
/// [`Channel`](crate::Channel).
///
/// A failed preparation never leaves descriptors allocated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PrepError {
    /// Transfers must move at least one byte.
    ZeroLength,
    /// A scatter-gather list had no segments.
    EmptyScatterList,
    /// A cyclic buffer length was not a multiple of its period.
    CyclicLength { len: usize, period: usize },
    /// A cyclic period was longer than one descriptor can move.
    PeriodTooLong(usize),
    /// The operation cannot run in this direction.
    Direction(Direction),
    /// The channel's resources are not allocated.
    NoResources,
    /// The descriptor pool ran dry while building the chain.
    Alloc(AllocError),
}

/// Errors returned by [`Channel::pause`](crate::Channel::pause).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PauseError {
    /// The channel holds no physical channel, so there is nothing to pause.
    NotRunning,
}

// === ConfigError ===

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ChannelCount(n) => {
                write!(f, "channel count {n} is not between 1 and 32")
            }
            ConfigError::MaxBurst(burst) => {
                write!(f, "max burst size {burst} is not one of 8, 16, 32 or 64")
            }
            ConfigError::ReservedChannelOutOfRange { channel, channels } => write!(
                f,
                "reserved channel {channel} is out of range (controller has {channels} channels)"
            ),
            ConfigError::DuplicateReservation {
                channel,
                request_line,
            } => write!(
                f,
                "reservation of channel {channel} for request line {request_line} conflicts with an earlier reservation"
            ),
            ConfigError::ReservedRequestLine(line) => write!(
                f,
                "reserved request line {line} is not below `DRCMR_INVALID` ({DRCMR_INVALID})"
            ),
            ConfigError::EmptyPool => f.write_str("descriptor pool capacity must not be 0"),
            ConfigError::MisalignedPoolWindow { base, align } => write!(
                f,
                "descriptor pool window {base:#x} is not {align}-byte aligned"
            ),
            ConfigError::PoolWindowTooHigh { base, end } => write!(
                f,
                "descriptor pool window {base:#x}..{end:#x} is not addressable by 32-bit descriptor links"
            ),
            ConfigError::SlaveBurst(burst) => {
                write!(f, "slave burst size {burst} is not one of 8, 16 or 32")
            }
        }
    }
}

// === RequestError ===

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::InvalidRequestLine(line) => write!(
                f,
                "request line {line} is not below `DRCMR_INVALID` ({DRCMR_INVALID})"
            ),
            RequestError::NoFreeChannel => f.write_str("all DMA channels are claimed"),
        }
    }
}

// === AllocError ===

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::PoolExhausted { capacity } => {
                write!(f, "all {capacity} descriptors in the pool are in use")
            }
        }
    }
}

// === PrepError ===

impl fmt::Display for PrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepError::ZeroLength => f.write_str("transfer length is 0"),
            PrepError::EmptyScatterList => f.write_str("scatter-gather list is empty"),
            PrepError::CyclicLength { len, period } => write!(
                f,
                "cyclic buffer length {len} is not a multiple of the period length {period}"
            ),
            PrepError::PeriodTooLong(period) => write!(
                f,
                "cyclic period length {period} is greater than `MAX_DESC_BYTES` ({MAX_DESC_BYTES})"
            ),
            PrepError::Direction(dir) => {
                write!(f, "this transfer cannot run in direction {dir:?}")
            }
            PrepError::NoResources => f.write_str("channel resources are not allocated"),
            PrepError::Alloc(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl From<AllocError> for PrepError {
    fn from(error: AllocError) -> Self {
        PrepError::Alloc(error)
    }
}

// === PauseError ===

impl fmt::Display for PauseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseError::NotRunning => f.write_str("channel holds no physical channel"),
        }
    }
}
