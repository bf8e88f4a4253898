//! Residue tracking.
//!
//! The hardware doesn't count bytes; it only exposes the address it is
//! currently reading from or writing to. The bytes remaining for a transfer
//! are recovered by locating that address in the running descriptor queue:
//! the descriptor containing it contributes what is left of it, and every
//! descriptor after it, up to the end of the queried chain, contributes its
//! full length.
use crate::cookie::Cookie;

/// The host-memory side of one running descriptor.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Span {
    pub(crate) start: u64,
    pub(crate) len: u32,
    /// This descriptor ends its chain.
    pub(crate) ends_chain: bool,
    pub(crate) cookie: Cookie,
}

/// Walks `spans` in queue order, locating the live address `curr`.
///
/// Returns the bytes remaining in the chain identified by `cookie`, or
/// `None` if no running chain carries that cookie. A cyclic ring has no
/// chain boundaries (every descriptor ends a period), so the walk simply
/// accumulates over the whole ring.
///
/// The first descriptor whose range contains `curr` wins, and ranges are
/// inclusive of their end address: an address exactly between two adjacent
/// descriptors is attributed to the earlier one, which then contributes
/// nothing.
pub(crate) fn walk(
    curr: u64,
    spans: impl IntoIterator<Item = Span>,
    cyclic: bool,
    cookie: Cookie,
) -> Option<u32> {
    let mut residue = 0u32;
    let mut passed = false;

    for span in spans {
        let end = span.start + span.len as u64;

        if passed {
            residue += span.len;
        } else if curr >= span.start && curr <= end {
            residue += (end - curr) as u32;
            passed = true;
        }

        if cyclic || !span.ends_chain {
            continue;
        }

        if span.cookie == cookie {
            return Some(residue);
        }
        // a different chain queued ahead of the one we're asked about
        residue = 0;
        passed = false;
    }

    if cyclic {
        Some(residue)
    } else {
        None
    }
}

/// The bytes remaining in a chain that is queued but not yet running: its
/// full length.
///
/// Returns `None` if no chain in `spans` is identified by `cookie`.
pub(crate) fn queued(spans: impl IntoIterator<Item = Span>, cookie: Cookie) -> Option<u32> {
    let mut residue = 0u32;
    for span in spans {
        residue += span.len;
        if span.ends_chain {
            if span.cookie == cookie {
                return Some(residue);
            }
            residue = 0;
        }
    }
    None
}
