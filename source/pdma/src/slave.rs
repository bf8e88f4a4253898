//! Transfer direction and peripheral ("slave") configuration.

use crate::descriptor::{Burst, Dcmd, Width};

/// The direction of a transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Direction {
    MemToMem,
    MemToDev,
    DevToMem,
}

/// Width of each peripheral access.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum BusWidth {
    /// Leave the width unprogrammed.
    #[default]
    Undefined,
    Byte1,
    Byte2,
    Byte4,
}

/// Peripheral-side configuration applied to slave transfers.
///
/// Stored by [`Channel::configure`] and applied when a slave transfer is
/// prepared: the `src_*` fields are used for [`Direction::DevToMem`]
/// transfers and the `dst_*` fields for [`Direction::MemToDev`] transfers.
///
/// [`Channel::configure`]: crate::Channel::configure
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SlaveConfig {
    /// Peripheral register read by device-to-memory transfers.
    pub src_addr: u64,
    /// Peripheral register written by memory-to-device transfers.
    pub dst_addr: u64,
    pub src_width: BusWidth,
    pub dst_width: BusWidth,
    /// Maximum burst in bytes: 0 (unprogrammed), 8, 16 or 32.
    pub src_maxburst: u32,
    pub dst_maxburst: u32,
}

/// Peripheral-side parameters resolved for one direction.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SlaveParams {
    /// The command template every descriptor of a slave transfer starts from.
    pub(crate) dcmd: Dcmd,
    pub(crate) dev_addr: u64,
}

// === impl BusWidth ===

impl BusWidth {
    pub(crate) fn width(self) -> Width {
        match self {
            Self::Undefined => Width::Unspecified,
            Self::Byte1 => Width::Byte1,
            Self::Byte2 => Width::Byte2,
            Self::Byte4 => Width::Byte4,
        }
    }
}

// === impl SlaveConfig ===

impl SlaveConfig {
    /// Returns the first burst size that slave transfers cannot program, if
    /// any.
    pub(crate) fn unsupported_burst(&self) -> Option<u32> {
        [self.src_maxburst, self.dst_maxburst]
            .into_iter()
            .find(|burst| !matches!(burst, 0 | 8 | 16 | 32))
    }

    /// Resolves the command template and device address for a transfer in
    /// `dir`. Returns `None` for memory-to-memory, which has no peripheral
    /// side.
    pub(crate) fn params(&self, dir: Direction) -> Option<SlaveParams> {
        let (dcmd, burst, width, dev_addr) = match dir {
            Direction::DevToMem => (
                Dcmd::new()
                    .with(Dcmd::INC_TRG_ADDR, true)
                    .with(Dcmd::FLOW_SRC, true),
                self.src_maxburst,
                self.src_width,
                self.src_addr,
            ),
            Direction::MemToDev => (
                Dcmd::new()
                    .with(Dcmd::INC_SRC_ADDR, true)
                    .with(Dcmd::FLOW_TRG, true),
                self.dst_maxburst,
                self.dst_width,
                self.dst_addr,
            ),
            Direction::MemToMem => return None,
        };
        let burst = match burst {
            8 => Burst::Burst8,
            16 => Burst::Burst16,
            32 => Burst::Burst32,
            _ => Burst::Unspecified,
        };
        let dcmd = dcmd
            .with(Dcmd::WIDTH, width.width())
            .with(Dcmd::BURST, burst);
        Some(SlaveParams { dcmd, dev_addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uart_rx() -> SlaveConfig {
        SlaveConfig {
            src_addr: 0xd401_7000,
            src_width: BusWidth::Byte1,
            src_maxburst: 16,
            ..Default::default()
        }
    }

    #[test]
    fn dev_to_mem_uses_source_side() {
        let params = uart_rx().params(Direction::DevToMem).unwrap();
        assert_eq!(params.dev_addr, 0xd401_7000);
        assert!(params.dcmd.get(Dcmd::INC_TRG_ADDR));
        assert!(params.dcmd.get(Dcmd::FLOW_SRC));
        assert!(!params.dcmd.get(Dcmd::INC_SRC_ADDR));
        assert!(!params.dcmd.get(Dcmd::FLOW_TRG));
        assert_eq!(params.dcmd.get(Dcmd::WIDTH), Width::Byte1);
        assert_eq!(params.dcmd.get(Dcmd::BURST), Burst::Burst16);
    }

    #[test]
    fn mem_to_dev_uses_target_side() {
        let cfg = SlaveConfig {
            dst_addr: 0xd401_7000,
            dst_width: BusWidth::Byte4,
            dst_maxburst: 32,
            ..uart_rx()
        };
        let params = cfg.params(Direction::MemToDev).unwrap();
        assert_eq!(params.dev_addr, 0xd401_7000);
        assert!(params.dcmd.get(Dcmd::INC_SRC_ADDR));
        assert!(params.dcmd.get(Dcmd::FLOW_TRG));
        assert_eq!(params.dcmd.get(Dcmd::WIDTH), Width::Byte4);
        assert_eq!(params.dcmd.get(Dcmd::BURST), Burst::Burst32);
    }

    #[test]
    fn mem_to_mem_has_no_peripheral_side() {
        assert!(uart_rx().params(Direction::MemToMem).is_none());
    }

    #[test]
    fn unsupported_bursts() {
        assert_eq!(uart_rx().unsupported_burst(), None);
        let cfg = SlaveConfig {
            dst_maxburst: 64,
            ..uart_rx()
        };
        assert_eq!(cfg.unsupported_burst(), Some(64));
    }
}
