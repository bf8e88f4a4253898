//! # K1X PDMA configuration
//!
//! The values the PDMA engine reads once, when it is bound to the
//! controller: how many physical channels exist, which of them are reserved
//! for a particular peripheral request line, the largest burst the bus
//! accepts, and how many descriptors each channel's pool holds.
//!
//! Platform crates describe their board in TOML:
//!
//! ```toml
//! channels = 16
//! max_burst_size = 32
//!
//! [[reserved_channels]]
//! channel = 0
//! request_line = 22
//!
//! [descriptor_pool]
//! capacity = 128
//! ```
//!
//! ## In a `build.rs` script
//!
//! With the `use-std` feature, [`buildtime::render_file`] parses and
//! validates the TOML file and renders it as postcard into `OUT_DIR`:
//!
//! ```rust,ignore
//! fn main() {
//!     k1x_pdma_config::buildtime::render_file("k1x-pdma.toml").unwrap();
//! }
//! ```
//!
//! ## In the platform binary
//!
//! ```rust,ignore
//! let config = k1x_pdma_config::include_config!().unwrap();
//! ```

#![cfg_attr(not(any(feature = "use-std", test)), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// The controller's binding-time configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdmaConfig {
    /// Number of physical channels, between 1 and 32.
    #[serde(default = "PdmaConfig::default_channels")]
    pub channels: u8,

    /// Physical channels set aside for one request line each.
    #[serde(default)]
    pub reserved_channels: Vec<ReservedChannel>,

    /// Burst size used for memory-to-memory copies: 8, 16, 32 or 64.
    #[serde(default = "PdmaConfig::default_max_burst_size")]
    pub max_burst_size: u32,

    #[serde(default)]
    pub descriptor_pool: PoolConfig,
}

/// A physical channel reserved for one peripheral request line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservedChannel {
    pub channel: u8,
    pub request_line: u32,
}

/// Sizing of each channel's descriptor pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Descriptors per channel.
    #[serde(default = "PoolConfig::default_capacity")]
    pub capacity: usize,

    /// Place descriptors at a fixed bus address instead of using their CPU
    /// address.
    #[serde(default)]
    pub bus_base: Option<u64>,
}

pub const CONFIG_FILE_VAR: &str = "K1X_PDMA_CONFIG";

impl PdmaConfig {
    const fn default_channels() -> u8 {
        32
    }

    const fn default_max_burst_size() -> u32 {
        32
    }

    /// The physical channel reserved for `request_line`, if any.
    #[must_use]
    pub fn reservation_for(&self, request_line: u32) -> Option<u8> {
        self.reserved_channels
            .iter()
            .find(|r| r.request_line == request_line)
            .map(|r| r.channel)
    }

    /// Whether `channel` is reserved for some request line.
    #[must_use]
    pub fn is_reserved(&self, channel: u8) -> bool {
        self.reserved_channels.iter().any(|r| r.channel == channel)
    }
}

impl Default for PdmaConfig {
    fn default() -> Self {
        Self {
            channels: Self::default_channels(),
            reserved_channels: Vec::new(),
            max_burst_size: Self::default_max_burst_size(),
            descriptor_pool: PoolConfig::default(),
        }
    }
}

impl PoolConfig {
    const fn default_capacity() -> usize {
        64
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            bus_base: None,
        }
    }
}

/// Tools intended for use in build.rs scripts
#[cfg(feature = "use-std")]
pub mod buildtime {
    const OUT_DIR: &str = "OUT_DIR";
    const TAG: &str = concat!(module_path!(), ":");

    use std::{io::Write, path::Path};

    use super::*;
    use miette::{Context, IntoDiagnostic, Result};

    /// Parses a TOML configuration.
    pub fn from_toml(s: &str) -> Result<PdmaConfig> {
        toml::from_str(s).into_diagnostic()
    }

    /// Loads a configuration file from the given path, to be made available
    /// to the platform binary through [`include_config!()`].
    pub fn render_file(path: impl AsRef<Path>) -> Result<()> {
        let out_dir = std::env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;
        eprintln!("{TAG} {OUT_DIR}='{out_dir}'");
        render_file_to(path, out_dir)
    }

    fn render_file_to(path: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path_disp = path.display();

        (|| {
            let filename = path
                .file_name()
                .ok_or_else(|| miette::miette!("Path has no filename!"))?;
            eprintln!("{TAG} rendering config file '{path_disp}'",);
            let cfg = std::fs::read_to_string(path).into_diagnostic()?;
            let c = from_toml(&cfg)?;

            let mut out = out.as_ref().join(filename);
            out.set_extension("postcard");
            let bin_cfg = postcard::to_stdvec(&c).into_diagnostic()?;
            let mut f = std::fs::File::create(&out).into_diagnostic()?;
            f.write_all(&bin_cfg).into_diagnostic()?;
            println!("cargo:rustc-env={CONFIG_FILE_VAR}={}", out.display());
            println!("cargo:rerun-if-changed={path_disp}");

            Ok::<_, miette::Report>(())
        })()
        .wrap_err_with(|| format!("Failed to render config file '{path_disp}'"))
    }

}

/// Tools intended for use at runtime
pub mod runtime {
    use crate::PdmaConfig;

    #[derive(Debug, PartialEq)]
    pub enum Error {
        Postcard(postcard::Error),
    }

    pub fn from_postcard(s: &[u8]) -> Result<PdmaConfig, Error> {
        postcard::from_bytes(s).map_err(Error::Postcard)
    }
}

/// Load the configuration rendered by [`buildtime::render_file`] in a
/// build.rs.
#[macro_export]
macro_rules! include_config {
    () => {{
        const K1X_PDMA_CONFIG: &[u8] = include_bytes!(env!("K1X_PDMA_CONFIG"));
        $crate::runtime::from_postcard(K1X_PDMA_CONFIG)
    }};
}
