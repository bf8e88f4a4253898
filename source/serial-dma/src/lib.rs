//! # K1X UART DMA
//!
//! The DMA transmit and receive paths of the K1X UART, written against the
//! [`pdma`] channel API.
//!
//! A [`DmaSerial`] owns two channels: one moving bytes from a transmit
//! buffer into the UART's FIFO register, and one moving bytes from the FIFO
//! into a receive buffer. Reception runs continuously in blocks of
//! [`SerialDmaConfig::rx_block`] bytes. When a block fills up, or when the
//! UART raises its receive-timeout interrupt and the platform calls
//! [`DmaSerial::rx_timeout`], the number of bytes that landed in the receive
//! buffer is queued for [`DmaSerial::take_rx`] and the next block is started.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{collections::VecDeque, sync::Arc};
use core::fmt;

use maitake::sync::WaitCell;
use mycelium_util::sync::spin::Mutex;
use pdma::{
    descriptor::HwDescriptor, BusWidth, Channel, ConfigError, Cookie, Direction, PrepError,
    Segment, ShortDescriptor, SlaveConfig, TxFlags,
};

/// Burst size programmed in both directions, in bytes.
pub const DMA_BURST_SIZE: u32 = 8;

/// How many received block lengths are held until they are taken with
/// [`DmaSerial::take_rx`].
pub const RX_QUEUE_DEPTH: usize = 16;

/// Where the UART and its DMA buffers live.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SerialDmaConfig {
    /// Bus address of the UART's FIFO register.
    pub fifo_addr: u64,
    /// The buffer transmissions are read from.
    pub tx_buf: Segment,
    /// The buffer reception writes to.
    pub rx_buf: Segment,
    /// Bytes requested from the receive channel at a time. At most
    /// `rx_buf.len`.
    pub rx_block: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SerialError {
    /// A transmission is already running.
    TxBusy,
    /// A transmission does not fit in the transmit buffer.
    TxTooLong { len: usize, max: usize },
    /// The receive block is empty, or larger than the receive buffer.
    RxBlock { block: usize, buf: usize },
    /// Reception is not running.
    RxNotRunning,
    /// The channel rejected the UART's slave configuration.
    Config(ConfigError),
    /// The channel could not prepare a transfer.
    Prep(PrepError),
}

/// The UART's DMA engine client.
pub struct DmaSerial<D: HwDescriptor = ShortDescriptor> {
    inner: Arc<Inner<D>>,
}

struct Inner<D: HwDescriptor> {
    tx: Channel<D>,
    rx: Channel<D>,
    config: SerialDmaConfig,
    state: Mutex<State>,
    /// Woken whenever a transmission ends.
    tx_idle: WaitCell,
}

#[derive(Debug, Default)]
struct State {
    tx_running: bool,
    tx_cookie: Option<Cookie>,
    rx_running: bool,
    /// Reception was stopped, so finished blocks are not restarted.
    rx_stop: bool,
    rx_cookie: Option<Cookie>,
    received: VecDeque<usize>,
    rx_overruns: usize,
}

// === impl DmaSerial ===

impl<D: HwDescriptor> DmaSerial<D> {
    /// Takes over the `tx` and `rx` channels, allocating their resources.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`DmaSerial`]`)` if `config` is usable.
    /// - [`Err`]`(`[`SerialError::RxBlock`]`)` if the receive block is empty
    ///   or does not fit in the receive buffer.
    pub fn new(tx: Channel<D>, rx: Channel<D>, config: SerialDmaConfig) -> Result<Self, SerialError> {
        if config.rx_block == 0 || config.rx_block > config.rx_buf.len {
            return Err(SerialError::RxBlock {
                block: config.rx_block,
                buf: config.rx_buf.len,
            });
        }

        tx.allocate_resources();
        rx.allocate_resources();
        tracing::debug!(
            tx = tx.id(),
            rx = rx.id(),
            fifo = ?format_args!("{:#x}", config.fifo_addr),
            rx_block = config.rx_block,
            "UART DMA channels ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                rx,
                config,
                state: Mutex::new(State::default()),
                tx_idle: WaitCell::new(),
            }),
        })
    }

    #[must_use]
    pub fn tx_channel(&self) -> &Channel<D> {
        &self.inner.tx
    }

    #[must_use]
    pub fn rx_channel(&self) -> &Channel<D> {
        &self.inner.rx
    }

    #[must_use]
    pub fn is_tx_running(&self) -> bool {
        self.inner.state.lock().tx_running
    }

    #[must_use]
    pub fn is_rx_running(&self) -> bool {
        self.inner.state.lock().rx_running
    }

    /// Transmits the first `len` bytes of the transmit buffer.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Cookie`]`)` identifying the transmission on the transmit
    ///   channel.
    /// - [`Err`]`(`[`SerialError::TxBusy`]`)` if the previous transmission
    ///   has not finished.
    /// - [`Err`]`(`[`SerialError::TxTooLong`]`)` if `len` exceeds the
    ///   transmit buffer.
    /// - [`Err`]`(`[`SerialError::Prep`]`)` if the transfer could not be
    ///   prepared, including when `len` is zero.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start_tx(&self, len: usize) -> Result<Cookie, SerialError> {
        let max = self.inner.config.tx_buf.len;
        if len > max {
            return Err(SerialError::TxTooLong { len, max });
        }

        {
            let mut state = self.inner.state.lock();
            if state.tx_running {
                return Err(SerialError::TxBusy);
            }
            state.tx_running = true;
        }

        self.inner.submit_tx(len).map_err(|error| {
            self.inner.state.lock().tx_running = false;
            error
        })
    }

    /// Waits until no transmission is running.
    ///
    /// Only one task may wait at a time.
    pub async fn wait_tx_idle(&self) {
        loop {
            let wait = self.inner.tx_idle.subscribe().await;
            if !self.is_tx_running() {
                return;
            }
            if wait.await.is_err() {
                return;
            }
        }
    }

    /// Aborts the running transmission, if any.
    pub fn stop_tx(&self) {
        self.inner.tx.terminate_all();
        {
            let mut state = self.inner.state.lock();
            state.tx_running = false;
            state.tx_cookie = None;
        }
        self.inner.tx_idle.wake();
        tracing::debug!("UART DMA transmit stopped");
    }

    /// Starts continuous reception. Does nothing if reception is already
    /// running.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start_rx(&self) -> Result<(), SerialError> {
        self.inner.state.lock().rx_stop = false;
        self.inner.start_rx()
    }

    /// Stops reception. Bytes received into the current block are
    /// discarded.
    pub fn stop_rx(&self) {
        self.inner.state.lock().rx_stop = true;
        self.inner.rx.terminate_all();
        {
            let mut state = self.inner.state.lock();
            state.rx_running = false;
            state.rx_cookie = None;
        }
        tracing::debug!("UART DMA receive stopped");
    }

    /// Handles the UART's receive-timeout interrupt: the line went quiet
    /// before the current block filled up.
    ///
    /// The receive channel is paused, the bytes that reached the receive
    /// buffer are queued, and a fresh block is started.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(usize)` with the number of bytes received into the block.
    /// - [`Err`]`(`[`SerialError::RxNotRunning`]`)` if reception isn't
    ///   running.
    /// - [`Err`]`(`[`SerialError::Config`]`)` or
    ///   [`Err`]`(`[`SerialError::Prep`]`)` if reception could not be
    ///   restarted. The bytes received so far are still queued.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rx_timeout(&self) -> Result<usize, SerialError> {
        let inner = &self.inner;
        let cookie = {
            let state = inner.state.lock();
            match state.rx_cookie {
                Some(cookie) if state.rx_running => cookie,
                _ => return Err(SerialError::RxNotRunning),
            }
        };

        if let Err(error) = inner.rx.pause() {
            tracing::debug!(%error, "receive channel holds no physical channel");
        }
        let residue = inner.rx.tx_status(cookie).residue as usize;
        let count = inner.config.rx_block.saturating_sub(residue);
        inner.rx.terminate_all();

        let restart = {
            let mut state = inner.state.lock();
            state.rx_running = false;
            state.rx_cookie = None;
            !state.rx_stop
        };
        if count > 0 {
            inner.record_rx(count);
        }
        tracing::trace!(count, "receive timeout");

        if restart {
            inner.start_rx()?;
        }
        Ok(count)
    }

    /// Takes the length of the oldest received block, if any.
    ///
    /// Received bytes are always at the start of the receive buffer, so each
    /// block must be consumed before the next one overwrites it.
    pub fn take_rx(&self) -> Option<usize> {
        self.inner.state.lock().received.pop_front()
    }

    /// Number of received blocks dropped because the queue was full.
    #[must_use]
    pub fn rx_overruns(&self) -> usize {
        self.inner.state.lock().rx_overruns
    }
}

impl<D: HwDescriptor> fmt::Debug for DmaSerial<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DmaSerial")
            .field("tx", &self.inner.tx)
            .field("rx", &self.inner.rx)
            .field("config", &self.inner.config)
            .field("state", &*state)
            .finish()
    }
}

// === impl Inner ===

impl<D: HwDescriptor> Inner<D> {
    fn submit_tx(self: &Arc<Self>, len: usize) -> Result<Cookie, SerialError> {
        self.tx.configure(&SlaveConfig {
            dst_addr: self.config.fifo_addr,
            dst_width: BusWidth::Byte1,
            dst_maxburst: DMA_BURST_SIZE,
            ..Default::default()
        })?;

        let mut xfer = self.tx.prepare_slave_single(
            self.config.tx_buf.addr,
            len,
            Direction::MemToDev,
            TxFlags::new().with(TxFlags::PREP_INTERRUPT, true),
        )?;
        let this = Arc::downgrade(self);
        xfer.set_callback(move || {
            if let Some(this) = this.upgrade() {
                this.tx_done();
            }
        });

        let cookie = xfer.submit();
        self.state.lock().tx_cookie = Some(cookie);
        self.tx.issue_pending();
        Ok(cookie)
    }

    fn tx_done(&self) {
        {
            let mut state = self.state.lock();
            state.tx_running = false;
            state.tx_cookie = None;
        }
        tracing::trace!("UART DMA transmit complete");
        self.tx_idle.wake();
    }

    fn start_rx(self: &Arc<Self>) -> Result<(), SerialError> {
        {
            let mut state = self.state.lock();
            if state.rx_running {
                return Ok(());
            }
            state.rx_running = true;
        }

        self.submit_rx().map_err(|error| {
            self.state.lock().rx_running = false;
            error
        })
    }

    fn submit_rx(self: &Arc<Self>) -> Result<(), SerialError> {
        self.rx.configure(&SlaveConfig {
            src_addr: self.config.fifo_addr,
            src_width: BusWidth::Byte1,
            src_maxburst: DMA_BURST_SIZE,
            ..Default::default()
        })?;

        let mut xfer = self.rx.prepare_slave_single(
            self.config.rx_buf.addr,
            self.config.rx_block,
            Direction::DevToMem,
            TxFlags::new().with(TxFlags::PREP_INTERRUPT, true),
        )?;
        let this = Arc::downgrade(self);
        xfer.set_callback(move || {
            if let Some(this) = this.upgrade() {
                this.rx_done();
            }
        });

        let cookie = xfer.submit();
        self.state.lock().rx_cookie = Some(cookie);
        self.rx.issue_pending();
        Ok(())
    }

    /// A receive block filled up.
    fn rx_done(self: &Arc<Self>) {
        let Some(cookie) = self.state.lock().rx_cookie.take() else {
            return;
        };
        let residue = self.rx.tx_status(cookie).residue as usize;
        let count = self.config.rx_block.saturating_sub(residue);
        self.record_rx(count);

        let restart = {
            let mut state = self.state.lock();
            state.rx_running = false;
            !state.rx_stop
        };
        if restart {
            if let Err(error) = self.start_rx() {
                tracing::warn!(%error, "failed to restart UART DMA receive");
            }
        }
    }

    fn record_rx(&self, count: usize) {
        let mut state = self.state.lock();
        if state.received.len() >= RX_QUEUE_DEPTH {
            state.rx_overruns += 1;
            tracing::warn!(count, overruns = state.rx_overruns, "UART DMA receive queue full");
            return;
        }
        state.received.push_back(count);
    }
}

// === impl SerialError ===

impl From<ConfigError> for SerialError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<PrepError> for SerialError {
    fn from(error: PrepError) -> Self {
        Self::Prep(error)
    }
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialError::TxBusy => f.write_str("a transmission is already running"),
            SerialError::TxTooLong { len, max } => {
                write!(f, "{len} bytes do not fit in the {max} byte transmit buffer")
            }
            SerialError::RxBlock { block, buf } => write!(
                f,
                "receive block of {block} bytes does not fit in the {buf} byte receive buffer"
            ),
            SerialError::RxNotRunning => f.write_str("reception is not running"),
            SerialError::Config(error) => write!(f, "invalid slave configuration: {error}"),
            SerialError::Prep(error) => write!(f, "failed to prepare transfer: {error}"),
        }
    }
}
