#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use k1x_pdma_config::{PdmaConfig, PoolConfig};
use maitake::scheduler::Scheduler;
use pdma::{
    descriptor::HwDescriptor, sim::SimPdma, Channel, Direction, DmaSpec, IrqReturn, Pdma,
    Platform, PmCounter, ShortDescriptor,
};

/// Descriptors are placed in a fixed bus window below 4GiB.
pub const POOL_WINDOW: u64 = 0x7f00_0000;

pub fn config() -> PdmaConfig {
    PdmaConfig {
        descriptor_pool: PoolConfig {
            capacity: 64,
            bus_base: Some(POOL_WINDOW),
        },
        ..Default::default()
    }
}

pub struct Bench<D: HwDescriptor = ShortDescriptor> {
    pub pdma: Pdma<D>,
    pub sim: Arc<SimPdma>,
    pub pm: Arc<PmCounter>,
    scheduler: Arc<Scheduler>,
}

impl<D: HwDescriptor> Bench<D> {
    pub fn new(config: PdmaConfig) -> Self {
        trace_init();
        let sim = Arc::new(SimPdma::new());
        let pm = Arc::new(PmCounter::new());
        let scheduler = Arc::new(Scheduler::new());
        let pdma = Pdma::new(
            &config,
            Platform {
                mmio: sim.clone(),
                scheduler: scheduler.clone(),
                pm: pm.clone(),
                delay: Box::new(sim.delay()),
            },
        )
        .expect("bench config must be valid");
        Self {
            pdma,
            sim,
            pm,
            scheduler,
        }
    }

    pub fn request(&self, request_line: u32) -> Channel<D> {
        let chan = self
            .pdma
            .request_channel(DmaSpec {
                request_line,
                client_manages_power: false,
            })
            .expect("a channel must be free");
        chan.allocate_resources();
        self.run();
        chan
    }

    /// Ticks the scheduler until every task is waiting.
    pub fn run(&self) {
        for _ in 0..1000 {
            if !self.scheduler.tick().has_remaining {
                return;
            }
        }
        panic!("the scheduler never went idle");
    }

    /// The hardware finishes the chain on `phy`.
    pub fn finish_chain(&self, phy: u8) {
        self.sim.end_of_chain(phy);
        assert_eq!(self.pdma.handle_interrupt(), IrqReturn::Handled);
        self.run();
    }

    /// The peripheral on `phy` ends its request with the memory side of the
    /// transfer at `host_addr`.
    pub fn finish_request(&self, phy: u8, dir: Direction, host_addr: u64) {
        self.sim.end_of_request(phy, dir, host_addr);
        assert_eq!(self.pdma.handle_interrupt(), IrqReturn::Handled);
        self.run();
    }

    /// A cyclic ring on `phy` completes a period.
    pub fn finish_period(&self, phy: u8) {
        self.sim.end_of_period(phy);
        assert_eq!(self.pdma.handle_interrupt(), IrqReturn::Handled);
        self.run();
    }
}

/// Records the order in which callbacks run.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<&'static str>>>);

impl Log {
    pub fn record(&self, event: &'static str) -> impl Fn() + Send + Sync + 'static {
        let log = self.0.clone();
        move || log.lock().unwrap().push(event)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

pub fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("pdma=debug").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}
