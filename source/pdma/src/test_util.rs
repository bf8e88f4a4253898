use super::*;

use crate::sim::SimPdma;

/// Descriptors live in a fixed bus window below 4GiB, so that short
/// descriptors can link to each other regardless of where the test's heap
/// is.
pub(crate) const POOL_WINDOW: u64 = 0x7f00_0000;

pub(crate) fn config() -> PdmaConfig {
    PdmaConfig {
        descriptor_pool: PoolConfig {
            capacity: 64,
            bus_base: Some(POOL_WINDOW),
        },
        ..Default::default()
    }
}

/// An engine wired to a simulated controller, with a scheduler the test
/// ticks by hand.
pub(crate) struct TestPdma {
    pub(crate) pdma: Pdma,
    pub(crate) sim: Arc<SimPdma>,
    pub(crate) pm: Arc<PmCounter>,
    scheduler: Arc<Scheduler>,
}

impl TestPdma {
    pub(crate) fn new(config: PdmaConfig) -> Self {
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
        .expect("test config must be valid");

        Self {
            pdma,
            sim,
            pm,
            scheduler,
        }
    }

    /// Requests a channel for `request_line` and allocates its resources.
    pub(crate) fn request(&self, request_line: u32) -> Channel {
        let chan = self
            .pdma
            .request_channel(DmaSpec {
                request_line,
                client_manages_power: false,
            })
            .expect("a channel must be free");
        chan.allocate_resources();
        chan
    }

    /// Ticks the scheduler until no task has more work to do.
    pub(crate) fn run(&self) {
        let mut ticks = 0;
        loop {
            let tick = self.scheduler.tick();
            tracing::trace!(ticks, ?tick);
            ticks += 1;
            if !tick.has_remaining {
                return;
            }
            assert!(ticks < 1000, "the scheduler never went idle");
        }
    }

    /// Plays the hardware finishing the chain `phy` is running, and lets the
    /// owner's completion task process it.
    pub(crate) fn finish_chain(&self, phy: u8) {
        self.sim.end_of_chain(phy);
        assert_eq!(self.pdma.handle_interrupt(), IrqReturn::Handled);
        self.run();
    }
}

pub(crate) fn trace_init() {
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
