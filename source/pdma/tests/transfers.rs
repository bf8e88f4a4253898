mod support;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use k1x_pdma_config::{PdmaConfig, PoolConfig};
use pdma::{
    descriptor::HwDescriptor, BusWidth, Cookie, Direction, LongDescriptor, PauseError, Segment,
    SlaveConfig, Status, TxFlags, TxState,
};
use support::{config, Bench, Log};

fn uart_rx() -> SlaveConfig {
    SlaveConfig {
        src_addr: 0xd401_7000,
        src_width: BusWidth::Byte1,
        src_maxburst: 16,
        ..Default::default()
    }
}

#[test]
fn chains_complete_in_submission_order() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    let log = Log::default();

    let mut a = chan
        .prepare_copy(0x9000_0000, 0x8000_0000, 10_000, TxFlags::new())
        .unwrap();
    a.set_callback(log.record("a"));
    let mut b = chan
        .prepare_copy(0x9100_0000, 0x8100_0000, 100, TxFlags::new())
        .unwrap();
    b.set_callback(log.record("b"));

    // one cookie per descriptor; a chain is identified by its last one
    let a = a.submit();
    let b = b.submit();
    assert_eq!(a, Cookie::from_raw(2));
    assert_eq!(b, Cookie::from_raw(3));

    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    assert_eq!(chan.tx_status(a).status, Status::InProgress);
    assert_eq!(chan.tx_status(b).status, Status::InProgress);

    bench.finish_chain(phy);
    assert_eq!(log.events(), ["a"]);
    assert_eq!(chan.tx_status(a).status, Status::Complete);
    assert_eq!(chan.tx_status(b).status, Status::InProgress);

    bench.finish_chain(phy);
    assert_eq!(log.events(), ["a", "b"]);
    assert_eq!(
        chan.tx_status(b),
        TxState {
            status: Status::Complete,
            residue: 0
        }
    );
    assert_eq!(chan.status(), Status::Complete);
    assert_eq!(chan.descriptors_in_use(), 0);
}

#[test]
fn residue_follows_the_live_address() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    let src = 0x8000_0000;

    let cookie = chan
        .prepare_copy(0x9000_0000, src, 20_000, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    bench.sim.set_source_addr(phy, src);
    assert_eq!(chan.tx_status(cookie).residue, 20_000);

    // 100 bytes into the second descriptor
    bench.sim.set_source_addr(phy, src + 8191 + 100);
    assert_eq!(chan.tx_status(cookie).residue, 8091 + 3618);

    bench.sim.set_source_addr(phy, src + 20_000 - 1);
    let state = chan.tx_status(cookie);
    assert_eq!(state.status, Status::InProgress);
    assert_eq!(state.residue, 1);

    bench.sim.set_source_addr(phy, src + 20_000);
    bench.finish_chain(phy);
    assert_eq!(
        chan.tx_status(cookie),
        TxState {
            status: Status::Complete,
            residue: 0
        }
    );
}

#[test]
fn end_of_request_keeps_the_unmoved_bytes() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(22);
    chan.configure(&uart_rx()).unwrap();

    let cookie = chan
        .prepare_slave_single(0x4000_0000, 4096, Direction::DevToMem, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    // the peripheral ends the request after 100 bytes
    bench.finish_request(phy, Direction::DevToMem, 0x4000_0000 + 100);
    assert_eq!(chan.physical_channel(), None);
    assert_eq!(
        chan.tx_status(cookie),
        TxState {
            status: Status::Complete,
            residue: 3996
        }
    );

    // the snapshot is dropped once the next chain starts
    let next = chan
        .prepare_slave_single(0x4000_0000, 4096, Direction::DevToMem, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    assert_eq!(chan.tx_status(cookie).residue, 0);

    bench.sim.set_target_addr(phy, 0x4000_0000 + 4096);
    bench.finish_chain(phy);
    assert_eq!(
        chan.tx_status(next),
        TxState {
            status: Status::Complete,
            residue: 0
        }
    );
}

#[test]
fn device_to_memory_residue_uses_the_target_address() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(22);
    chan.configure(&uart_rx()).unwrap();

    let segments = [
        Segment {
            addr: 0x4000_0000,
            len: 100,
        },
        Segment {
            addr: 0x5000_0000,
            len: 9000,
        },
    ];
    let cookie = chan
        .prepare_slave_sg(&segments, Direction::DevToMem, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    // the source side is the peripheral FIFO, which never moves
    bench.sim.set_source_addr(phy, 0xd401_7000);
    bench.sim.set_target_addr(phy, 0x4000_0000);
    assert_eq!(chan.tx_status(cookie).residue, 9100);

    bench.sim.set_target_addr(phy, 0x5000_0000 + 50);
    assert_eq!(chan.tx_status(cookie).residue, 8141 + 809);
}

#[test]
fn queued_chain_reports_its_full_length() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);

    let a = chan
        .prepare_copy(0x9000_0000, 0x8000_0000, 256, TxFlags::new())
        .unwrap()
        .submit();
    let b = chan
        .prepare_copy(0x9100_0000, 0x8100_0000, 9000, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    bench.sim.set_source_addr(phy, 0x8000_0000 + 56);

    assert_eq!(chan.tx_status(a).residue, 200);
    assert_eq!(chan.tx_status(b).residue, 9000);
}

#[test]
fn unknown_cookies_report_an_error() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    let error = TxState {
        status: Status::Error,
        residue: 0,
    };
    assert_eq!(chan.tx_status(Cookie::from_raw(42)), error);
    assert_eq!(chan.tx_status(Cookie::BUSY), error);
}

#[test]
fn terminate_discards_everything() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    let log = Log::default();

    let mut cookies = Vec::new();
    for (event, src) in [("a", 0x8000_0000), ("b", 0x8100_0000)] {
        let mut xfer = chan
            .prepare_copy(0x9000_0000, src, 20_000, TxFlags::new())
            .unwrap();
        xfer.set_callback(log.record(event));
        cookies.push(xfer.submit());
    }
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    assert_eq!(bench.pm.active(), 1);

    chan.terminate_all();
    for &cookie in &cookies {
        assert_ne!(chan.tx_status(cookie).status, Status::InProgress);
    }
    assert_eq!(chan.status(), Status::Complete);
    assert_eq!(chan.physical_channel(), None);
    assert_eq!(chan.descriptors_in_use(), 0);
    assert!(!bench.sim.is_running(phy));
    assert!(!bench.sim.drcmr(5).get(pdma::regs::Drcmr::MAP_VALID));
    assert_eq!(bench.pm.active(), 0);

    // a late interrupt from the stopped channel has no owner to wake
    bench.finish_chain(phy);
    assert!(log.events().is_empty());

    // the channel is usable again
    let mut xfer = chan
        .prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
        .unwrap();
    xfer.set_callback(log.record("c"));
    xfer.submit();
    chan.issue_pending();
    bench.finish_chain(chan.physical_channel().unwrap());
    assert_eq!(log.events(), ["c"]);
}

#[test]
fn pause_keeps_progress() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(22);
    chan.configure(&uart_rx()).unwrap();

    assert_eq!(chan.pause(), Err(PauseError::NotRunning));

    let cookie = chan
        .prepare_slave_single(0x4000_0000, 4096, Direction::DevToMem, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    bench.sim.set_target_addr(phy, 0x4000_0000 + 1000);

    chan.pause().unwrap();
    assert!(!bench.sim.is_running(phy));
    assert_eq!(chan.status(), Status::Paused);
    assert_eq!(
        chan.tx_status(cookie),
        TxState {
            status: Status::Paused,
            residue: 3096
        }
    );

    chan.terminate_all();
    assert_eq!(chan.pause(), Err(PauseError::NotRunning));
}

#[test]
fn stuck_channel_is_given_up_on() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    chan.prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    bench.sim.set_stuck(phy, true);
    chan.terminate_all();

    // polled every 10us until giving up
    assert_eq!(bench.sim.elapsed_us(), 9990);
    assert_eq!(chan.status(), Status::Complete);
    assert_eq!(chan.physical_channel(), None);
}

#[test]
fn bus_error_does_not_halt_the_channel() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(5);
    let log = Log::default();

    let mut a = chan
        .prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
        .unwrap();
    a.set_callback(log.record("a"));
    a.submit();
    let b = chan
        .prepare_copy(0x9100_0000, 0x8100_0000, 64, TxFlags::new())
        .unwrap()
        .submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    bench.sim.bus_error(phy);
    assert_eq!(bench.pdma.handle_interrupt(), pdma::IrqReturn::Handled);
    bench.run();

    assert_eq!(log.events(), ["a"]);
    assert!(!bench.sim.dcsr(phy).irq_pending());
    assert_eq!(chan.tx_status(b).status, Status::InProgress);
    assert!(bench.sim.is_running(phy));
}

#[test]
fn cyclic_ring_never_completes() {
    let bench: Bench = Bench::new(config());
    let chan = bench.request(22);
    chan.configure(&uart_rx()).unwrap();
    let periods = Arc::new(AtomicUsize::new(0));

    let mut xfer = chan
        .prepare_cyclic(0x4000_0000, 4096, 1024, Direction::DevToMem, TxFlags::new())
        .unwrap();
    xfer.set_callback({
        let periods = periods.clone();
        move || {
            periods.fetch_add(1, Ordering::SeqCst);
        }
    });
    let cookie = xfer.submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();

    for _ in 0..6 {
        bench.finish_period(phy);
    }
    assert_eq!(periods.load(Ordering::SeqCst), 6);
    assert_eq!(chan.status(), Status::InProgress);
    assert_eq!(chan.physical_channel(), Some(phy));
    assert_eq!(chan.descriptors_in_use(), 4);

    bench.sim.set_target_addr(phy, 0x4000_0000 + 1024 + 24);
    assert_eq!(
        chan.tx_status(cookie),
        TxState {
            status: Status::InProgress,
            residue: 1000 + 1024 + 1024,
        }
    );

    chan.terminate_all();
    assert_eq!(chan.descriptors_in_use(), 0);
    assert_ne!(chan.tx_status(cookie).status, Status::InProgress);
}

#[test]
fn callbacks_may_reenter_the_channel() {
    let bench: Bench = Bench::new(config());
    let chan = Arc::new(bench.request(5));
    let log = Log::default();

    let mut first = chan
        .prepare_copy(0x9000_0000, 0x8000_0000, 64, TxFlags::new())
        .unwrap();
    first.set_callback({
        let chan = Arc::downgrade(&chan);
        let log = log.clone();
        move || {
            log.record("first")();
            let Some(chan) = chan.upgrade() else { return };
            let mut next = chan
                .prepare_copy(0x9100_0000, 0x8100_0000, 64, TxFlags::new())
                .unwrap();
            next.set_callback(log.record("next"));
            next.submit();
            chan.issue_pending();
        }
    });
    first.submit();
    chan.issue_pending();

    bench.finish_chain(chan.physical_channel().unwrap());
    assert_eq!(log.events(), ["first"]);
    assert_eq!(chan.status(), Status::InProgress);

    bench.finish_chain(chan.physical_channel().unwrap());
    assert_eq!(log.events(), ["first", "next"]);
    assert_eq!(chan.status(), Status::Complete);
}

#[test]
fn long_descriptors_carry_high_address_bits() {
    let bench: Bench<LongDescriptor> = Bench::new(PdmaConfig {
        descriptor_pool: PoolConfig {
            capacity: 16,
            bus_base: Some(0x1_0000_0000),
        },
        ..config()
    });
    let chan = bench.request(5);

    let xfer = chan
        .prepare_copy(0x3_0000_0000, 0x2_0000_0000, 100, TxFlags::new())
        .unwrap();
    let descs = xfer.hw_descriptors();
    assert_eq!(descs[0].0, 0x1_0000_0000);
    assert_eq!(descs[0].1.source(), 0x2_0000_0000);
    assert_eq!(descs[0].1.target(), 0x3_0000_0000);

    let cookie = xfer.submit();
    chan.issue_pending();
    let phy = chan.physical_channel().unwrap();
    assert_eq!(bench.sim.descriptor_addr(phy), 0x1_0000_0000);
    assert!(bench.sim.dcsr(phy).get(pdma::regs::Dcsr::LPAE_EN));

    bench.sim.set_source_addr(phy, 0x2_0000_0000 + 40);
    assert_eq!(chan.tx_status(cookie).residue, 60);
}
