use std::{num::NonZeroU16, rc::Rc};

use bytes::Bytes;
use rand::Rng;
use tracing::info;

use txq::{by_flow_hash, TxItem};
use txq_sim::{FifoDiscipline, Sim, SimDevice, SimDeviceConfig};

fn main() {
    tracing_subscriber::fmt().init();

    let sim = Rc::new(Sim::new());

    // A 4-queue gigabit device with 32 KiB of credit per queue.
    let device = SimDevice::spawn(
        sim.clone(),
        SimDeviceConfig::default()
            .if_index(1)
            .n_queues(NonZeroU16::new(4).unwrap())
            .ring_slots(32)
            .queue_limit(32 * 1024),
    );
    device.queues().set_select_queue(by_flow_hash(device.queues().n_tx_queues()));

    let discipline = FifoDiscipline::new(device.clone());

    // Blast a burst of packets from a handful of flows at the device. The
    // burst far exceeds the per-queue credit, so most of it is buffered
    // upstream and trickles in as transmissions complete.
    let mut rng = rand::thread_rng();
    let flows: Vec<Bytes> = (0..8)
        .map(|flow| Bytes::from(vec![flow as u8; 64]))
        .collect();

    let n_items = 10_000;
    let mut offered = 0u64;
    for _ in 0..n_items {
        let flow = &flows[rng.gen_range(0..flows.len())];
        offered += flow.len() as u64;
        discipline.enqueue(TxItem::new(flow.clone()));
    }

    let buffered: usize = (0..device.queues().n_tx_queues())
        .map(|i| discipline.backlog(i))
        .sum();
    info!(offered, buffered, "burst enqueued");

    let events = sim.run();

    info!(
        events,
        items = device.transmitted_items(),
        bytes = device.transmitted_bytes(),
        elapsed_us = sim.now().as_nanos() / 1_000,
        "simulation drained"
    );

    assert_eq!(device.transmitted_bytes(), offered);
}
