use std::{
    cell::{Cell, RefCell},
    fmt,
    num::NonZeroU16,
    rc::Rc,
};

use tracing::{debug, trace};
use txq::{FixedLimits, NetDevice, TxItem, TxQueue, TxQueueSet, TxQueueSetConfig};

use crate::sim::{Sim, SimTime};

/// Configuration for a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimDeviceConfig {
    if_index: u32,
    mtu: u32,
    n_queues: NonZeroU16,
    ring_slots: usize,
    nanos_per_byte: u64,
    queue_limit: Option<u32>,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            if_index: 0,
            mtu: 1500,
            n_queues: NonZeroU16::MIN,
            ring_slots: 16,
            // 1 Gbit/s
            nanos_per_byte: 8,
            queue_limit: None,
        }
    }
}

impl SimDeviceConfig {
    /// Sets the interface index reported by the device.
    pub fn if_index(mut self, if_index: u32) -> Self {
        self.if_index = if_index;
        self
    }

    /// Sets the MTU reported by the device.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Sets the number of transmission queues (and rings) of the device.
    pub fn n_queues(mut self, n_queues: NonZeroU16) -> Self {
        self.n_queues = n_queues;
        self
    }

    /// Sets the number of slots in each per-queue transmit ring.
    pub fn ring_slots(mut self, ring_slots: usize) -> Self {
        assert!(ring_slots > 0, "a transmit ring has at least one slot");
        self.ring_slots = ring_slots;
        self
    }

    /// Sets the serialization rate of the link as nanoseconds per byte.
    pub fn nanos_per_byte(mut self, nanos_per_byte: u64) -> Self {
        self.nanos_per_byte = nanos_per_byte;
        self
    }

    /// Attaches a [`FixedLimits`] limiter with the given byte cap to every
    /// queue of the device.
    pub fn queue_limit(mut self, max_bytes: u32) -> Self {
        self.queue_limit = Some(max_bytes);
        self
    }
}

struct TxRing {
    slots: usize,
    in_flight: usize,
}

/// Counters for completed transmissions, across all queues of a device.
#[derive(Debug, Default)]
struct DeviceStats {
    items: Cell<u64>,
    bytes: Cell<u64>,
}

/// A simulated network device: per-queue bounded transmit rings draining at a
/// fixed serialization rate.
///
/// Admission into a queue is reported to its limiter, a ring slot is held for
/// the serialization delay, and the queue is stopped while its ring is full.
/// Completions free limiter credit and wake the queue, inviting the upstream
/// discipline to pump more work.
pub struct SimDevice {
    sim: Rc<Sim>,
    queues: TxQueueSet,
    rings: Vec<RefCell<TxRing>>,
    stats: DeviceStats,
    if_index: u32,
    mtu: u32,
    nanos_per_byte: u64,
}

impl SimDevice {
    /// Builds the device together with its queue set (and per-queue limiters,
    /// if configured) and attaches the set. Simulation events hold only weak
    /// references to the returned handle, so dropping it cancels the device.
    pub fn spawn(sim: Rc<Sim>, config: SimDeviceConfig) -> Rc<Self> {
        let set_config = TxQueueSetConfig::default().n_queues(config.n_queues);
        let set_config = match config.queue_limit {
            Some(max_bytes) => set_config.queue_factory(move || {
                let queue = TxQueue::new();
                queue.set_queue_limits(Box::new(FixedLimits::new(max_bytes)));
                queue
            }),
            None => set_config,
        };

        let device = Rc::new(Self {
            sim,
            queues: TxQueueSet::with_config(set_config),
            rings: (0..config.n_queues.get())
                .map(|_| RefCell::new(TxRing { slots: config.ring_slots, in_flight: 0 }))
                .collect(),
            stats: DeviceStats::default(),
            if_index: config.if_index,
            mtu: config.mtu,
            nanos_per_byte: config.nanos_per_byte,
        });

        let as_device: Rc<dyn NetDevice> = device.clone();
        device.queues.attach(&as_device).expect("freshly created queue set");
        debug!(
            if_index = device.if_index,
            n_queues = device.queues.n_tx_queues(),
            "device up"
        );
        device
    }

    /// The device's transmission queues.
    pub fn queues(&self) -> &TxQueueSet {
        &self.queues
    }

    /// Total items transmitted by the device so far.
    pub fn transmitted_items(&self) -> u64 {
        self.stats.items.get()
    }

    /// Total bytes transmitted by the device so far.
    pub fn transmitted_bytes(&self) -> u64 {
        self.stats.bytes.get()
    }

    /// Hands `item` to queue `i` for transmission.
    ///
    /// The caller must only transmit on queues that are not stopped: the
    /// device stops a queue the moment its ring fills, and a transmit on a
    /// full ring is a contract violation.
    pub fn transmit(self: &Rc<Self>, i: usize, item: TxItem) {
        let queue = self.queues.tx_queue(i);
        let bytes = item.len() as u32;

        queue.notify_queued_bytes(bytes);

        let mut ring = self.rings[i].borrow_mut();
        assert!(ring.in_flight < ring.slots, "transmit on a full ring");
        ring.in_flight += 1;
        let full = ring.in_flight == ring.slots;
        drop(ring);

        if full {
            trace!(queue = i, "ring full, stopping queue");
            queue.stop();
        }

        let delay = SimTime::from_nanos(u64::from(bytes) * self.nanos_per_byte);
        let device = Rc::downgrade(self);
        self.sim.schedule(delay, move || {
            if let Some(device) = device.upgrade() {
                device.complete(i, bytes);
            }
        });
    }

    /// Runs when the link finishes serializing an item on queue `i`.
    fn complete(&self, i: usize, bytes: u32) {
        let mut ring = self.rings[i].borrow_mut();
        let was_full = ring.in_flight == ring.slots;
        ring.in_flight -= 1;
        drop(ring);

        self.stats.items.set(self.stats.items.get() + 1);
        self.stats.bytes.set(self.stats.bytes.get() + u64::from(bytes));
        trace!(queue = i, bytes, "transmission complete");

        let queue = self.queues.tx_queue(i);
        queue.notify_transmitted_bytes(bytes);
        if was_full {
            queue.wake();
        }
    }
}

impl NetDevice for SimDevice {
    fn if_index(&self) -> u32 {
        self.if_index
    }

    fn mtu(&self) -> u32 {
        self.mtu
    }
}

impl fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDevice")
            .field("if_index", &self.if_index)
            .field("queues", &self.queues)
            .field("transmitted_items", &self.stats.items.get())
            .finish()
    }
}
