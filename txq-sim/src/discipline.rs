use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use tracing::trace;
use txq::TxItem;

use crate::device::SimDevice;

/// A FIFO queueing discipline, the upstream consumer of a device's queues.
///
/// Items are buffered per queue and pumped into the device whenever the
/// corresponding queue accepts work. The per-queue wake callbacks re-enter
/// the pump loop, which is exactly the re-entrancy path the flow-control
/// layer guarantees safe.
pub struct FifoDiscipline {
    device: Rc<SimDevice>,
    buffers: Vec<RefCell<VecDeque<TxItem>>>,
}

impl FifoDiscipline {
    /// Creates the discipline and registers a wake callback on every queue
    /// of `device`.
    pub fn new(device: Rc<SimDevice>) -> Rc<Self> {
        let n_queues = device.queues().n_tx_queues();
        let this = Rc::new(Self {
            device,
            buffers: (0..n_queues).map(|_| RefCell::new(VecDeque::new())).collect(),
        });

        for i in 0..n_queues {
            let weak = Rc::downgrade(&this);
            this.device.queues().tx_queue(i).set_wake_callback(move || {
                if let Some(this) = weak.upgrade() {
                    this.pump(i);
                }
            });
        }

        this
    }

    /// Accepts `item`, routes it to a queue through the device's selection
    /// policy and pumps that queue.
    pub fn enqueue(&self, item: TxItem) {
        let i = self.device.queues().select_queue(&item);
        self.buffers[i].borrow_mut().push_back(item);
        self.pump(i);
    }

    /// Items buffered ahead of queue `i`, not yet handed to the device.
    pub fn backlog(&self, i: usize) -> usize {
        self.buffers[i].borrow().len()
    }

    /// Moves buffered items into the device until the queue stops or the
    /// buffer drains. Also runs as the wake callback, where firing does not
    /// guarantee pending work: an empty buffer makes this a no-op.
    fn pump(&self, i: usize) {
        loop {
            if self.device.queues().tx_queue(i).is_stopped() {
                return;
            }
            // The buffer borrow ends before the transmit call, which may
            // stop the queue and re-check it on the next iteration.
            let Some(item) = self.buffers[i].borrow_mut().pop_front() else { return };
            trace!(queue = i, bytes = item.len(), "pumping item");
            self.device.transmit(i, item);
        }
    }
}

impl fmt::Debug for FifoDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backlogs: Vec<usize> = self.buffers.iter().map(|b| b.borrow().len()).collect();
        f.debug_struct("FifoDiscipline").field("backlogs", &backlogs).finish()
    }
}
