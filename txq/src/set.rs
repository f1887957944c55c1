use std::{
    cell::{Cell, RefCell},
    fmt,
    num::NonZeroU16,
    rc::Rc,
};

use thiserror::Error;
use tracing::debug;

use crate::{item::TxItem, queue::TxQueue, NetDevice};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("queue set is already attached to a device")]
    AlreadyAttached,
}

/// Construction-time configuration for a [`TxQueueSet`].
///
/// The configuration is consumed by [`TxQueueSet::with_config`]; the queue
/// count and variant cannot change once the queues exist, so reconfiguring a
/// live device is unrepresentable.
pub struct TxQueueSetConfig {
    /// The number of transmission queues.
    n_queues: NonZeroU16,
    /// Instantiates each queue, for devices that need a pre-configured
    /// variant (e.g. with a limiter already attached).
    factory: Box<dyn Fn() -> TxQueue>,
}

impl Default for TxQueueSetConfig {
    fn default() -> Self {
        Self { n_queues: NonZeroU16::MIN, factory: Box::new(TxQueue::new) }
    }
}

impl TxQueueSetConfig {
    /// Sets the number of transmission queues.
    pub fn n_queues(mut self, n_queues: NonZeroU16) -> Self {
        self.n_queues = n_queues;
        self
    }

    /// Sets the factory used to instantiate each queue.
    pub fn queue_factory(mut self, factory: impl Fn() -> TxQueue + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }
}

impl fmt::Debug for TxQueueSetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueueSetConfig").field("n_queues", &self.n_queues).finish()
    }
}

/// The ordered collection of transmission queues belonging to one device.
///
/// The set owns its queues outright and the device owns the set; queues hold
/// only weak references back to the device, so dropping the device tears the
/// whole structure down without any manual dispose step.
pub struct TxQueueSet {
    queues: Vec<Rc<TxQueue>>,
    select: RefCell<Rc<dyn Fn(&TxItem) -> usize>>,
    attached: Cell<bool>,
}

impl Default for TxQueueSet {
    fn default() -> Self {
        Self::with_config(TxQueueSetConfig::default())
    }
}

impl TxQueueSet {
    /// Creates a set with a single base queue and the constant-zero selection
    /// policy: the zero-configuration case for single-queue devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the set described by `config`, instantiating every queue
    /// eagerly. The count and variant are fixed for the lifetime of the set.
    pub fn with_config(config: TxQueueSetConfig) -> Self {
        let queues = (0..config.n_queues.get()).map(|_| Rc::new((config.factory)())).collect();
        Self { queues, select: RefCell::new(Rc::new(|_| 0)), attached: Cell::new(false) }
    }

    /// The queue at index `i`. Repeated calls return the same queue.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.n_tx_queues()`; an out-of-range index is a
    /// programming error in the device adapter.
    pub fn tx_queue(&self, i: usize) -> &Rc<TxQueue> {
        assert!(i < self.queues.len(), "queue index {i} out of range: {} queues", self.queues.len());
        &self.queues[i]
    }

    /// The number of transmission queues, at least 1.
    pub fn n_tx_queues(&self) -> usize {
        self.queues.len()
    }

    /// Replaces the queue-selection policy. The policy must return an index
    /// in `[0, n_tx_queues())` for every item.
    pub fn set_select_queue(&self, policy: impl Fn(&TxItem) -> usize + 'static) {
        *self.select.borrow_mut() = Rc::new(policy);
    }

    /// Maps `item` to the index of the queue it should be transmitted on.
    ///
    /// # Panics
    ///
    /// Panics if the installed policy returns an out-of-range index.
    pub fn select_queue(&self, item: &TxItem) -> usize {
        let policy = Rc::clone(&self.select.borrow());
        let i = policy(item);
        assert!(
            i < self.queues.len(),
            "selection policy returned {i} for a device with {} queues",
            self.queues.len()
        );
        i
    }

    /// Attaches this set to its owning device, handing every queue a
    /// non-owning reference back to it.
    ///
    /// Called exactly once, when the device takes ownership of the set; a
    /// second call fails with [`AttachError::AlreadyAttached`].
    pub fn attach(&self, device: &Rc<dyn NetDevice>) -> Result<(), AttachError> {
        if self.attached.replace(true) {
            return Err(AttachError::AlreadyAttached);
        }

        debug!(n_queues = self.queues.len(), "attaching queue set to device");
        for queue in &self.queues {
            queue.bind_device(Rc::downgrade(device));
        }
        Ok(())
    }
}

impl fmt::Debug for TxQueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueueSet")
            .field("queues", &self.queues)
            .field("attached", &self.attached.get())
            .finish()
    }
}
