#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Transmit-side flow control for simulated network devices.
//!
//! A device owns a [`TxQueueSet`]; the upstream queueing discipline registers
//! a wake callback on each [`TxQueue`] and is invited back whenever a stopped
//! queue regains capacity. An optional [`QueueLimits`] policy per queue bounds
//! the bytes in flight between the discipline and the device.

mod item;
mod limits;
mod queue;
mod select;
mod set;

pub use item::TxItem;
pub use limits::{FixedLimits, QueueLimits};
pub use queue::TxQueue;
pub use select::{by_flow_hash, by_priority, single_queue};
pub use set::{AttachError, TxQueueSet, TxQueueSetConfig};

/// The contract a device adapter exposes to its transmission queues.
///
/// Queues hold a non-owning reference to their device, resolved once when the
/// owning [`TxQueueSet`] is attached.
pub trait NetDevice {
    /// The interface index of the device.
    fn if_index(&self) -> u32;

    /// The maximum transmission unit of the device, in bytes.
    fn mtu(&self) -> u32;
}
