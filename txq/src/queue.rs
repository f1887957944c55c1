use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{limits::QueueLimits, NetDevice};

/// A single device transmission queue.
///
/// The queue tracks two independent stop conditions: one driven by the device
/// (ring full, link down) and one driven by the attached [`QueueLimits`]. The
/// queue counts as stopped when either flag is set, but the upstream wake
/// callback is edge-triggered per flag: clearing the device flag fires it even
/// while the limiter flag still holds, and vice versa.
///
/// All state lives behind `Cell`/`RefCell`, so operations take `&self` and the
/// owning [`TxQueueSet`](crate::TxQueueSet) can hand out shared `Rc<TxQueue>`
/// handles. Every operation completes its state transition before invoking the
/// wake callback, so a callback that immediately queues more bytes observes a
/// consistent queue.
#[derive(Default)]
pub struct TxQueue {
    stopped_by_device: Cell<bool>,
    stopped_by_limits: Cell<bool>,
    limits: RefCell<Option<Box<dyn QueueLimits>>>,
    wake: RefCell<Option<Rc<dyn Fn()>>>,
    device: RefCell<Option<Weak<dyn NetDevice>>>,
}

impl TxQueue {
    /// Creates a queue with no limiter, no wake callback and no device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the queue is stopped by the device, its limiter, or both.
    pub fn is_stopped(&self) -> bool {
        self.stopped_by_device.get() || self.stopped_by_limits.get()
    }

    /// Clears the device stop flag without notifying the upstream discipline.
    pub fn start(&self) {
        trace!("start");
        self.stopped_by_device.set(false);
    }

    /// Sets the device stop flag.
    pub fn stop(&self) {
        trace!("stop");
        self.stopped_by_device.set(true);
    }

    /// Clears the device stop flag and, if it was set, invokes the wake
    /// callback to request more work from the upstream discipline.
    ///
    /// The callback fires on the device-flag edge alone: it is invoked even
    /// if the queue remains stopped by its limiter.
    pub fn wake(&self) {
        let was_stopped = self.stopped_by_device.replace(false);
        if !was_stopped {
            return;
        }

        debug!("device stop cleared, waking upstream");
        if let Some(cb) = self.wake_callback() {
            cb();
        }
    }

    /// Records `bytes` admitted into the queue. No-op without a limiter.
    ///
    /// If the limiter runs out of credit, the queue stops itself until enough
    /// bytes complete.
    pub fn notify_queued_bytes(&self, bytes: u32) {
        let mut guard = self.limits.borrow_mut();
        let Some(limits) = guard.as_mut() else { return };

        limits.queued(bytes);
        trace!(bytes, available = limits.available(), "queued");
        if limits.available() >= 0 {
            return;
        }

        debug!(available = limits.available(), "out of credit, stopping queue");
        self.stopped_by_limits.set(true);
    }

    /// Records `bytes` completed by the device, freeing limiter credit.
    /// No-op without a limiter or when `bytes` is zero.
    ///
    /// When credit becomes non-negative again the limiter stop flag clears
    /// and, if it was set, the wake callback fires. Like [`wake`](Self::wake),
    /// this is edge-triggered on the limiter flag alone, independently of the
    /// device stop flag.
    pub fn notify_transmitted_bytes(&self, bytes: u32) {
        if bytes == 0 {
            return;
        }

        {
            let mut guard = self.limits.borrow_mut();
            let Some(limits) = guard.as_mut() else { return };

            limits.completed(bytes);
            trace!(bytes, available = limits.available(), "transmitted");
            if limits.available() < 0 {
                return;
            }
        }

        // The limiter borrow is released above so a re-entrant
        // `notify_queued_bytes` from inside the callback can take it again.
        let was_stopped = self.stopped_by_limits.replace(false);
        if !was_stopped {
            return;
        }

        debug!("credit restored, waking upstream");
        if let Some(cb) = self.wake_callback() {
            cb();
        }
    }

    /// Forwards to the attached limiter's reset, if any.
    pub fn reset_queue_limits(&self) {
        if let Some(limits) = self.limits.borrow_mut().as_mut() {
            limits.reset();
        }
    }

    /// Attaches `limits` to this queue, replacing any previously owned
    /// limiter.
    pub fn set_queue_limits(&self, limits: Box<dyn QueueLimits>) {
        self.limits.borrow_mut().replace(limits);
    }

    /// Detaches and returns the owned limiter, if any.
    pub fn take_queue_limits(&self) -> Option<Box<dyn QueueLimits>> {
        self.limits.borrow_mut().take()
    }

    /// The remaining limiter credit, or `None` without a limiter.
    pub fn limits_available(&self) -> Option<i64> {
        self.limits.borrow().as_ref().map(|limits| limits.available())
    }

    /// Registers the upstream wake callback, replacing any previous one.
    ///
    /// The callback must tolerate spurious invocations: firing does not
    /// guarantee that the queue can accept a full packet, only that a stop
    /// flag cleared.
    pub fn set_wake_callback(&self, cb: impl Fn() + 'static) {
        self.wake.borrow_mut().replace(Rc::new(cb));
    }

    /// The owning device, once the queue set has been attached and while the
    /// device is alive.
    pub fn device(&self) -> Option<Rc<dyn NetDevice>> {
        self.device.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn bind_device(&self, device: Weak<dyn NetDevice>) {
        self.device.borrow_mut().replace(device);
    }

    fn wake_callback(&self) -> Option<Rc<dyn Fn()>> {
        self.wake.borrow().clone()
    }
}

impl fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueue")
            .field("stopped_by_device", &self.stopped_by_device.get())
            .field("stopped_by_limits", &self.stopped_by_limits.get())
            .field("has_limits", &self.limits.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::FixedLimits;

    use super::*;

    fn queue_with_limits(max_bytes: u32) -> TxQueue {
        let queue = TxQueue::new();
        queue.set_queue_limits(Box::new(FixedLimits::new(max_bytes)));
        queue
    }

    /// Counts wake callback invocations on a queue.
    fn wake_counter(queue: &TxQueue) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        queue.set_wake_callback(move || c.set(c.get() + 1));
        count
    }

    #[test]
    fn stopped_is_or_of_flags() {
        let queue = TxQueue::new();
        assert!(!queue.is_stopped());

        queue.stop();
        assert!(queue.is_stopped());

        queue.start();
        assert!(!queue.is_stopped());
    }

    #[test]
    fn limiter_stop_and_wake() {
        let _ = tracing_subscriber::fmt::try_init();
        let queue = queue_with_limits(100);
        let wakes = wake_counter(&queue);

        queue.notify_queued_bytes(60);
        assert_eq!(queue.limits_available(), Some(40));
        assert!(!queue.is_stopped());

        queue.notify_queued_bytes(50);
        assert_eq!(queue.limits_available(), Some(-10));
        assert!(queue.is_stopped());
        assert_eq!(wakes.get(), 0);

        queue.notify_transmitted_bytes(70);
        assert_eq!(queue.limits_available(), Some(60));
        assert!(!queue.is_stopped());
        assert_eq!(wakes.get(), 1);
    }

    #[test]
    fn completion_under_limit_stays_stopped() {
        let queue = queue_with_limits(100);
        let wakes = wake_counter(&queue);

        queue.notify_queued_bytes(300);
        assert!(queue.is_stopped());

        // Still 100 bytes over the cap: no wake, still stopped.
        queue.notify_transmitted_bytes(100);
        assert!(queue.is_stopped());
        assert_eq!(wakes.get(), 0);

        queue.notify_transmitted_bytes(100);
        assert!(!queue.is_stopped());
        assert_eq!(wakes.get(), 1);
    }

    #[test]
    fn wake_without_device_stop_is_a_no_op() {
        let queue = TxQueue::new();
        let wakes = wake_counter(&queue);

        queue.wake();
        assert!(!queue.is_stopped());
        assert_eq!(wakes.get(), 0);
    }

    #[test]
    fn wake_fires_while_limiter_still_stops() {
        let queue = queue_with_limits(10);
        let wakes = wake_counter(&queue);

        queue.notify_queued_bytes(20);
        queue.stop();
        assert!(queue.is_stopped());

        // Device-flag edge fires even though the limiter flag still holds.
        queue.wake();
        assert_eq!(wakes.get(), 1);
        assert!(queue.is_stopped());
    }

    #[test]
    fn limit_clear_fires_while_device_still_stops() {
        let queue = queue_with_limits(10);
        let wakes = wake_counter(&queue);

        queue.notify_queued_bytes(20);
        queue.stop();

        queue.notify_transmitted_bytes(20);
        assert_eq!(wakes.get(), 1);
        assert!(queue.is_stopped());
    }

    #[test]
    fn start_does_not_invoke_callback() {
        let queue = TxQueue::new();
        let wakes = wake_counter(&queue);

        queue.stop();
        queue.start();
        assert!(!queue.is_stopped());
        assert_eq!(wakes.get(), 0);
    }

    #[test]
    fn zero_byte_completion_is_a_no_op() {
        let queue = queue_with_limits(10);
        let wakes = wake_counter(&queue);

        queue.notify_queued_bytes(20);
        assert!(queue.is_stopped());

        queue.notify_transmitted_bytes(0);
        assert!(queue.is_stopped());
        assert_eq!(wakes.get(), 0);
    }

    #[test]
    fn no_limiter_never_limit_stops() {
        let queue = TxQueue::new();

        queue.notify_queued_bytes(u32::MAX);
        queue.notify_queued_bytes(u32::MAX);
        queue.notify_transmitted_bytes(1);
        assert!(!queue.is_stopped());
        assert_eq!(queue.limits_available(), None);
    }

    #[test]
    fn detached_limiter_keeps_state() {
        let queue = queue_with_limits(100);
        queue.notify_queued_bytes(30);

        let limits = queue.take_queue_limits().unwrap();
        assert_eq!(limits.available(), 70);
        assert_eq!(queue.limits_available(), None);
    }

    #[test]
    fn reset_restores_credit() {
        let queue = queue_with_limits(100);

        queue.notify_queued_bytes(250);
        queue.reset_queue_limits();
        assert_eq!(queue.limits_available(), Some(100));
    }

    #[test]
    fn reentrant_queueing_from_wake_callback() {
        let queue = Rc::new(queue_with_limits(100));

        // The callback immediately queues more bytes, like a discipline that
        // refills the device the moment credit frees up.
        let q = queue.clone();
        queue.set_wake_callback(move || q.notify_queued_bytes(150));

        queue.notify_queued_bytes(120);
        assert!(queue.is_stopped());

        queue.notify_transmitted_bytes(120);
        // The re-entrant call ran out of credit again and re-stopped the
        // queue after the wake.
        assert!(queue.is_stopped());
        assert_eq!(queue.limits_available(), Some(-50));
    }
}
