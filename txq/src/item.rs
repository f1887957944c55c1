use bytes::Bytes;

/// An outgoing item handed to the queue-selection policy.
///
/// Carries the payload to be transmitted plus the metadata selection policies
/// key on. The flow-control layer never inspects the payload; only its length
/// is reported to the device.
#[derive(Debug, Clone, Default)]
pub struct TxItem {
    payload: Bytes,
    priority: u8,
}

impl TxItem {
    /// Creates an item with the default (lowest) priority.
    pub fn new(payload: Bytes) -> Self {
        Self { payload, priority: 0 }
    }

    /// Sets the item priority, used by priority-aware selection policies.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// The payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// A reference to the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The item priority.
    pub fn priority(&self) -> u8 {
        self.priority
    }
}
