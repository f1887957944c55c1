use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::item::TxItem;

/// How many payload bytes feed the flow hash. Enough to cover the headers
/// that identify a flow without touching the whole payload.
const FLOW_HASH_PREFIX: usize = 64;

/// The default selection policy: every item maps to queue 0.
pub fn single_queue() -> impl Fn(&TxItem) -> usize {
    |_| 0
}

/// Maps the item priority onto `[0, n_queues)`, clamping priorities beyond
/// the queue count to the last queue.
pub fn by_priority(n_queues: usize) -> impl Fn(&TxItem) -> usize {
    assert!(n_queues > 0, "a device has at least one queue");
    move |item| usize::from(item.priority()).min(n_queues - 1)
}

/// Hashes a bounded payload prefix so items of the same flow land on the
/// same queue, spreading distinct flows across a multi-queue device.
pub fn by_flow_hash(n_queues: usize) -> impl Fn(&TxItem) -> usize {
    assert!(n_queues > 0, "a device has at least one queue");
    move |item| {
        let payload = item.payload();
        let prefix = &payload[..payload.len().min(FLOW_HASH_PREFIX)];

        let mut hasher = FxHasher::default();
        hasher.write(prefix);
        (hasher.finish() % n_queues as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rand::Rng;

    use super::*;

    #[test]
    fn single_queue_ignores_the_item() {
        let policy = single_queue();
        let mut rng = rand::thread_rng();

        for _ in 0..32 {
            let mut payload = vec![0u8; rng.gen_range(0..2048)];
            rng.fill(&mut payload[..]);
            let item = TxItem::new(Bytes::from(payload)).with_priority(rng.gen());
            assert_eq!(policy(&item), 0);
        }
    }

    #[test]
    fn priority_maps_and_clamps() {
        let policy = by_priority(4);

        assert_eq!(policy(&TxItem::new(Bytes::new())), 0);
        assert_eq!(policy(&TxItem::new(Bytes::new()).with_priority(3)), 3);
        assert_eq!(policy(&TxItem::new(Bytes::new()).with_priority(255)), 3);
    }

    #[test]
    fn flow_hash_is_stable_per_flow() {
        let policy = by_flow_hash(8);

        let flow = TxItem::new(Bytes::from_static(b"10.0.0.1:4444 -> 10.0.0.2:80"));
        let first = policy(&flow);
        for _ in 0..16 {
            assert_eq!(policy(&flow), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn flow_hash_spreads_distinct_flows() {
        let policy = by_flow_hash(8);
        let mut rng = rand::thread_rng();

        let mut seen = [false; 8];
        for _ in 0..256 {
            let mut payload = vec![0u8; 28];
            rng.fill(&mut payload[..]);
            seen[policy(&TxItem::new(Bytes::from(payload)))] = true;
        }

        // 256 random flows over 8 buckets hit more than one bucket.
        assert!(seen.iter().filter(|hit| **hit).count() > 1);
    }

    #[test]
    fn flow_hash_handles_short_payloads() {
        let policy = by_flow_hash(4);

        assert!(policy(&TxItem::new(Bytes::new())) < 4);
        assert!(policy(&TxItem::new(Bytes::from_static(b"x"))) < 4);
    }
}
