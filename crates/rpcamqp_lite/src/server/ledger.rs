use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RpcServerError;

pub const DEFAULT_RETAIN_SETTLED: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    InFlight,
    Settled,
}

/// Tracks delivery tags seen on the dispatcher's channel.
///
/// A tag can be claimed once. The claim is held while the request is being
/// processed and settled after the acknowledgment; a tag that is in flight or
/// settled is rejected as a duplicate. Delivery tags grow monotonically per
/// channel, so only the newest `retain_settled` settled tags are remembered.
#[derive(Debug)]
pub struct DeliveryLedger {
    deliveries: DashMap<u64, DeliveryState, ahash::RandomState>,
    retain_settled: usize,
}

impl DeliveryLedger {
    pub fn new(retain_settled: usize) -> Self {
        Self {
            deliveries: DashMap::default(),
            retain_settled: retain_settled.max(1),
        }
    }

    /// Claim a delivery tag. Returns a claim that releases the tag on drop
    /// unless it was settled.
    ///
    /// Returns an error if the tag is already in flight or settled.
    pub fn try_claim(self: &Arc<Self>, delivery_tag: u64) -> Result<DeliveryClaim, RpcServerError> {
        use dashmap::mapref::entry::Entry;

        match self.deliveries.entry(delivery_tag) {
            Entry::Occupied(_) => Err(RpcServerError::DuplicateDelivery(delivery_tag)),
            Entry::Vacant(slot) => {
                slot.insert(DeliveryState::InFlight);
                Ok(DeliveryClaim {
                    delivery_tag,
                    ledger: Arc::clone(self),
                    settled: false,
                })
            }
        }
    }

    pub fn is_in_flight(&self, delivery_tag: u64) -> bool {
        self.state(delivery_tag) == Some(DeliveryState::InFlight)
    }

    pub fn is_settled(&self, delivery_tag: u64) -> bool {
        self.state(delivery_tag) == Some(DeliveryState::Settled)
    }

    /// Number of deliveries currently being processed.
    pub fn in_flight(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|entry| *entry.value() == DeliveryState::InFlight)
            .count()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    fn state(&self, delivery_tag: u64) -> Option<DeliveryState> {
        self.deliveries.get(&delivery_tag).map(|entry| *entry.value())
    }

    fn settle(&self, delivery_tag: u64) {
        self.deliveries.insert(delivery_tag, DeliveryState::Settled);
        if self.deliveries.len() > self.retain_settled.saturating_mul(2) {
            self.prune(delivery_tag);
        }
    }

    fn prune(&self, newest: u64) {
        let floor = newest.saturating_sub(self.retain_settled as u64);
        self.deliveries
            .retain(|tag, state| *state == DeliveryState::InFlight || *tag > floor);
    }

    /// Remove an unsettled claim (used internally by DeliveryClaim).
    fn release(&self, delivery_tag: u64) {
        self.deliveries
            .remove_if(&delivery_tag, |_, state| *state == DeliveryState::InFlight);
    }
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN_SETTLED)
    }
}

/// A claimed delivery tag. Dropping it without settling frees the tag again.
pub struct DeliveryClaim {
    delivery_tag: u64,
    ledger: Arc<DeliveryLedger>,
    settled: bool,
}

impl DeliveryClaim {
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Mark the delivery as acknowledged; later deliveries with the same tag
    /// are duplicates.
    pub fn settle(mut self) {
        self.ledger.settle(self.delivery_tag);
        self.settled = true;
    }
}

impl Drop for DeliveryClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.release(self.delivery_tag);
        }
    }
}

impl fmt::Debug for DeliveryClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryClaim")
            .field("delivery_tag", &self.delivery_tag)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_settle() {
        let ledger = Arc::new(DeliveryLedger::default());

        let claim = ledger.try_claim(7).unwrap();
        assert_eq!(claim.delivery_tag(), 7);
        assert!(ledger.is_in_flight(7));
        assert_eq!(ledger.in_flight(), 1);

        claim.settle();
        assert!(ledger.is_settled(7));
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn test_duplicate_while_in_flight_rejected() {
        let ledger = Arc::new(DeliveryLedger::default());
        let _claim = ledger.try_claim(1).unwrap();

        let result = ledger.try_claim(1);
        assert!(matches!(result, Err(RpcServerError::DuplicateDelivery(1))));
    }

    #[test]
    fn test_duplicate_after_settle_rejected() {
        let ledger = Arc::new(DeliveryLedger::default());
        ledger.try_claim(1).unwrap().settle();

        assert!(ledger.try_claim(1).is_err());
    }

    #[test]
    fn test_unsettled_claim_released_on_drop() {
        let ledger = Arc::new(DeliveryLedger::default());

        {
            let _claim = ledger.try_claim(3).unwrap();
        }

        // Nothing was acknowledged, so the tag can be claimed again
        assert!(ledger.is_empty());
        let _claim = ledger.try_claim(3).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_old_settled_tags_pruned() {
        let ledger = Arc::new(DeliveryLedger::new(4));

        for tag in 1..=9 {
            ledger.try_claim(tag).unwrap().settle();
        }

        assert!(ledger.len() <= 8);
        assert!(ledger.is_settled(9));
        assert!(!ledger.is_settled(1));
    }

    #[test]
    fn test_prune_keeps_in_flight() {
        let ledger = Arc::new(DeliveryLedger::new(1));
        let _held = ledger.try_claim(1).unwrap();

        for tag in 2..=6 {
            ledger.try_claim(tag).unwrap().settle();
        }

        assert!(ledger.is_in_flight(1));
    }
}
