use super::TxStatusEvent;
use crate::ids::TxId;
use std::collections::{HashMap, VecDeque};

///
/// StatusCache
/// Bounded FIFO of recently committed transaction statuses.
///

pub(super) struct StatusCache {
    capacity: usize,
    order: VecDeque<TxId>,
    entries: HashMap<TxId, TxStatusEvent>,
}

impl StatusCache {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    // first commit wins; a later duplicate id does not overwrite it
    pub(super) fn insert(&mut self, event: TxStatusEvent) {
        if self.capacity == 0 || self.entries.contains_key(&event.tx_id) {
            return;
        }

        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }

        self.order.push_back(event.tx_id.clone());
        self.entries.insert(event.tx_id.clone(), event);
    }

    pub(super) fn get(&self, tx_id: &TxId) -> Option<&TxStatusEvent> {
        self.entries.get(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::session::ValidationCode;

    fn status(tx: &str, code: ValidationCode) -> TxStatusEvent {
        TxStatusEvent {
            tx_id: TxId::new(tx),
            validation_code: code,
            block_number: 1,
            source: String::new(),
        }
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let mut cache = StatusCache::new(2);
        cache.insert(status("a", ValidationCode::Valid));
        cache.insert(status("b", ValidationCode::Valid));
        cache.insert(status("c", ValidationCode::Valid));

        assert!(cache.get(&TxId::new("a")).is_none());
        assert!(cache.get(&TxId::new("b")).is_some());
        assert!(cache.get(&TxId::new("c")).is_some());
    }

    #[test]
    fn first_status_wins() {
        let mut cache = StatusCache::new(4);
        cache.insert(status("a", ValidationCode::Valid));
        cache.insert(status("a", ValidationCode::DuplicateTxId));

        assert_eq!(
            cache.get(&TxId::new("a")).map(|s| s.validation_code),
            Some(ValidationCode::Valid)
        );
    }
}
