//! Pending event queue with per-resource deduplication.

use std::collections::{BTreeMap, VecDeque};

/// An event that can be queued per key.
pub trait QueuedEvent {
    /// The key events are grouped and deduplicated by (a resource id).
    fn key(&self) -> &str;

    /// Returns true if the event removes the resource.
    fn is_removal(&self) -> bool;
}

/// Queue of pending events, grouped by key.
///
/// # Deduplication Logic
///
/// When several events arrive for the same key before the queue is drained:
/// - A removal clears everything pending for the key and replaces it
/// - A non-removal replaces a pending non-removal (latest desired state wins)
/// - Removal then non-removal: keep both (maintain ordering)
///
/// Draining yields keys in sorted order, and each key's events in arrival
/// order.
#[derive(Debug)]
pub struct EventQueue<E> {
    to_sync: BTreeMap<String, VecDeque<E>>,
    pending_count: usize,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }
}

impl<E: QueuedEvent> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there are pending events.
    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    /// Returns the number of pending events.
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Adds events with deduplication.
    pub fn add_to_sync(&mut self, events: impl IntoIterator<Item = E>) {
        for event in events {
            self.add_single(event);
        }
    }

    fn add_single(&mut self, event: E) {
        let queue = self.to_sync.entry(event.key().to_string()).or_default();

        if event.is_removal() {
            self.pending_count -= queue.len();
            queue.clear();
            queue.push_back(event);
            self.pending_count += 1;
            return;
        }

        if let Some(last) = queue.back_mut() {
            if !last.is_removal() {
                *last = event;
                return;
            }
        }
        queue.push_back(event);
        self.pending_count += 1;
    }

    /// Drains all pending events.
    pub fn drain(&mut self) -> Vec<E> {
        let mut result = Vec::with_capacity(self.pending_count);
        for (_key, queue) in std::mem::take(&mut self.to_sync) {
            result.extend(queue);
        }
        self.pending_count = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Bind(&'static str, u16),
        Unbind(&'static str),
    }

    impl QueuedEvent for Ev {
        fn key(&self) -> &str {
            match self {
                Ev::Bind(k, _) | Ev::Unbind(k) => k,
            }
        }

        fn is_removal(&self) -> bool {
            matches!(self, Ev::Unbind(_))
        }
    }

    #[test]
    fn test_latest_bind_wins() {
        let mut queue = EventQueue::new();
        queue.add_to_sync(vec![Ev::Bind("portA", 100), Ev::Bind("portA", 200)]);

        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.drain(), vec![Ev::Bind("portA", 200)]);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_unbind_clears_pending_bind() {
        let mut queue = EventQueue::new();
        queue.add_to_sync(vec![Ev::Bind("portA", 100), Ev::Unbind("portA")]);

        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.drain(), vec![Ev::Unbind("portA")]);
    }

    #[test]
    fn test_unbind_then_bind_keeps_both() {
        let mut queue = EventQueue::new();
        queue.add_to_sync(vec![
            Ev::Unbind("portA"),
            Ev::Bind("portA", 100),
            Ev::Bind("portA", 300),
        ]);

        assert_eq!(queue.pending_count(), 2);
        assert_eq!(
            queue.drain(),
            vec![Ev::Unbind("portA"), Ev::Bind("portA", 300)]
        );
    }

    #[test]
    fn test_drain_in_key_order() {
        let mut queue = EventQueue::new();
        queue.add_to_sync(vec![Ev::Bind("portC", 1), Ev::Bind("portA", 2)]);

        let keys: Vec<_> = queue.drain().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["portA", "portC"]);
    }

    #[test]
    fn test_pending_count_across_keys() {
        let mut queue = EventQueue::new();
        queue.add_to_sync(vec![
            Ev::Bind("portA", 1),
            Ev::Unbind("portB"),
            Ev::Bind("portB", 2),
            Ev::Bind("portA", 3),
            Ev::Unbind("portB"),
        ]);

        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.drain(), vec![Ev::Bind("portA", 3), Ev::Unbind("portB")]);
        assert_eq!(queue.pending_count(), 0);
    }
}
