//! Listeners for frames that are not replies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nfdbg_frame::{command_name, Frame};
use tracing::trace;

use crate::lock;

/// Identifies a registered notification listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub(crate) type Predicate = dyn Fn(&Frame) -> bool + Send + Sync;
pub(crate) type Handler = dyn Fn(&Frame) + Send + Sync;

struct Subscription {
    id: SubscriptionId,
    predicate: Box<Predicate>,
    handler: Box<Handler>,
}

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<Arc<Subscription>>>,
}

impl Subscribers {
    pub(crate) fn add(&self, predicate: Box<Predicate>, handler: Box<Handler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push(Arc::new(Subscription {
            id,
            predicate,
            handler,
        }));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|s| s.id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        lock(&self.entries).clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Deliver `frame` to every matching listener, in registration order.
    ///
    /// Runs on a snapshot so handlers may subscribe or unsubscribe.
    pub(crate) fn dispatch(&self, frame: &Frame) -> usize {
        let snapshot: Vec<Arc<Subscription>> = lock(&self.entries).clone();
        let mut delivered = 0;
        for subscription in snapshot {
            if (subscription.predicate)(frame) {
                (subscription.handler)(frame);
                delivered += 1;
            }
        }
        if delivered == 0 {
            trace!(
                command = command_name(frame.command),
                sequence = frame.sequence,
                "no listener for frame"
            );
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn predicate_filters_delivery() {
        let subs = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        subs.add(
            Box::new(|f| f.command == 1),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(subs.dispatch(&Frame::new(1, 0, &b""[..])), 1);
        assert_eq!(subs.dispatch(&Frame::new(2, 0, &b""[..])), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_stops_delivery() {
        let subs = Subscribers::default();
        let id = subs.add(Box::new(|_| true), Box::new(|_| {}));
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        assert_eq!(subs.dispatch(&Frame::new(1, 0, &b""[..])), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let subs = Arc::new(Subscribers::default());
        let slot = Arc::new(Mutex::new(None));
        let (subs2, slot2) = (Arc::clone(&subs), Arc::clone(&slot));
        let id = subs.add(
            Box::new(|_| true),
            Box::new(move |_| {
                if let Some(id) = slot2.lock().unwrap().take() {
                    subs2.remove(id);
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        assert_eq!(subs.dispatch(&Frame::new(1, 0, &b""[..])), 1);
        assert_eq!(subs.len(), 0);
    }
}
