//! In-process change-event bus (spec §4.10 "ChangeEventBus").

use crate::graph::{Concept, Relation};

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    ConceptInterned(Concept),
    ConceptRemoved(String),
    RelationLinked(Relation),
    RelationUnlinked(i64),
}

impl ChangeEvent {
    fn kind(&self) -> Option<&str> {
        match self {
            ChangeEvent::ConceptInterned(c) => Some(&c.kind),
            ChangeEvent::RelationLinked(r) => Some(&r.kind),
            ChangeEvent::ConceptRemoved(_) | ChangeEvent::RelationUnlinked(_) => None,
        }
    }
}

pub type Handler = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionToken(u64);

enum Subscription {
    Kind(String, Handler),
    All(Handler),
}

/// Delivery is synchronous on the publisher thread, in subscriber
/// insertion order; handlers see a snapshot of the subscriber list taken
/// before delivery begins, so they may freely subscribe/unsubscribe
/// without corrupting the in-flight publish.
#[derive(Default)]
pub struct ChangeEventBus {
    subscriptions: Vec<(SubscriptionToken, Subscription)>,
    next_token: u64,
}

impl ChangeEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: impl Into<String>, handler: Handler) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.subscriptions.push((token, Subscription::Kind(kind.into(), handler)));
        token
    }

    pub fn subscribe_all(&mut self, handler: Handler) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.subscriptions.push((token, Subscription::All(handler)));
        token
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.subscriptions.retain(|(t, _)| *t != token);
    }

    pub fn publish(&self, event: ChangeEvent) {
        let event_kind = event.kind();
        for (_, sub) in &self.subscriptions {
            match sub {
                Subscription::Kind(kind, handler) => {
                    if Some(kind.as_str()) == event_kind {
                        handler(&event);
                    }
                }
                Subscription::All(handler) => handler(&event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_concept(kind: &str) -> Concept {
        Concept {
            id: "n".to_string(),
            key: "n".to_string(),
            kind: kind.to_string(),
            data: serde_json::Value::Null,
            tokens: 1,
            alias: None,
            cvn: None,
            lvn: None,
            sync_status: None,
        }
    }

    #[test]
    fn kind_scoped_subscriber_only_sees_matching_kind() {
        let mut bus = ChangeEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.subscribe("note", Box::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("note")));
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("other")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_subscriber_sees_every_kind() {
        let mut bus = ChangeEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.subscribe_all(Box::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("note")));
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("other")));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = ChangeEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let token = bus.subscribe_all(Box::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.unsubscribe(token);
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("note")));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn insertion_order_is_preserved_for_delivery() {
        let mut bus = ChangeEventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe_all(Box::new(move |_| order.lock().unwrap().push(i)));
        }
        bus.publish(ChangeEvent::ConceptInterned(sample_concept("note")));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
