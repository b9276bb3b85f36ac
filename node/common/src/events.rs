use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use tracing::trace;
use crate::{types::Record, MarketError};

/// Event names published by the solver and the smart contract
pub mod event_names {
    /// Solver proposed a match
    pub const MATCH: &str = "match";

    /// Contract confirmed a match as a deal
    pub const DEAL: &str = "deal";

    /// Contract accepted a posted result
    pub const RESULT: &str = "result";
}

/// Named event carrying a record payload
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    data: Record,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Record) -> Self {
        Self { name: name.into(), data }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_data(&self) -> &Record {
        &self.data
    }
}

/// Callback registered with an event source
pub type EventHandler = Box<dyn FnMut(&Event) -> Result<(), MarketError>>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription(u64);

/// Anything participants can subscribe to
pub trait EventSource {
    fn subscribe_event(&self, handler: EventHandler) -> Subscription;

    /// Returns false if the subscription was not registered
    fn unsubscribe_event(&self, subscription: Subscription) -> bool;
}

/// Queued publish/subscribe channel.
///
/// `publish` only enqueues. Events are delivered by `dispatch_next` or
/// `dispatch_all`, one at a time, to every subscriber in subscription
/// order. A handler may publish further events while it runs; they are
/// delivered after the current event has reached every subscriber.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<BTreeMap<Subscription, Rc<RefCell<EventHandler>>>>,
    pending: RefCell<VecDeque<Event>>,
    next_subscription: Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        let subscription = Subscription(self.next_subscription.get());
        self.next_subscription.set(subscription.0 + 1);
        self.subscribers
            .borrow_mut()
            .insert(subscription, Rc::new(RefCell::new(handler)));
        subscription
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.subscribers.borrow_mut().remove(&subscription).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn publish(&self, event: Event) {
        trace!("Queued event {}", event.get_name());
        self.pending.borrow_mut().push_back(event);
    }

    /// Number of events not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Deliver the oldest pending event.
    ///
    /// Returns `Ok(false)` when nothing was pending. A failing handler stops
    /// delivery of that event to later subscribers; the event is not requeued.
    pub fn dispatch_next(&self) -> Result<bool, MarketError> {
        let event = match self.pending.borrow_mut().pop_front() {
            Some(event) => event,
            None => return Ok(false),
        };

        let handlers: Vec<_> = self.subscribers.borrow().values().cloned().collect();
        for handler in handlers {
            let mut handler = handler.borrow_mut();
            (*handler)(&event)?;
        }

        Ok(true)
    }

    /// Deliver until the queue is empty, including events published meanwhile
    pub fn dispatch_all(&self) -> Result<usize, MarketError> {
        let mut delivered = 0;
        while self.dispatch_next()? {
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl EventSource for EventBus {
    fn subscribe_event(&self, handler: EventHandler) -> Subscription {
        self.subscribe(handler)
    }

    fn unsubscribe_event(&self, subscription: Subscription) -> bool {
        self.unsubscribe(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> EventHandler {
        let log = log.clone();
        Box::new(move |event: &Event| -> Result<(), MarketError> {
            log.borrow_mut().push(format!("{}:{}", tag, event.get_name()));
            Ok(())
        })
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "a"));
        bus.subscribe(recorder(&log, "b"));

        bus.publish(Event::new("match", Record::new()));
        bus.publish(Event::new("deal", Record::new()));
        assert_eq!(bus.pending(), 2);
        assert!(log.borrow().is_empty());

        assert_eq!(bus.dispatch_all().unwrap(), 2);
        assert_eq!(*log.borrow(), vec!["a:match", "b:match", "a:deal", "b:deal"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = bus.subscribe(recorder(&log, "a"));
        bus.subscribe(recorder(&log, "b"));

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(Event::new("deal", Record::new()));
        bus.dispatch_all().unwrap();
        assert_eq!(*log.borrow(), vec!["b:deal"]);
    }

    #[test]
    fn test_events_published_by_handlers_are_queued() {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner = Rc::downgrade(&bus);
        bus.subscribe(Box::new(move |event: &Event| -> Result<(), MarketError> {
            if event.get_name() == "match" {
                if let Some(bus) = inner.upgrade() {
                    bus.publish(Event::new("deal", Record::new()));
                }
            }
            Ok(())
        }));
        bus.subscribe(recorder(&log, "b"));

        bus.publish(Event::new("match", Record::new()));
        assert!(bus.dispatch_next().unwrap());
        assert_eq!(*log.borrow(), vec!["b:match"]);
        assert_eq!(bus.pending(), 1);

        bus.dispatch_all().unwrap();
        assert_eq!(*log.borrow(), vec!["b:match", "b:deal"]);
    }

    #[test]
    fn test_handler_error_propagates() {
        let bus = EventBus::new();
        bus.subscribe(Box::new(|_: &Event| -> Result<(), MarketError> {
            Err(MarketError::MissingField("x".into()))
        }));
        bus.publish(Event::new("deal", Record::new()));

        assert!(bus.dispatch_all().is_err());
        assert_eq!(bus.pending(), 0);
        assert!(!bus.dispatch_next().unwrap());
    }
}
