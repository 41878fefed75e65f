use crate::domain::events::NamedEvent;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<E> {
    id: SubscriptionId,
    /// Event name to match; `None` receives everything
    filter: Option<String>,
    handler: Box<dyn FnMut(&E)>,
}

/// Synchronous observer list owned by a component
///
/// Handlers run on the tick that emitted the event, in subscription order.
pub struct EventBus<E> {
    next_id: u64,
    subscribers: Vec<Subscriber<E>>,
}

impl<E: NamedEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to one named event
    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + 'static,
    {
        self.add(Some(name.into()), Box::new(handler))
    }

    /// Subscribe to every event
    pub fn subscribe_all<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + 'static,
    {
        self.add(None, Box::new(handler))
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        let name = event.name();
        for subscriber in self.subscribers.iter_mut() {
            let matches = subscriber
                .filter
                .as_deref()
                .map_or(true, |filter| filter == name.as_ref());
            if matches {
                (subscriber.handler)(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn add(&mut self, filter: Option<String>, handler: Box<dyn FnMut(&E)>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push(Subscriber { id, filter, handler });
        id
    }
}

impl<E: NamedEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
