use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::session::EmulationStatus;

/// Notifications raised by the emulation thread.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The emulation thread is up and a ROM has been handed to the engine.
    Started,
    AfterReset,
    RomChanged,
    /// First frame executed after a run request.
    EmulationStarted,
    Paused,
    Resumed,
    /// Paused by a step or an engine breakpoint.
    Break,
    StatusChanged(EmulationStatus),
    BorderChanged,
    /// Emulation hit an unrecoverable error and is shutting down.
    Failed(Arc<Error>),
    /// The emulation thread finished its teardown.
    Stopped,
}

/// Opaque handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<T>)>,
}

/// Observer list whose handlers always run on the dispatcher's context.
pub struct EventHub<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<T: Send + Sync + 'static> EventHub<T> {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                handlers: Vec::new(),
            })),
            dispatcher,
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns whether `id` was still subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.handlers.len();
        subs.handlers.retain(|(sub, _)| *sub != id);
        subs.handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    /// Post `event` to every current subscriber.
    ///
    /// Handlers are captured at emit time: one that unsubscribes before the
    /// job runs still sees this event.
    pub fn emit(&self, event: T) {
        let handlers: Vec<Handler<T>> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        if handlers.is_empty() {
            return;
        }
        self.dispatcher.dispatch(Box::new(move || {
            for handler in &handlers {
                handler(&event);
            }
        }));
    }
}
