use crate::common::LIFECYCLE_EVENT;
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Publishes events to registered listeners.
///
/// Thin wrapper over a basu [`EventBus`] bound to a single event type name.
/// Publishing without listeners is a cheap no-op. Listener errors surface to
/// the publisher as [`ErrorKind::EventError`].
///
/// Events published by a listener while it is handling an event are queued
/// and delivered, in order, once the outer delivery has finished.
///
/// # Example
///
/// ```ignore
/// let event_bus: LifecycleEventBus = TempDbEventBus::new();
/// let subscriber = event_bus.register(LifecycleEventListener::new(|event| {
///     println!("{:?}", event);
///     Ok(())
/// }))?;
///
/// event_bus.publish(LifecycleEvent::TestStarted { test_id: "t1".into() })?;
/// event_bus.deregister(subscriber)?;
/// ```
pub struct TempDbEventBus<E, L> {
    inner: Arc<TempDbEventBusInner<E, L>>,
}

impl<E, L> Clone for TempDbEventBus<E, L> {
    fn clone(&self) -> Self {
        TempDbEventBus {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, L> Default for TempDbEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> TempDbEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    /// Creates a new event bus instance.
    pub fn new() -> Self {
        TempDbEventBus {
            inner: Arc::new(TempDbEventBusInner::new()),
        }
    }

    /// Registers an event listener with the bus.
    pub fn register(&self, listener: L) -> TempDbResult<SubscriberRef> {
        self.inner.register(listener)
    }

    /// Deregisters a previously registered event listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> TempDbResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Publishes an event to all registered listeners.
    pub fn publish(&self, event: E) -> TempDbResult<()> {
        self.inner.publish(event)
    }

    /// Closes the event bus and clears all registered listeners.
    pub fn close(&self) -> TempDbResult<()> {
        self.inner.close()
    }

    /// Returns true if there are any registered listeners.
    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }

    /// Returns true if both handles point to the same bus.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Handle returned by [`TempDbEventBus::register`], used to deregister.
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct TempDbEventBusInner<E, L> {
    event_bus: EventBus<E>,
    // events published from inside a handler, per dispatching thread
    deferred: Mutex<HashMap<ThreadId, VecDeque<E>>>,
    phantom_data: PhantomData<L>,
}

impl<E, L> TempDbEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        TempDbEventBusInner {
            event_bus: EventBus::new(),
            deferred: Mutex::new(HashMap::new()),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> TempDbResult<SubscriberRef> {
        self.event_bus
            .subscribe(LIFECYCLE_EVENT, Box::new(listener))
            .map(SubscriberRef::new)
            .map_err(Self::event_error)
    }

    #[inline]
    fn deregister(&self, subscriber: SubscriberRef) -> TempDbResult<()> {
        self.event_bus
            .unsubscribe(LIFECYCLE_EVENT, &subscriber.inner)
            .map(|_| ())
            .map_err(Self::event_error)
    }

    fn publish(&self, event: E) -> TempDbResult<()> {
        let thread_id = thread::current().id();
        {
            let mut deferred = self.deferred.lock();
            if let Some(queue) = deferred.get_mut(&thread_id) {
                queue.push_back(event);
                return Ok(());
            }
            deferred.insert(thread_id, VecDeque::new());
        }
        let _dispatching = DispatchGuard {
            deferred: &self.deferred,
            thread_id,
        };

        let mut result = self.deliver(event);
        loop {
            let next = self
                .deferred
                .lock()
                .get_mut(&thread_id)
                .and_then(|queue| queue.pop_front());
            match next {
                Some(event) => {
                    if let Err(e) = self.deliver(event) {
                        if result.is_ok() {
                            result = Err(e);
                        } else {
                            log::warn!("Dropping additional event bus error: {}", e);
                        }
                    }
                }
                None => return result,
            }
        }
    }

    fn deliver(&self, event: E) -> TempDbResult<()> {
        // Fast path: nothing to deliver without listeners
        let handler_count = match self.event_bus.get_handler_count(LIFECYCLE_EVENT) {
            Ok(count) => count,
            Err(BasuError::EventTypeNotFOUND) => return Ok(()),
            Err(e) => return Err(Self::event_error(e)),
        };
        if handler_count == 0 {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(LIFECYCLE_EVENT, &basu_event)
            .map(|_| ())
            .map_err(Self::event_error)
    }

    #[inline]
    fn close(&self) -> TempDbResult<()> {
        self.event_bus.clear().map(|_| ()).map_err(Self::event_error)
    }

    #[inline]
    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(LIFECYCLE_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn event_error(e: BasuError) -> TempDbError {
        match e {
            BasuError::EventTypeNotFOUND => TempDbError::new(
                "Event bus error: no handler registered for lifecycle events",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => TempDbError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => TempDbError::new(
                &format!("Event handler error: {}", e),
                ErrorKind::EventError,
            ),
        }
    }
}

/// Ends a thread's dispatch, also when a listener panics.
struct DispatchGuard<'a, E> {
    deferred: &'a Mutex<HashMap<ThreadId, VecDeque<E>>>,
    thread_id: ThreadId,
}

impl<E> Drop for DispatchGuard<'_, E> {
    fn drop(&mut self) {
        self.deferred.lock().remove(&self.thread_id);
    }
}
