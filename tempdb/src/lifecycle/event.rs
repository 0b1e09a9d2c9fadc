use crate::common::TempDbEventBus;
use crate::errors::TempDbResult;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::Debug;
use std::sync::Arc;

/// Lifecycle notifications exchanged between the host test framework,
/// providers and the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A test began.
    TestStarted { test_id: String },
    /// A test completed; its databases may be reclaimed.
    TestFinished { test_id: String },
    /// A provider handed out a prepared database.
    DatabaseProvisioned {
        database_name: String,
        engine: String,
        url: String,
    },
    /// A database was released.
    DatabaseReleased { database_name: String },
}

impl LifecycleEvent {
    pub fn test_started(test_id: &str) -> Self {
        LifecycleEvent::TestStarted {
            test_id: test_id.to_string(),
        }
    }

    pub fn test_finished(test_id: &str) -> Self {
        LifecycleEvent::TestFinished {
            test_id: test_id.to_string(),
        }
    }
}

/// Callback invoked for every lifecycle event.
pub trait LifecycleEventCallback: Send + Sync + Fn(LifecycleEvent) -> TempDbResult<()> {}

impl<F> LifecycleEventCallback for F where F: Send + Sync + Fn(LifecycleEvent) -> TempDbResult<()> {}

/// Listener wrapping a closure, registered with a [`LifecycleEventBus`].
///
/// # Examples
///
/// ```ignore
/// let bus = LifecycleEventBus::new();
/// bus.register(LifecycleEventListener::new(|event| {
///     log::info!("{:?}", event);
///     Ok(())
/// }))?;
/// ```
#[derive(Clone)]
pub struct LifecycleEventListener {
    on_event: Arc<dyn LifecycleEventCallback>,
}

impl LifecycleEventListener {
    pub fn new(on_event: impl LifecycleEventCallback + 'static) -> Self {
        LifecycleEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<LifecycleEvent> for LifecycleEventListener {
    fn handle(&self, event: &Event<LifecycleEvent>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for LifecycleEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEventListener").finish()
    }
}

/// Event bus carrying [`LifecycleEvent`]s.
pub type LifecycleEventBus = TempDbEventBus<LifecycleEvent, LifecycleEventListener>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, TempDbError};
    use parking_lot::Mutex;

    #[test]
    fn listener_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = LifecycleEventListener::new(move |event| {
            sink.lock().push(event);
            Ok(())
        });

        let event = Event::new(LifecycleEvent::test_started("t1"));
        assert!(listener.handle(&event).is_ok());
        assert_eq!(*seen.lock(), vec![LifecycleEvent::test_started("t1")]);
    }

    #[test]
    fn listener_failure_becomes_handler_error() {
        let listener = LifecycleEventListener::new(|_| {
            Err(TempDbError::new("listener failed", ErrorKind::InternalError))
        });
        let event = Event::new(LifecycleEvent::test_finished("t1"));
        match listener.handle(&event) {
            Err(BasuError::HandlerError(e)) => assert!(e.to_string().contains("listener failed")),
            other => panic!("unexpected result {:?}", other.is_ok()),
        }
    }

    #[test]
    fn bus_delivers_to_every_listener() {
        let bus = LifecycleEventBus::new();
        let seen = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            bus.register(LifecycleEventListener::new(move |_| {
                *seen.lock() += 1;
                Ok(())
            }))
            .unwrap();
        }
        bus.publish(LifecycleEvent::test_started("t1")).unwrap();
        assert_eq!(*seen.lock(), 3);
    }
}
