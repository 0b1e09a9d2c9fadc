use crate::common::SubscriberRef;
use crate::database::EmbeddedDatabase;
use crate::errors::TempDbResult;
use crate::lifecycle::{LifecycleEvent, LifecycleEventBus, LifecycleEventListener};
use dashmap::DashMap;
use std::sync::Arc;

/// Releases the databases of a test once the test finishes.
///
/// Databases are tracked per test id. On [`LifecycleEvent::TestFinished`] every
/// database of that test is released. A failed release does not stop the
/// others; the first error is reported.
#[derive(Clone, Default)]
pub struct DatabaseReaper {
    inner: Arc<DashMap<String, Vec<EmbeddedDatabase>>>,
}

impl DatabaseReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the reaper to `event_bus`.
    pub fn attach(&self, event_bus: &LifecycleEventBus) -> TempDbResult<SubscriberRef> {
        event_bus.register(self.listener())
    }

    pub fn listener(&self) -> LifecycleEventListener {
        let reaper = self.clone();
        LifecycleEventListener::new(move |event| match event {
            LifecycleEvent::TestFinished { test_id } => reaper.release_test(&test_id).map(|_| ()),
            _ => Ok(()),
        })
    }

    pub fn track(&self, test_id: &str, database: &EmbeddedDatabase) {
        log::debug!("Tracking database {} for test {}", database.name(), test_id);
        self.inner
            .entry(test_id.to_string())
            .or_default()
            .push(database.clone());
    }

    /// Number of databases tracked for `test_id`.
    pub fn tracked(&self, test_id: &str) -> usize {
        self.inner.get(test_id).map(|dbs| dbs.len()).unwrap_or(0)
    }

    /// Releases every database of `test_id` and returns how many were tracked.
    pub fn release_test(&self, test_id: &str) -> TempDbResult<usize> {
        let databases = self
            .inner
            .remove(test_id)
            .map(|(_, databases)| databases)
            .unwrap_or_default();
        if !databases.is_empty() {
            log::info!("Releasing {} database(s) of test {}", databases.len(), test_id);
        }
        release_each(&databases)?;
        Ok(databases.len())
    }

    /// Releases every tracked database.
    pub fn release_all(&self) -> TempDbResult<usize> {
        let test_ids: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;
        let mut first_error = None;
        for test_id in test_ids {
            match self.release_test(&test_id) {
                Ok(count) => released += count,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }
}

fn release_each(databases: &[EmbeddedDatabase]) -> TempDbResult<()> {
    let mut first_error = None;
    for database in databases {
        if let Err(e) = database.release() {
            log::warn!("Failed to release database {}: {}", database.name(), e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Guard announcing a test on a [`LifecycleEventBus`].
///
/// Publishes `TestStarted` when created and `TestFinished` when finished or
/// dropped, whichever comes first.
pub struct TestScope {
    test_id: String,
    event_bus: LifecycleEventBus,
    finished: bool,
}

impl TestScope {
    pub fn begin(test_id: &str, event_bus: &LifecycleEventBus) -> TempDbResult<TestScope> {
        event_bus.publish(LifecycleEvent::test_started(test_id))?;
        Ok(TestScope {
            test_id: test_id.to_string(),
            event_bus: event_bus.clone(),
            finished: false,
        })
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Publishes `TestFinished`, reporting listener failures.
    pub fn finish(mut self) -> TempDbResult<()> {
        self.finished = true;
        self.event_bus
            .publish(LifecycleEvent::test_finished(&self.test_id))
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self
            .event_bus
            .publish(LifecycleEvent::test_finished(&self.test_id))
        {
            log::warn!("Failed to finish test {}: {}", self.test_id, e);
        }
    }
}
