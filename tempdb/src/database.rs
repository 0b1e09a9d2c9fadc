use crate::engine::{ConnectionTarget, Session};
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::lifecycle::{LifecycleEvent, LifecycleEventBus};
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Teardown of the resources allocated for one database.
pub type ReleaseCallback = Box<dyn FnOnce() -> TempDbResult<()> + Send>;

/// Lifecycle state of an [`EmbeddedDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    /// Allocated, preparers still running.
    Created,
    /// Prepared and handed to the consumer.
    InUse,
    /// Released; connections can no longer be opened.
    Released,
}

/// A provisioned throwaway database.
///
/// The handle exposes the connection string and opens sessions. Its release
/// callback runs at most once: the first call to [`release`](Self::release)
/// runs it, concurrent callers wait for it to finish, later calls are no-ops.
/// Dropping the last clone of an unreleased database releases it.
///
/// After release the connection string still reports its last value for
/// diagnostics, while [`connect`](Self::connect) fails with
/// [`ErrorKind::DatabaseReleased`].
///
/// # Examples
///
/// ```rust,ignore
/// let database = provider.provide_database(&[descriptor.migrate().into()])?;
/// let mut session = database.connect()?;
/// session.execute_script("INSERT INTO orders (id) VALUES (1)")?;
/// database.release()?;
/// ```
#[derive(Clone)]
pub struct EmbeddedDatabase {
    inner: Arc<EmbeddedDatabaseInner>,
}

impl EmbeddedDatabase {
    pub fn builder(name: &str, target: Arc<dyn ConnectionTarget>) -> EmbeddedDatabaseBuilder {
        EmbeddedDatabaseBuilder {
            name: name.to_string(),
            target,
            host: None,
            port: 0,
            release: None,
            event_bus: None,
        }
    }

    /// Generated name of the database.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn engine(&self) -> &str {
        self.inner.target.inner.engine()
    }

    /// Connection string, stable from creation until after release.
    pub fn url(&self) -> &str {
        self.inner.target.inner.url()
    }

    /// Host of a server-backed database.
    pub fn host(&self) -> Option<&str> {
        self.inner.host.as_deref()
    }

    /// Bound port of a server-backed database, 0 for in-process databases.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn state(&self) -> DatabaseState {
        if self.inner.released.load(Ordering::SeqCst) {
            DatabaseState::Released
        } else if self.inner.in_use.load(Ordering::SeqCst) {
            DatabaseState::InUse
        } else {
            DatabaseState::Created
        }
    }

    pub fn is_released(&self) -> bool {
        self.state() == DatabaseState::Released
    }

    /// Opens a new session on the database.
    pub fn connect(&self) -> TempDbResult<Box<dyn Session>> {
        self.inner.target.connect()
    }

    /// Connection target that refuses to connect once the database is released.
    pub fn target(&self) -> Arc<dyn ConnectionTarget> {
        self.inner.target.clone()
    }

    /// Releases the database. Safe to call repeatedly and concurrently.
    pub fn release(&self) -> TempDbResult<()> {
        self.inner.release()
    }

    /// Returns true if both handles refer to the same database.
    pub fn ptr_eq(&self, other: &EmbeddedDatabase) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_in_use(&self) {
        if self.inner.in_use.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.publish(LifecycleEvent::DatabaseProvisioned {
            database_name: self.name().to_string(),
            engine: self.engine().to_string(),
            url: self.url().to_string(),
        });
    }
}

impl Debug for EmbeddedDatabase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDatabase")
            .field("name", &self.name())
            .field("engine", &self.engine())
            .field("url", &self.url())
            .field("port", &self.port())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder used by providers to assemble an [`EmbeddedDatabase`].
pub struct EmbeddedDatabaseBuilder {
    name: String,
    target: Arc<dyn ConnectionTarget>,
    host: Option<String>,
    port: u16,
    release: Option<ReleaseCallback>,
    event_bus: Option<LifecycleEventBus>,
}

impl EmbeddedDatabaseBuilder {
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Teardown to run on release.
    pub fn on_release(mut self, release: impl FnOnce() -> TempDbResult<()> + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Bus receiving provisioned and released events.
    pub fn event_bus(mut self, event_bus: Option<LifecycleEventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn build(self) -> EmbeddedDatabase {
        let released = Arc::new(AtomicBool::new(false));
        let release: ReleaseCallback = self.release.unwrap_or_else(|| Box::new(|| Ok(())));
        EmbeddedDatabase {
            inner: Arc::new(EmbeddedDatabaseInner {
                target: Arc::new(GuardedTarget {
                    name: self.name.clone(),
                    inner: self.target,
                    released: Arc::clone(&released),
                }),
                name: self.name,
                host: self.host,
                port: self.port,
                released,
                in_use: AtomicBool::new(false),
                release: Mutex::new(Some(release)),
                event_bus: self.event_bus,
            }),
        }
    }
}

struct EmbeddedDatabaseInner {
    name: String,
    host: Option<String>,
    port: u16,
    target: Arc<GuardedTarget>,
    released: Arc<AtomicBool>,
    in_use: AtomicBool,
    release: Mutex<Option<ReleaseCallback>>,
    event_bus: Option<LifecycleEventBus>,
}

impl EmbeddedDatabaseInner {
    fn release(&self) -> TempDbResult<()> {
        let result = {
            // held while the callback runs so concurrent callers wait for teardown
            let mut slot = self.release.lock();
            let callback = match slot.take() {
                Some(callback) => callback,
                None => return Ok(()),
            };

            self.released.store(true, Ordering::SeqCst);
            log::info!("Releasing database {}", self.name);
            let result = callback();
            if let Err(e) = &result {
                log::error!("Failed to release database {}: {}", self.name, e);
            }
            result
        };

        // listeners may touch this database again
        self.publish(LifecycleEvent::DatabaseReleased {
            database_name: self.name.clone(),
        });
        result
    }

    fn publish(&self, event: LifecycleEvent) {
        if let Some(event_bus) = &self.event_bus {
            if let Err(e) = event_bus.publish(event) {
                log::warn!("Failed to publish lifecycle event for {}: {}", self.name, e);
            }
        }
    }
}

impl Drop for EmbeddedDatabaseInner {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Error while releasing dropped database {}: {}", self.name, e);
        }
    }
}

struct GuardedTarget {
    name: String,
    inner: Arc<dyn ConnectionTarget>,
    released: Arc<AtomicBool>,
}

impl ConnectionTarget for GuardedTarget {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn engine(&self) -> &str {
        self.inner.engine()
    }

    fn connect(&self) -> TempDbResult<Box<dyn Session>> {
        if self.released.load(Ordering::SeqCst) {
            log::error!("Connection requested for released database {}", self.name);
            return Err(TempDbError::new(
                &format!("Database {} has been released", self.name),
                ErrorKind::DatabaseReleased,
            ));
        }
        self.inner.connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::database_name;
    use crate::engine::SqliteTarget;
    use crate::lifecycle::LifecycleEventListener;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn database(counter: Arc<AtomicUsize>) -> EmbeddedDatabase {
        let url = format!("file:{}?mode=memory&cache=shared", database_name("db"));
        let target = SqliteTarget::new(&url, "sqlite-memory");
        let anchor = target.open().unwrap();
        EmbeddedDatabase::builder("orders", Arc::new(target))
            .on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(anchor);
                Ok(())
            })
            .build()
    }

    #[test]
    fn release_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let db = database(Arc::clone(&counter));
        db.release().unwrap();
        db.release().unwrap();
        db.clone().release().unwrap();
        drop(db);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_release_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let db = database(Arc::clone(&counter));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    db.release()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(db.is_released());
    }

    #[test]
    fn drop_of_last_handle_releases() {
        let counter = Arc::new(AtomicUsize::new(0));
        let db = database(Arc::clone(&counter));
        let other = db.clone();
        drop(db);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn url_survives_release_but_connect_fails() {
        let db = database(Arc::new(AtomicUsize::new(0)));
        let url = db.url().to_string();
        assert!(db.connect().is_ok());

        db.release().unwrap();
        assert_eq!(db.url(), url);
        assert_eq!(db.state(), DatabaseState::Released);

        let err = db.connect().err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::DatabaseReleased);
        let err = db.target().connect().err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::DatabaseReleased);
    }

    #[test]
    fn release_without_resources_succeeds() {
        let target = SqliteTarget::new("file:never_opened?mode=memory&cache=shared", "sqlite-memory");
        let db = EmbeddedDatabase::builder("empty", Arc::new(target)).build();
        assert!(db.release().is_ok());
        assert!(db.release().is_ok());
    }

    #[test]
    fn release_error_is_reported_once() {
        let target = SqliteTarget::new("file:failing?mode=memory&cache=shared", "sqlite-memory");
        let db = EmbeddedDatabase::builder("failing", Arc::new(target))
            .on_release(|| Err(TempDbError::new("teardown failed", ErrorKind::ProvisioningFailure)))
            .build();
        assert_eq!(db.release().unwrap_err().message(), "teardown failed");
        assert!(db.release().is_ok());
    }

    #[test]
    fn state_transitions_and_events() {
        let bus = LifecycleEventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.register(LifecycleEventListener::new(move |event| {
            sink.lock().push(event);
            Ok(())
        }))
        .unwrap();

        let target = SqliteTarget::new("file:events?mode=memory&cache=shared", "sqlite-memory");
        let db = EmbeddedDatabase::builder("events", Arc::new(target))
            .port(0)
            .event_bus(Some(bus))
            .build();
        assert_eq!(db.state(), DatabaseState::Created);

        db.mark_in_use();
        db.mark_in_use();
        assert_eq!(db.state(), DatabaseState::InUse);

        db.release().unwrap();
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LifecycleEvent::DatabaseProvisioned { .. }));
        assert_eq!(
            events[1],
            LifecycleEvent::DatabaseReleased {
                database_name: "events".to_string()
            }
        );
    }

    #[test]
    fn released_listener_may_release_again() {
        let bus = LifecycleEventBus::new();
        let slot: Arc<Mutex<Option<EmbeddedDatabase>>> = Arc::new(Mutex::new(None));
        let listener_slot = Arc::clone(&slot);
        let repeats = Arc::new(AtomicUsize::new(0));
        let listener_repeats = Arc::clone(&repeats);
        bus.register(LifecycleEventListener::new(move |event| {
            if let LifecycleEvent::DatabaseReleased { .. } = event {
                let database = listener_slot.lock().take();
                if let Some(database) = database {
                    database.release()?;
                    listener_repeats.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        }))
        .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let released = Arc::clone(&counter);
        let target = SqliteTarget::new("file:relisten?mode=memory&cache=shared", "sqlite-memory");
        let db = EmbeddedDatabase::builder("relisten", Arc::new(target))
            .event_bus(Some(bus))
            .on_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();
        *slot.lock() = Some(db.clone());

        db.release().unwrap();
        assert_eq!(repeats.load(Ordering::SeqCst), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
