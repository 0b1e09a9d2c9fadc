use crate::common::{async_task, AsyncResult};
use crate::database::EmbeddedDatabase;
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::preparer::{CacheKey, Preparer};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Creates isolated databases for one backing engine.
///
/// Every call allocates a new database, runs the preparers strictly in order
/// and returns a database whose release tears down exactly what this call
/// allocated. If a preparer fails, the partially prepared database is released
/// before the preparer's error is returned. Nothing is retried.
pub trait DatabaseProvider: Send + Sync {
    /// Engine name, e.g. `sqlite-memory` or `postgres`.
    fn engine(&self) -> &str;

    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase>;

    /// Frees provider-wide resources such as a database server.
    fn close(&self) -> TempDbResult<()> {
        Ok(())
    }
}

/// Shareable handle to a [`DatabaseProvider`].
#[derive(Clone)]
pub struct Provider {
    inner: Arc<dyn DatabaseProvider>,
}

impl Provider {
    pub fn new<T: DatabaseProvider + 'static>(inner: T) -> Self {
        Provider {
            inner: Arc::new(inner),
        }
    }

    /// Returns true if both handles refer to the same provider instance.
    pub fn ptr_eq(&self, other: &Provider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Provisions on a background thread.
    ///
    /// The returned result completes with the prepared database or with the
    /// error [`provide_database`](DatabaseProvider::provide_database) returned.
    pub fn provide_database_async(&self, preparers: Vec<Preparer>) -> AsyncResult<EmbeddedDatabase> {
        let result = AsyncResult::new();
        let writer = result.clone();
        let provider = self.clone();
        async_task(move || {
            let outcome = provider.provide_database(&preparers);
            if !writer.offer(outcome) {
                log::warn!("Provisioning result was completed by someone else, discarding database");
            }
        });
        result
    }
}

impl Deref for Provider {
    type Target = Arc<dyn DatabaseProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Provider({})", self.inner.engine())
    }
}

/// Runs `preparers` in order against a freshly allocated database.
///
/// Providers call this once they have allocated `database`. On the first
/// failing preparer the database is released and the preparer's error is
/// returned unchanged; a failing release is only logged.
pub fn prepare_database(
    database: EmbeddedDatabase,
    preparers: &[Preparer],
) -> TempDbResult<EmbeddedDatabase> {
    let cache_key = CacheKey::of(preparers);
    log::debug!(
        "Preparing database {} with {} preparer(s), cache key {}",
        database.name(),
        cache_key.len(),
        cache_key.fingerprint()
    );

    let target = database.target();
    for (index, preparer) in preparers.iter().enumerate() {
        log::debug!("Preparer {} of {}: {}", index + 1, preparers.len(), preparer.key());
        if let Err(e) = preparer.prepare(target.as_ref()) {
            log::error!(
                "Preparer {} failed on database {}: {}",
                preparer.key(),
                database.name(),
                e
            );
            if let Err(release_error) = database.release() {
                log::warn!(
                    "Failed to release database {} after preparer failure: {}",
                    database.name(),
                    release_error
                );
            }
            return Err(e);
        }
    }

    database.mark_in_use();
    log::info!("Database {} ready at {}", database.name(), database.url());
    Ok(database)
}

/// Wraps an allocation error of `database_name` into a provisioning failure.
pub fn provisioning_failure(database_name: &str, cause: TempDbError) -> TempDbError {
    log::error!("Failed to provision database {}: {}", database_name, cause);
    TempDbError::new_with_cause(
        &format!("Failed to provision database {}: {}", database_name, cause.message()),
        ErrorKind::ProvisioningFailure,
        cause,
    )
}

pub(crate) fn closed_provider(engine: &str) -> TempDbError {
    log::error!("Provider {} is closed", engine);
    TempDbError::new(
        &format!("Provider {} is closed", engine),
        ErrorKind::ProvisioningFailure,
    )
}
