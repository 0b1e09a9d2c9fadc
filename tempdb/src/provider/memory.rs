use crate::common::{database_name, DEFAULT_NAME_PREFIX, SQLITE_MEMORY_ENGINE};
use crate::database::EmbeddedDatabase;
use crate::engine::SqliteTarget;
use crate::errors::{TempDbError, TempDbResult};
use crate::lifecycle::LifecycleEventBus;
use crate::preparer::Preparer;
use crate::provider::{closed_provider, prepare_database, provisioning_failure, DatabaseProvider, Provider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-process provider backed by SQLite shared-cache in-memory databases.
///
/// Each database is named `<prefix>_<uuid>` and addressed as
/// `file:<name>?mode=memory&cache=shared`, so every session opened through the
/// database's connection string sees the same data. An anchor connection keeps
/// the database alive until release; closing it frees the memory.
#[derive(Clone)]
pub struct InMemoryProvider {
    inner: Arc<InMemoryProviderInner>,
}

impl InMemoryProvider {
    pub fn new() -> InMemoryProvider {
        InMemoryProvider::with_config().build()
    }

    pub fn with_config() -> InMemoryProviderBuilder {
        InMemoryProviderBuilder::new()
    }

    pub fn name_prefix(&self) -> &str {
        &self.inner.name_prefix
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseProvider for InMemoryProvider {
    fn engine(&self) -> &str {
        SQLITE_MEMORY_ENGINE
    }

    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        self.inner.provide_database(preparers)
    }

    fn close(&self) -> TempDbResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl From<InMemoryProvider> for Provider {
    fn from(provider: InMemoryProvider) -> Self {
        Provider::new(provider)
    }
}

struct InMemoryProviderInner {
    name_prefix: String,
    event_bus: Option<LifecycleEventBus>,
    closed: AtomicBool,
}

impl InMemoryProviderInner {
    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_provider(SQLITE_MEMORY_ENGINE));
        }

        let name = database_name(&self.name_prefix);
        let url = format!("file:{}?mode=memory&cache=shared", name);
        let target = SqliteTarget::new(&url, SQLITE_MEMORY_ENGINE);
        let anchor = target
            .open()
            .map_err(|e| provisioning_failure(&name, e))?;
        log::info!("Created in-memory database {}", name);

        let database = EmbeddedDatabase::builder(&name, Arc::new(target))
            .event_bus(self.event_bus.clone())
            .on_release(move || {
                anchor
                    .close()
                    .map_err(|(_, e)| TempDbError::from(e))
            })
            .build();
        prepare_database(database, preparers)
    }
}

pub struct InMemoryProviderBuilder {
    name_prefix: String,
    event_bus: Option<LifecycleEventBus>,
}

impl InMemoryProviderBuilder {
    pub fn new() -> InMemoryProviderBuilder {
        InMemoryProviderBuilder {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            event_bus: None,
        }
    }

    /// Prefix of generated database names.
    pub fn name_prefix(mut self, name_prefix: &str) -> Self {
        self.name_prefix = name_prefix.to_string();
        self
    }

    /// Bus receiving provisioned and released events of every database.
    pub fn event_bus(mut self, event_bus: LifecycleEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> InMemoryProvider {
        InMemoryProvider {
            inner: Arc::new(InMemoryProviderInner {
                name_prefix: self.name_prefix,
                event_bus: self.event_bus,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for InMemoryProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
