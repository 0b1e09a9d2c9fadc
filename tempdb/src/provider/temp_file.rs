use crate::common::{database_name, DEFAULT_NAME_PREFIX, SQLITE_FILE_ENGINE};
use crate::database::EmbeddedDatabase;
use crate::engine::{file_uri, SqliteTarget};
use crate::errors::{TempDbError, TempDbResult};
use crate::lifecycle::LifecycleEventBus;
use crate::preparer::Preparer;
use crate::provider::{closed_provider, prepare_database, provisioning_failure, DatabaseProvider, Provider};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-process provider backed by SQLite database files.
///
/// Every database lives in its own temporary directory, created under the
/// system temp dir or a configured base directory. Release removes the
/// directory with everything SQLite wrote into it.
#[derive(Clone)]
pub struct TempFileProvider {
    inner: Arc<TempFileProviderInner>,
}

impl TempFileProvider {
    pub fn new() -> TempFileProvider {
        TempFileProvider::with_config().build()
    }

    pub fn with_config() -> TempFileProviderBuilder {
        TempFileProviderBuilder::new()
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.inner.base_dir.as_deref()
    }
}

impl Default for TempFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseProvider for TempFileProvider {
    fn engine(&self) -> &str {
        SQLITE_FILE_ENGINE
    }

    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        self.inner.provide_database(preparers)
    }

    fn close(&self) -> TempDbResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl From<TempFileProvider> for Provider {
    fn from(provider: TempFileProvider) -> Self {
        Provider::new(provider)
    }
}

struct TempFileProviderInner {
    name_prefix: String,
    base_dir: Option<PathBuf>,
    event_bus: Option<LifecycleEventBus>,
    closed: AtomicBool,
}

impl TempFileProviderInner {
    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_provider(SQLITE_FILE_ENGINE));
        }

        let name = database_name(&self.name_prefix);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&name);
        let dir = match &self.base_dir {
            Some(base_dir) => builder.tempdir_in(base_dir),
            None => builder.tempdir(),
        }
        .map_err(|e| provisioning_failure(&name, e.into()))?;

        let path = dir.path().join(format!("{}.db", name));
        let target = SqliteTarget::new(&file_uri(&path), SQLITE_FILE_ENGINE);
        // creates the file so that allocation problems surface here
        target
            .open()
            .map_err(|e| provisioning_failure(&name, e))?;
        log::info!("Created database file {}", path.display());

        let database = EmbeddedDatabase::builder(&name, Arc::new(target))
            .event_bus(self.event_bus.clone())
            .on_release(move || dir.close().map_err(TempDbError::from))
            .build();
        prepare_database(database, preparers)
    }
}

pub struct TempFileProviderBuilder {
    name_prefix: String,
    base_dir: Option<PathBuf>,
    event_bus: Option<LifecycleEventBus>,
}

impl TempFileProviderBuilder {
    pub fn new() -> TempFileProviderBuilder {
        TempFileProviderBuilder {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            base_dir: None,
            event_bus: None,
        }
    }

    pub fn name_prefix(mut self, name_prefix: &str) -> Self {
        self.name_prefix = name_prefix.to_string();
        self
    }

    /// Directory under which database directories are created.
    pub fn base_dir(mut self, base_dir: impl AsRef<Path>) -> Self {
        self.base_dir = Some(base_dir.as_ref().to_path_buf());
        self
    }

    pub fn event_bus(mut self, event_bus: LifecycleEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> TempFileProvider {
        TempFileProvider {
            inner: Arc::new(TempFileProviderInner {
                name_prefix: self.name_prefix,
                base_dir: self.base_dir,
                event_bus: self.event_bus,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for TempFileProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
