use crate::config::{PostgresConfig, PostgresProviderBuilder};
use crate::server::{Server, ServerInfo};
use crate::session::{backend_error, PostgresTarget, POSTGRES_ENGINE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempdb::common::{database_name, quote_identifier};
use tempdb::config::ProviderFactories;
use tempdb::database::EmbeddedDatabase;
use tempdb::errors::{ErrorKind, TempDbError, TempDbResult};
use tempdb::preparer::Preparer;
use tempdb::provider::{prepare_database, provisioning_failure, DatabaseProvider, Provider};

/// Server-backed provider: one PostgreSQL server, one database per request.
///
/// The server is either an external one (see
/// [`PostgresProviderBuilder::url`]) or a `postgres` container started on the
/// first request and stopped by [`close`](DatabaseProvider::close). Every call
/// to `provide_database` creates a fresh database; releasing it terminates
/// its connections and drops it.
///
/// # Examples
///
/// ```rust,ignore
/// let provider = PostgresProvider::with_config().from_env().build()?;
/// let database = provider.provide_database(&[descriptor.migrate().into()])?;
/// println!("{}:{} {}", database.host().unwrap_or(""), database.port(), database.url());
/// database.release()?;
/// provider.close()?;
/// ```
#[derive(Clone)]
pub struct PostgresProvider {
    inner: Arc<PostgresProviderInner>,
}

impl PostgresProvider {
    pub fn with_config() -> PostgresProviderBuilder {
        PostgresProviderBuilder::new()
    }

    pub(crate) fn new(config: PostgresConfig) -> Self {
        PostgresProvider {
            inner: Arc::new(PostgresProviderInner {
                config,
                server: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.inner.config
    }

    /// Returns true once the server has been started or connected to.
    pub fn is_started(&self) -> bool {
        self.inner.server.lock().is_some()
    }
}

impl DatabaseProvider for PostgresProvider {
    fn engine(&self) -> &str {
        POSTGRES_ENGINE
    }

    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        self.inner.provide_database(preparers)
    }

    fn close(&self) -> TempDbResult<()> {
        self.inner.close()
    }
}

impl From<PostgresProvider> for Provider {
    fn from(provider: PostgresProvider) -> Self {
        Provider::new(provider)
    }
}

struct PostgresProviderInner {
    config: PostgresConfig,
    server: Mutex<Option<Server>>,
    closed: AtomicBool,
}

impl PostgresProviderInner {
    fn provide_database(&self, preparers: &[Preparer]) -> TempDbResult<EmbeddedDatabase> {
        let name = database_name(&self.config.name_prefix);
        let server = self
            .server_info()
            .map_err(|e| provisioning_failure(&name, e))?;

        create_database(&server, &name).map_err(|e| provisioning_failure(&name, e))?;
        log::info!(
            "Created PostgreSQL database {} on {}:{}",
            name,
            server.host(),
            server.port()
        );

        let target = PostgresTarget::new(&server.url(&name));
        let release_name = name.clone();
        let release_server = server.clone();
        let database = EmbeddedDatabase::builder(&name, Arc::new(target))
            .host(server.host())
            .port(server.port())
            .event_bus(self.config.event_bus.clone())
            .on_release(move || drop_database(&release_server, &release_name))
            .build();
        prepare_database(database, preparers)
    }

    /// Starts or connects to the server on first use.
    fn server_info(&self) -> TempDbResult<ServerInfo> {
        if self.closed.load(Ordering::SeqCst) {
            log::error!("PostgreSQL provider is closed");
            return Err(TempDbError::new(
                "PostgreSQL provider is closed",
                ErrorKind::ProvisioningFailure,
            ));
        }

        let mut server = self.server.lock();
        if let Some(server) = server.as_ref() {
            return Ok(server.info().clone());
        }
        let started = Server::start(&self.config)?;
        let info = started.info().clone();
        *server = Some(started);
        Ok(info)
    }

    fn close(&self) -> TempDbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.server.lock().take() {
            Some(server) => server.stop(),
            None => Ok(()),
        }
    }
}

/// Adds the `postgres` engine to `factories`.
///
/// Providers created this way honour `TEMPDB_POSTGRES_URL` and
/// `TEMPDB_POSTGRES_IMAGE_TAG`.
pub fn with_postgres(factories: ProviderFactories) -> ProviderFactories {
    factories.register(POSTGRES_ENGINE, |config, event_bus| {
        let mut builder = PostgresProvider::with_config()
            .from_env()
            .name_prefix(config.name_prefix());
        if let Some(event_bus) = event_bus {
            builder = builder.event_bus(event_bus.clone());
        }
        Ok(builder.build()?.into())
    })
}

fn create_database(server: &ServerInfo, name: &str) -> TempDbResult<()> {
    let mut admin = PostgresTarget::new(&server.maintenance_url()).open()?;
    admin
        .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(name)))
        .map_err(backend_error)
}

fn drop_database(server: &ServerInfo, name: &str) -> TempDbResult<()> {
    log::info!("Dropping PostgreSQL database {}", name);
    let mut admin = PostgresTarget::new(&server.maintenance_url()).open()?;
    admin
        .execute(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
            &[&name],
        )
        .map_err(backend_error)?;
    admin
        .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))
        .map_err(backend_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_starts_lazily() {
        let provider = PostgresProvider::with_config()
            .url("postgres://u:p@127.0.0.1:1/postgres")
            .build()
            .unwrap();
        assert_eq!(provider.engine(), POSTGRES_ENGINE);
        assert!(!provider.is_started());
    }

    #[test]
    fn unreachable_server_is_a_provisioning_failure() {
        // port 1 refuses connections
        let provider = PostgresProvider::with_config()
            .url("postgres://u:p@127.0.0.1:1/postgres")
            .build()
            .unwrap();
        let err = provider.provide_database(&[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ProvisioningFailure);
        assert_eq!(err.cause().map(|c| c.kind()), Some(&ErrorKind::BackendError));
    }

    #[test]
    fn factory_registers_postgres_engine() {
        let factories = with_postgres(ProviderFactories::with_defaults());
        assert_eq!(factories.engines(), vec!["postgres", "sqlite-file", "sqlite-memory"]);
    }

    #[test]
    fn closed_provider_refuses_requests() {
        let provider = PostgresProvider::with_config()
            .url("postgres://u:p@127.0.0.1:1/postgres")
            .build()
            .unwrap();
        provider.close().unwrap();
        provider.close().unwrap();
        let err = provider.provide_database(&[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ProvisioningFailure);
    }
}
