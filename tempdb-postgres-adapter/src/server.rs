use crate::config::{PostgresConfig, MAINTENANCE_DATABASE};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use postgres::config::Host;
use std::fmt::Display;
use tempdb::errors::{ErrorKind, TempDbError, TempDbResult};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, ImageExt};
use testcontainers_modules::postgres::Postgres;

const POSTGRES_PORT: u16 = 5432;

// everything but unreserved characters is escaped in the userinfo part
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Address and credentials of a PostgreSQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerInfo {
    host: String,
    port: u16,
    user: String,
    password: String,
    maintenance_database: String,
}

impl ServerInfo {
    pub(crate) fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        ServerInfo {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            maintenance_database: MAINTENANCE_DATABASE.to_string(),
        }
    }

    /// Parses a `postgres://` URL or a `key=value` connection string.
    pub(crate) fn parse(url: &str) -> TempDbResult<ServerInfo> {
        let config: postgres::Config = url.parse().map_err(|e| {
            TempDbError::new(
                &format!("Invalid PostgreSQL connection string: {}", e),
                ErrorKind::InvalidConfiguration,
            )
        })?;

        let host = match config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            None => "localhost".to_string(),
            #[allow(unreachable_patterns)]
            Some(_) => {
                return Err(TempDbError::new(
                    "Only TCP hosts are supported for PostgreSQL servers",
                    ErrorKind::InvalidConfiguration,
                ))
            }
        };
        let password = config
            .get_password()
            .map(|password| String::from_utf8_lossy(password).to_string())
            .unwrap_or_default();

        Ok(ServerInfo {
            host,
            port: config.get_ports().first().copied().unwrap_or(POSTGRES_PORT),
            user: config.get_user().unwrap_or("postgres").to_string(),
            password,
            maintenance_database: config
                .get_dbname()
                .unwrap_or(MAINTENANCE_DATABASE)
                .to_string(),
        })
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn maintenance_database(&self) -> &str {
        &self.maintenance_database
    }

    /// Connection string of `database` on this server.
    ///
    /// Credentials are percent-encoded and IPv6 hosts are bracketed, so the
    /// result parses back to the same server.
    pub(crate) fn url(&self, database: &str) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let user = utf8_percent_encode(&self.user, USERINFO);
        if self.password.is_empty() {
            format!("postgres://{}@{}:{}/{}", user, host, self.port, database)
        } else {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                user,
                utf8_percent_encode(&self.password, USERINFO),
                host,
                self.port,
                database
            )
        }
    }

    pub(crate) fn maintenance_url(&self) -> String {
        self.url(&self.maintenance_database)
    }
}

/// A running server: either external or a container owned by the provider.
pub(crate) enum Server {
    External(ServerInfo),
    Container {
        info: ServerInfo,
        // removed when dropped
        container: Container<Postgres>,
    },
}

impl Server {
    pub(crate) fn start(config: &PostgresConfig) -> TempDbResult<Server> {
        if let Some(info) = &config.server {
            log::info!("Using PostgreSQL server at {}:{}", info.host(), info.port());
            return Ok(Server::External(info.clone()));
        }

        log::info!("Starting postgres:{} container", config.image_tag);
        let container = Postgres::default()
            .with_tag(config.image_tag.as_str())
            .with_env_var("POSTGRES_USER", config.user.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .with_env_var("POSTGRES_DB", MAINTENANCE_DATABASE)
            .start()
            .map_err(|e| container_error("start", e))?;

        let port = container
            .get_host_port_ipv4(POSTGRES_PORT)
            .map_err(|e| container_error("inspect", e))?;
        let host = container
            .get_host()
            .map_err(|e| container_error("inspect", e))?
            .to_string();
        log::info!("PostgreSQL container {} listening on {}:{}", container.id(), host, port);

        Ok(Server::Container {
            info: ServerInfo::new(&host, port, &config.user, &config.password),
            container,
        })
    }

    pub(crate) fn info(&self) -> &ServerInfo {
        match self {
            Server::External(info) => info,
            Server::Container { info, .. } => info,
        }
    }

    pub(crate) fn stop(self) -> TempDbResult<()> {
        match self {
            Server::External(_) => Ok(()),
            Server::Container { container, .. } => {
                log::info!("Stopping PostgreSQL container {}", container.id());
                container.stop().map_err(|e| container_error("stop", e))
            }
        }
    }
}

fn container_error(operation: &str, e: impl Display) -> TempDbError {
    log::error!("Failed to {} PostgreSQL container: {}", operation, e);
    TempDbError::new(
        &format!("Failed to {} PostgreSQL container: {}", operation, e),
        ErrorKind::Extension("postgres".to_string()),
    )
}
