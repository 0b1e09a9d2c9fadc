use crate::server::ServerInfo;
use tempdb::common::DEFAULT_NAME_PREFIX;
use tempdb::errors::{ErrorKind, TempDbError, TempDbResult};
use tempdb::lifecycle::LifecycleEventBus;

/// Connection string of an already running server; skips the container.
pub const ENV_POSTGRES_URL: &str = "TEMPDB_POSTGRES_URL";
/// Tag of the `postgres` image started when no server URL is configured.
pub const ENV_POSTGRES_IMAGE_TAG: &str = "TEMPDB_POSTGRES_IMAGE_TAG";

pub const DEFAULT_IMAGE_TAG: &str = "16-alpine";
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "postgres";
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// Settings of a [`PostgresProvider`](crate::PostgresProvider).
///
/// Without a server URL the provider starts a `postgres` container on first
/// use, with the configured image tag and credentials.
#[derive(Clone)]
pub struct PostgresConfig {
    pub(crate) server: Option<ServerInfo>,
    pub(crate) image_tag: String,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) name_prefix: String,
    pub(crate) event_bus: Option<LifecycleEventBus>,
}

impl PostgresConfig {
    pub fn new() -> PostgresConfig {
        PostgresConfig {
            server: None,
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            event_bus: None,
        }
    }

    /// External server, if one is configured.
    pub fn server_url(&self) -> Option<String> {
        self.server
            .as_ref()
            .map(|server| server.url(server.maintenance_database()))
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn uses_container(&self) -> bool {
        self.server.is_none()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`PostgresProvider`](crate::PostgresProvider).
///
/// Invalid settings are remembered and reported by `build`.
pub struct PostgresProviderBuilder {
    config: PostgresConfig,
    error: Option<TempDbError>,
}

impl PostgresProviderBuilder {
    pub fn new() -> Self {
        PostgresProviderBuilder {
            config: PostgresConfig::new(),
            error: None,
        }
    }

    /// Uses an already running server instead of a container.
    pub fn url(mut self, url: &str) -> Self {
        match ServerInfo::parse(url) {
            Ok(server) => self.config.server = Some(server),
            Err(e) => {
                log::error!("Invalid PostgreSQL url: {}", e);
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn image_tag(mut self, tag: &str) -> Self {
        if tag.trim().is_empty() {
            self.error.get_or_insert(TempDbError::new(
                "PostgreSQL image tag cannot be empty",
                ErrorKind::InvalidConfiguration,
            ));
        } else {
            self.config.image_tag = tag.trim().to_string();
        }
        self
    }

    /// Credentials of the container's superuser.
    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.config.user = user.to_string();
        self.config.password = password.to_string();
        self
    }

    pub fn name_prefix(mut self, name_prefix: &str) -> Self {
        self.config.name_prefix = name_prefix.to_string();
        self
    }

    pub fn event_bus(mut self, event_bus: LifecycleEventBus) -> Self {
        self.config.event_bus = Some(event_bus);
        self
    }

    /// Applies `TEMPDB_POSTGRES_URL` and `TEMPDB_POSTGRES_IMAGE_TAG`.
    pub fn from_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_POSTGRES_URL).filter(|url| !url.trim().is_empty()) {
            self = self.url(url.trim());
        }
        if let Some(tag) = lookup(ENV_POSTGRES_IMAGE_TAG).filter(|tag| !tag.trim().is_empty()) {
            self = self.image_tag(&tag);
        }
        self
    }

    pub fn build(self) -> TempDbResult<crate::PostgresProvider> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(crate::PostgresProvider::new(self.config)),
        }
    }
}

impl Default for PostgresProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
