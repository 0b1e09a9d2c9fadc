use crate::common::{DEFAULT_NAME_PREFIX, ENV_MIGRATION_API, ENV_REGISTRATION_POLICY, SQLITE_FILE_ENGINE, SQLITE_MEMORY_ENGINE};
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::lifecycle::LifecycleEventBus;
use crate::migration::{
    builder_for, probed_config_builder, Location, MigrationDescriptor, MigrationToolConfigBuilder,
    ToolVersion,
};
use crate::provider::{InMemoryProvider, Provider, ProviderRegistry, RegistrationPolicy, TempFileProvider};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const AUTO_MIGRATION_API: &str = "auto";

/// Declarative configuration of providers and migration descriptors.
///
/// ```toml
/// registration_policy = "reject"
/// migration_api = "auto"
///
/// [[providers]]
/// database = "orders"
/// type = "memory"
/// engine = "sqlite-memory"
///
/// [descriptors.orders]
/// schema = "main"
/// locations = ["filesystem:db/migration"]
/// validate_on_migrate = true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TempDbConfig {
    pub registration_policy: RegistrationPolicy,
    /// `auto`, or the major generation of the migration tool API to pin.
    pub migration_api: String,
    pub providers: Vec<ProviderConfig>,
    pub descriptors: BTreeMap<String, DescriptorConfig>,
}

impl Default for TempDbConfig {
    fn default() -> Self {
        TempDbConfig {
            registration_policy: RegistrationPolicy::default(),
            migration_api: AUTO_MIGRATION_API.to_string(),
            providers: Vec::new(),
            descriptors: BTreeMap::new(),
        }
    }
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub database: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub engine: String,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

impl ProviderConfig {
    pub fn new(database: &str, provider_type: &str, engine: &str) -> Self {
        ProviderConfig {
            database: database.to_string(),
            provider_type: provider_type.to_string(),
            engine: engine.to_string(),
            name_prefix: None,
        }
    }

    pub fn name_prefix(&self) -> &str {
        self.name_prefix.as_deref().unwrap_or(DEFAULT_NAME_PREFIX)
    }
}

/// One `[descriptors.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorConfig {
    pub schema: String,
    pub locations: Vec<String>,
    pub validate_on_migrate: bool,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        DescriptorConfig {
            schema: String::new(),
            locations: Vec::new(),
            validate_on_migrate: true,
        }
    }
}

impl TempDbConfig {
    pub fn from_toml_str(text: &str) -> TempDbResult<TempDbConfig> {
        let config: TempDbConfig = toml::from_str(text).map_err(|e| {
            log::error!("Invalid tempdb configuration: {}", e);
            TempDbError::from(e)
        })?;
        config.migration_config_builder()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> TempDbResult<TempDbConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            log::error!("Failed to read configuration {}: {}", path.display(), e);
            TempDbError::new_with_cause(
                &format!("Failed to read configuration {}", path.display()),
                ErrorKind::InvalidConfiguration,
                e.into(),
            )
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies `TEMPDB_REGISTRATION_POLICY` and `TEMPDB_MIGRATION_API`.
    pub fn with_env_overrides(self) -> TempDbResult<TempDbConfig> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> TempDbResult<TempDbConfig> {
        if let Some(policy) = lookup(ENV_REGISTRATION_POLICY) {
            self.registration_policy = policy.parse()?;
        }
        if let Some(api) = lookup(ENV_MIGRATION_API) {
            self.migration_api = api.trim().to_string();
        }
        self.migration_config_builder()?;
        Ok(self)
    }

    /// Configuration API builder selected by `migration_api`.
    pub fn migration_config_builder(&self) -> TempDbResult<Arc<dyn MigrationToolConfigBuilder>> {
        let api = self.migration_api.trim();
        if api.is_empty() || api.eq_ignore_ascii_case(AUTO_MIGRATION_API) {
            Ok(probed_config_builder())
        } else {
            Ok(builder_for(ToolVersion::parse(api)?))
        }
    }

    pub fn descriptor_names(&self) -> Vec<&str> {
        self.descriptors.keys().map(|name| name.as_str()).collect()
    }

    /// Builds the descriptor configured under `name`.
    pub fn descriptor(&self, name: &str) -> TempDbResult<MigrationDescriptor> {
        let config = self.descriptors.get(name).ok_or_else(|| {
            log::error!("No descriptor named '{}' configured", name);
            TempDbError::new(
                &format!("No descriptor named '{}' configured", name),
                ErrorKind::InvalidConfiguration,
            )
        })?;

        let locations = config
            .locations
            .iter()
            .map(|location| Location::parse(location))
            .collect::<TempDbResult<Vec<_>>>()?;

        Ok(MigrationDescriptor::builder()
            .schema(&config.schema)
            .locations(locations)
            .validate_on_migrate(config.validate_on_migrate)
            .config_builder(self.migration_config_builder()?)
            .build())
    }
}

/// Creates a provider for one `[[providers]]` entry.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig, Option<&LifecycleEventBus>) -> TempDbResult<Provider> + Send + Sync>;

/// Provider constructors by engine name.
#[derive(Clone, Default)]
pub struct ProviderFactories {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories for `sqlite-memory` and `sqlite-file`.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(SQLITE_MEMORY_ENGINE, |config, event_bus| {
                let mut builder = InMemoryProvider::with_config().name_prefix(config.name_prefix());
                if let Some(event_bus) = event_bus {
                    builder = builder.event_bus(event_bus.clone());
                }
                Ok(builder.build().into())
            })
            .register(SQLITE_FILE_ENGINE, |config, event_bus| {
                let mut builder = TempFileProvider::with_config().name_prefix(config.name_prefix());
                if let Some(event_bus) = event_bus {
                    builder = builder.event_bus(event_bus.clone());
                }
                Ok(builder.build().into())
            })
    }

    pub fn register(
        mut self,
        engine: &str,
        factory: impl Fn(&ProviderConfig, Option<&LifecycleEventBus>) -> TempDbResult<Provider>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.factories.insert(engine.to_string(), Arc::new(factory));
        self
    }

    /// Known engine names, sorted.
    pub fn engines(&self) -> Vec<&str> {
        let mut engines: Vec<&str> = self.factories.keys().map(|e| e.as_str()).collect();
        engines.sort();
        engines
    }

    pub fn create(
        &self,
        config: &ProviderConfig,
        event_bus: Option<&LifecycleEventBus>,
    ) -> TempDbResult<Provider> {
        match self.factories.get(&config.engine) {
            Some(factory) => factory(config, event_bus),
            None => {
                let message = format!(
                    "Unknown engine '{}' for database '{}'; known engines: {:?}",
                    config.engine,
                    config.database,
                    self.engines()
                );
                log::error!("{}", message);
                Err(TempDbError::new(&message, ErrorKind::InvalidConfiguration))
            }
        }
    }
}

impl Debug for ProviderFactories {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactories")
            .field("engines", &self.engines())
            .finish()
    }
}

impl ProviderRegistry {
    /// Builds a registry from the `[[providers]]` entries of `config`.
    ///
    /// Entries with the same engine and name prefix share one provider
    /// instance, so a server-backed engine starts a single server.
    pub fn from_config(
        config: &TempDbConfig,
        factories: &ProviderFactories,
        event_bus: Option<&LifecycleEventBus>,
    ) -> TempDbResult<ProviderRegistry> {
        let mut shared: HashMap<(String, String), Provider> = HashMap::new();
        let mut builder = ProviderRegistry::builder().policy(config.registration_policy);

        for entry in &config.providers {
            let key = (entry.engine.clone(), entry.name_prefix().to_string());
            let provider = match shared.get(&key) {
                Some(provider) => provider.clone(),
                None => {
                    let provider = factories.create(entry, event_bus)?;
                    shared.insert(key, provider.clone());
                    provider
                }
            };
            log::debug!(
                "Registering {} provider for ({}, {})",
                entry.engine,
                entry.database,
                entry.provider_type
            );
            builder = builder.register(&entry.database, &entry.provider_type, provider);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
registration_policy = "replace"
migration_api = "1"

[[providers]]
database = "orders"
type = "memory"
engine = "sqlite-memory"

[[providers]]
database = "orders"
type = "file"
engine = "sqlite-file"
name_prefix = "ordersfile"

[[providers]]
database = "users"
type = "memory"
engine = "sqlite-memory"

[descriptors.orders]
schema = "main"
locations = ["filesystem:db/orders", "db/shared"]
"#;

    #[test]
    fn parses_full_configuration() {
        let config = TempDbConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.registration_policy, RegistrationPolicy::Replace);
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.providers[1].provider_type, "file");
        assert_eq!(config.providers[1].name_prefix(), "ordersfile");
        assert_eq!(config.providers[0].name_prefix(), DEFAULT_NAME_PREFIX);
        assert_eq!(config.descriptor_names(), vec!["orders"]);
    }

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = TempDbConfig::from_toml_str("").unwrap();
        assert_eq!(config, TempDbConfig::default());
        assert_eq!(config.registration_policy, RegistrationPolicy::Reject);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let err = TempDbConfig::from_toml_str("registration_policy = \"merge\"").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);

        let err = TempDbConfig::from_toml_str("unknown = 1").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);

        let err = TempDbConfig::from_toml_str("migration_api = \"latest\"").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn descriptor_uses_pinned_api() {
        let config = TempDbConfig::from_toml_str(CONFIG).unwrap();
        let descriptor = config.descriptor("orders").unwrap();
        assert_eq!(descriptor.api_version(), 1);
        assert_eq!(descriptor.schema(), "main");
        assert_eq!(
            descriptor.locations(),
            &[Location::filesystem("db/orders"), Location::filesystem("db/shared")]
        );
        assert!(descriptor.validate_on_migrate());

        // equal to a descriptor built through the other API generation
        let fluent = MigrationDescriptor::builder()
            .schema("main")
            .locations(descriptor.locations().to_vec())
            .config_builder(builder_for(ToolVersion::new(2, 0)))
            .build();
        assert_eq!(descriptor, fluent);

        assert!(config.descriptor("missing").is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = TempDbConfig::from_toml_str(CONFIG)
            .unwrap()
            .with_overrides(|name| match name {
                ENV_REGISTRATION_POLICY => Some("reject".to_string()),
                ENV_MIGRATION_API => Some("2".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.registration_policy, RegistrationPolicy::Reject);
        assert_eq!(config.migration_config_builder().unwrap().api_version(), 2);

        let err = TempDbConfig::default()
            .with_overrides(|name| (name == ENV_REGISTRATION_POLICY).then(|| "sometimes".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn registry_from_config_shares_providers() {
        let config = TempDbConfig::from_toml_str(CONFIG).unwrap();
        let registry =
            ProviderRegistry::from_config(&config, &ProviderFactories::with_defaults(), None).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.provider_types(), vec!["file", "memory"]);

        let orders = registry.resolve("orders", "memory").unwrap();
        let users = registry.resolve("users", "memory").unwrap();
        assert!(orders.ptr_eq(&users));
        assert_eq!(registry.resolve("orders", "file").unwrap().engine(), SQLITE_FILE_ENGINE);
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut config = TempDbConfig::default();
        config
            .providers
            .push(ProviderConfig::new("orders", "pg", "postgres"));
        let err = ProviderRegistry::from_config(&config, &ProviderFactories::with_defaults(), None)
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::InvalidConfiguration);
        assert!(err.message().contains("[\"sqlite-file\", \"sqlite-memory\"]"));
    }

    #[test]
    fn duplicate_entries_follow_policy() {
        let mut config = TempDbConfig::default();
        config
            .providers
            .push(ProviderConfig::new("orders", "memory", SQLITE_MEMORY_ENGINE));
        config
            .providers
            .push(ProviderConfig::new("orders", "memory", SQLITE_FILE_ENGINE));

        let err = ProviderRegistry::from_config(&config, &ProviderFactories::with_defaults(), None)
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::DuplicateProvider);

        config.registration_policy = RegistrationPolicy::Replace;
        let registry =
            ProviderRegistry::from_config(&config, &ProviderFactories::with_defaults(), None).unwrap();
        assert_eq!(registry.resolve("orders", "memory").unwrap().engine(), SQLITE_FILE_ENGINE);
    }
}
