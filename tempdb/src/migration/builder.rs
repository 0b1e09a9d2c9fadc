use crate::common::ENV_MIGRATION_API;
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::migration::{MigrationDescriptor, ToolConfig};
use cargo_toml::Manifest;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, LazyLock};

#[allow(deprecated)]
use crate::migration::ClassicConfiguration;

static PROBED_BUILDER: LazyLock<Arc<dyn MigrationToolConfigBuilder>> = LazyLock::new(|| {
    match ToolVersion::probe() {
        Ok(version) => {
            log::debug!("Migration tool API version {} detected", version);
            builder_for(version)
        }
        Err(e) => {
            log::warn!("Failed to probe migration tool version: {}, using the fluent API", e);
            Arc::new(FluentConfigBuilder)
        }
    }
});

/// Turns a descriptor into a [`ToolConfig`] through one generation of the
/// tool's configuration API.
///
/// Every implementation must produce the same `ToolConfig` for the same
/// descriptor; only the construction path differs.
pub trait MigrationToolConfigBuilder: Send + Sync + Debug {
    /// Major API generation this builder targets.
    fn api_version(&self) -> u32;

    fn build(&self, descriptor: &MigrationDescriptor) -> ToolConfig;
}

/// Builder for the setter-based generation 1 API.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicConfigBuilder;

impl MigrationToolConfigBuilder for ClassicConfigBuilder {
    fn api_version(&self) -> u32 {
        1
    }

    #[allow(deprecated)]
    fn build(&self, descriptor: &MigrationDescriptor) -> ToolConfig {
        let mut configuration = ClassicConfiguration::new();
        if !descriptor.schema().is_empty() {
            configuration.set_schemas(&[descriptor.schema()]);
        }
        for location in descriptor.locations() {
            configuration.add_location(location.clone());
        }
        configuration.set_validate_on_migrate(descriptor.validate_on_migrate());
        configuration.into_config()
    }
}

/// Builder for the fluent generation 2 API.
#[derive(Debug, Clone, Copy, Default)]
pub struct FluentConfigBuilder;

impl MigrationToolConfigBuilder for FluentConfigBuilder {
    fn api_version(&self) -> u32 {
        2
    }

    fn build(&self, descriptor: &MigrationDescriptor) -> ToolConfig {
        ToolConfig::configure()
            .schema(descriptor.schema())
            .locations(descriptor.locations().iter().cloned())
            .validate_on_migrate(descriptor.validate_on_migrate())
            .load()
    }
}

/// Picks the builder matching a tool version.
pub fn builder_for(version: ToolVersion) -> Arc<dyn MigrationToolConfigBuilder> {
    if version.major() >= 2 {
        Arc::new(FluentConfigBuilder)
    } else {
        Arc::new(ClassicConfigBuilder)
    }
}

/// Builder chosen by probing the tool version, computed once per process.
pub fn probed_config_builder() -> Arc<dyn MigrationToolConfigBuilder> {
    Arc::clone(&PROBED_BUILDER)
}

/// `major.minor` version of the migration tool API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolVersion {
    major: u32,
    minor: u32,
}

impl ToolVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        ToolVersion { major, minor }
    }

    /// Parses `2`, `2.1` or `2.1.0`; requirement operators (`^`, `=`, `~`) and
    /// a leading `v` are ignored.
    pub fn parse(text: &str) -> TempDbResult<ToolVersion> {
        let trimmed = text.trim().trim_start_matches(['^', '=', '~', 'v']);
        let mut parts = trimmed.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Self::invalid(text))?
            .parse::<u32>()
            .map_err(|_| Self::invalid(text))?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u32>().map_err(|_| Self::invalid(text))?,
            None => 0,
        };
        Ok(ToolVersion { major, minor })
    }

    /// Detects the tool API version.
    ///
    /// `TEMPDB_MIGRATION_API` wins when set to anything but `auto`; otherwise
    /// the version declared in this crate's manifest metadata is used.
    pub fn probe() -> TempDbResult<ToolVersion> {
        if let Ok(value) = std::env::var(ENV_MIGRATION_API) {
            if !value.trim().is_empty() && !value.eq_ignore_ascii_case("auto") {
                return ToolVersion::parse(&value);
            }
        }
        Self::from_manifest(include_str!("../../Cargo.toml"))
    }

    pub(crate) fn from_manifest(cargo_toml: &str) -> TempDbResult<ToolVersion> {
        let manifest = Manifest::from_str(cargo_toml).map_err(|e| {
            TempDbError::new(
                &format!("Failed to parse Cargo.toml: {}", e),
                ErrorKind::InvalidConfiguration,
            )
        })?;

        let version = manifest
            .package
            .as_ref()
            .and_then(|package| package.metadata.as_ref())
            .and_then(|metadata| metadata.get("tempdb"))
            .and_then(|tempdb| tempdb.get("migration-api"))
            .and_then(|version| version.as_str())
            .ok_or_else(|| {
                TempDbError::new(
                    "package.metadata.tempdb.migration-api not found in Cargo.toml",
                    ErrorKind::InvalidConfiguration,
                )
            })?;
        ToolVersion::parse(version)
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    fn invalid(text: &str) -> TempDbError {
        TempDbError::new(
            &format!("Invalid migration tool version '{}'", text),
            ErrorKind::InvalidConfiguration,
        )
    }
}

impl Display for ToolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
