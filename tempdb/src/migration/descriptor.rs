use crate::engine::Session;
use crate::migration::{
    probed_config_builder, Location, MigrationTool, MigrationToolConfigBuilder, ToolConfig,
};
use crate::preparer::MigrationPreparer;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Immutable description of a migration tool configuration.
///
/// Equality and hashing cover the schema, the ordered locations and the
/// validate-on-migrate flag only. The configuration builder is not part of
/// the identity: two descriptors built through different API generations are
/// equal when they configure the tool identically.
///
/// A descriptor is built once and reused to create the
/// [`migrate`](Self::migrate), [`clean`](Self::clean) and
/// [`baseline`](Self::baseline) preparers that share it.
#[derive(Clone)]
pub struct MigrationDescriptor {
    schema: String,
    locations: Vec<Location>,
    validate_on_migrate: bool,
    config_builder: Arc<dyn MigrationToolConfigBuilder>,
}

impl MigrationDescriptor {
    /// Descriptor with validation enabled and the probed configuration builder.
    pub fn new(schema: &str, locations: Vec<Location>) -> Self {
        MigrationDescriptor::builder()
            .schema(schema)
            .locations(locations)
            .build()
    }

    pub fn builder() -> MigrationDescriptorBuilder {
        MigrationDescriptorBuilder::new()
    }

    /// Target schema, empty for the engine's default.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn validate_on_migrate(&self) -> bool {
        self.validate_on_migrate
    }

    pub fn api_version(&self) -> u32 {
        self.config_builder.api_version()
    }

    pub fn tool_config(&self) -> ToolConfig {
        self.config_builder.build(self)
    }

    /// Configures the migration tool against an open session.
    pub fn configure(&self, session: Box<dyn Session>) -> MigrationTool {
        MigrationTool::new(self.tool_config(), session)
    }

    pub fn migrate(&self) -> MigrationPreparer {
        MigrationPreparer::migrate(self.clone())
    }

    pub fn clean(&self) -> MigrationPreparer {
        MigrationPreparer::clean(self.clone())
    }

    pub fn baseline(&self) -> MigrationPreparer {
        MigrationPreparer::baseline(self.clone())
    }
}

impl PartialEq for MigrationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
            && self.locations == other.locations
            && self.validate_on_migrate == other.validate_on_migrate
    }
}

impl Eq for MigrationDescriptor {}

impl Hash for MigrationDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.locations.hash(state);
        self.validate_on_migrate.hash(state);
    }
}

impl Debug for MigrationDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDescriptor")
            .field("schema", &self.schema)
            .field("locations", &self.locations)
            .field("validate_on_migrate", &self.validate_on_migrate)
            .field("api_version", &self.api_version())
            .finish()
    }
}

/// Builder for [`MigrationDescriptor`].
pub struct MigrationDescriptorBuilder {
    schema: String,
    locations: Vec<Location>,
    validate_on_migrate: bool,
    config_builder: Option<Arc<dyn MigrationToolConfigBuilder>>,
}

impl MigrationDescriptorBuilder {
    fn new() -> Self {
        MigrationDescriptorBuilder {
            schema: String::new(),
            locations: Vec::new(),
            validate_on_migrate: true,
            config_builder: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    pub fn locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations.extend(locations);
        self
    }

    pub fn validate_on_migrate(mut self, validate: bool) -> Self {
        self.validate_on_migrate = validate;
        self
    }

    /// Pins the configuration API generation instead of probing it.
    pub fn config_builder(mut self, builder: Arc<dyn MigrationToolConfigBuilder>) -> Self {
        self.config_builder = Some(builder);
        self
    }

    pub fn build(self) -> MigrationDescriptor {
        MigrationDescriptor {
            schema: self.schema,
            locations: self.locations,
            validate_on_migrate: self.validate_on_migrate,
            config_builder: self.config_builder.unwrap_or_else(probed_config_builder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{ClassicConfigBuilder, FluentConfigBuilder};
    use std::collections::HashSet;

    #[test]
    fn equality_is_structural() {
        let a = MigrationDescriptor::new("main", vec![Location::filesystem("db/v1")]);
        let b = MigrationDescriptor::new("main", vec![Location::filesystem("db/v1")]);
        let c = MigrationDescriptor::new("main", vec![Location::filesystem("db/v2")]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = vec![a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn location_order_matters() {
        let a = MigrationDescriptor::new(
            "main",
            vec![Location::filesystem("v1"), Location::filesystem("v2")],
        );
        let b = MigrationDescriptor::new(
            "main",
            vec![Location::filesystem("v2"), Location::filesystem("v1")],
        );
        assert_ne!(a, b);
    }

    #[test]
    fn validate_flag_is_part_of_identity() {
        let a = MigrationDescriptor::builder().schema("main").build();
        let b = MigrationDescriptor::builder()
            .schema("main")
            .validate_on_migrate(false)
            .build();
        assert_ne!(a, b);
    }

    #[test]
    fn config_builder_is_not_part_of_identity() {
        let classic = MigrationDescriptor::builder()
            .schema("main")
            .config_builder(Arc::new(ClassicConfigBuilder))
            .build();
        let fluent = MigrationDescriptor::builder()
            .schema("main")
            .config_builder(Arc::new(FluentConfigBuilder))
            .build();
        assert_eq!(classic, fluent);
        assert_ne!(classic.api_version(), fluent.api_version());
    }

    #[test]
    fn empty_locations_are_legal() {
        let descriptor = MigrationDescriptor::new("", Vec::new());
        assert!(descriptor.locations().is_empty());
        assert!(descriptor.tool_config().locations().is_empty());
    }

    #[test]
    fn debug_lists_fields() {
        let descriptor = MigrationDescriptor::new("main", Vec::new());
        let debug = format!("{:?}", descriptor);
        assert!(debug.contains("schema: \"main\""));
        assert!(debug.contains("validate_on_migrate: true"));
    }
}
