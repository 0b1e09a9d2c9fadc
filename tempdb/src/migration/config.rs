use crate::common::SCHEMA_HISTORY_TABLE;
use crate::migration::{Location, ScriptVersion};

/// Resolved configuration of the migration tool.
///
/// Produced by either configuration API generation; both produce equal values
/// for equal inputs. An empty schema means the engine's default schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    schema: String,
    locations: Vec<Location>,
    validate_on_migrate: bool,
    history_table: String,
    baseline_version: ScriptVersion,
    baseline_description: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            schema: String::new(),
            locations: Vec::new(),
            validate_on_migrate: true,
            history_table: SCHEMA_HISTORY_TABLE.to_string(),
            baseline_version: ScriptVersion::new(vec![1]),
            baseline_description: crate::common::BASELINE_DESCRIPTION.to_string(),
        }
    }
}

impl ToolConfig {
    /// Entry point of the fluent (generation 2) configuration API.
    pub fn configure() -> FluentConfiguration {
        FluentConfiguration {
            config: ToolConfig::default(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn validate_on_migrate(&self) -> bool {
        self.validate_on_migrate
    }

    pub fn history_table(&self) -> &str {
        &self.history_table
    }

    pub fn baseline_version(&self) -> &ScriptVersion {
        &self.baseline_version
    }

    pub fn baseline_description(&self) -> &str {
        &self.baseline_description
    }
}

/// Fluent configuration API (generation 2).
///
/// ```rust,ignore
/// let config = ToolConfig::configure()
///     .schema("main")
///     .locations(vec![Location::filesystem("db/migration")])
///     .validate_on_migrate(true)
///     .load();
/// ```
#[derive(Debug, Clone)]
pub struct FluentConfiguration {
    config: ToolConfig,
}

impl FluentConfiguration {
    pub fn schema(mut self, schema: &str) -> Self {
        self.config.schema = schema.to_string();
        self
    }

    pub fn locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.config.locations = locations.into_iter().collect();
        self
    }

    pub fn validate_on_migrate(mut self, validate: bool) -> Self {
        self.config.validate_on_migrate = validate;
        self
    }

    pub fn history_table(mut self, table: &str) -> Self {
        self.config.history_table = table.to_string();
        self
    }

    pub fn baseline_version(mut self, version: ScriptVersion) -> Self {
        self.config.baseline_version = version;
        self
    }

    pub fn load(self) -> ToolConfig {
        self.config
    }
}

/// Setter-based configuration API (generation 1).
///
/// Generation 1 takes a schema list whose first entry is the default schema
/// and accumulates locations one call at a time.
#[deprecated(note = "use ToolConfig::configure()")]
#[derive(Debug, Clone, Default)]
pub struct ClassicConfiguration {
    schemas: Vec<String>,
    locations: Vec<Location>,
    validate_on_migrate: Option<bool>,
    table: Option<String>,
}

#[allow(deprecated)]
impl ClassicConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schemas(&mut self, schemas: &[&str]) {
        self.schemas = schemas.iter().map(|s| s.to_string()).collect();
    }

    pub fn add_location(&mut self, location: Location) {
        self.locations.push(location);
    }

    pub fn set_validate_on_migrate(&mut self, validate: bool) {
        self.validate_on_migrate = Some(validate);
    }

    pub fn set_table(&mut self, table: &str) {
        self.table = Some(table.to_string());
    }

    pub fn into_config(self) -> ToolConfig {
        let defaults = ToolConfig::default();
        ToolConfig {
            schema: self.schemas.into_iter().next().unwrap_or_default(),
            locations: self.locations,
            validate_on_migrate: self
                .validate_on_migrate
                .unwrap_or(defaults.validate_on_migrate),
            history_table: self.table.unwrap_or(defaults.history_table),
            baseline_version: defaults.baseline_version,
            baseline_description: defaults.baseline_description,
        }
    }
}
