/// Event type under which every lifecycle event is published.
pub const LIFECYCLE_EVENT: &str = "tempdb.lifecycle";

/// Default name of the schema history table maintained by the migration tool.
pub const SCHEMA_HISTORY_TABLE: &str = "tempdb_schema_history";

/// Script name recorded for a baseline row in the schema history.
pub const BASELINE_SCRIPT: &str = "<< Baseline >>";
pub const BASELINE_DESCRIPTION: &str = "<< Baseline >>";

/// Engine names of the built-in providers.
pub const SQLITE_MEMORY_ENGINE: &str = "sqlite-memory";
pub const SQLITE_FILE_ENGINE: &str = "sqlite-file";

/// Prefix of generated database names.
pub const DEFAULT_NAME_PREFIX: &str = "tempdb";

// environment overrides
pub const ENV_REGISTRATION_POLICY: &str = "TEMPDB_REGISTRATION_POLICY";
pub const ENV_MIGRATION_API: &str = "TEMPDB_MIGRATION_API";
