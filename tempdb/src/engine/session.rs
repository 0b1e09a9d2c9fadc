use crate::errors::TempDbResult;

/// Yields connections to one database.
///
/// Implementations must be cheap to share across threads; each call to
/// [`connect`](ConnectionTarget::connect) opens a fresh [`Session`].
pub trait ConnectionTarget: Send + Sync {
    /// Connection string of the database.
    fn url(&self) -> &str;

    /// Engine name, e.g. `sqlite-memory` or `postgres`.
    fn engine(&self) -> &str;

    /// Opens a new session.
    fn connect(&self) -> TempDbResult<Box<dyn Session>>;
}

/// An open connection to a database.
///
/// Errors returned by engine calls keep the engine's text verbatim.
pub trait Session: Send {
    /// Executes one or more SQL statements.
    fn execute_script(&mut self, sql: &str) -> TempDbResult<()>;

    fn begin(&mut self) -> TempDbResult<()> {
        self.execute_script("BEGIN")
    }

    fn commit(&mut self) -> TempDbResult<()> {
        self.execute_script("COMMIT")
    }

    fn rollback(&mut self) -> TempDbResult<()> {
        self.execute_script("ROLLBACK")
    }

    /// Schema used when a descriptor does not name one.
    fn default_schema(&self) -> &str;

    /// Makes sure `schema` exists and makes it the session's working schema.
    fn ensure_schema(&mut self, schema: &str) -> TempDbResult<()>;

    fn table_exists(&mut self, schema: &str, table: &str) -> TempDbResult<bool>;

    /// Creates the schema history table when it is missing.
    fn ensure_history_table(&mut self, schema: &str, table: &str) -> TempDbResult<()>;

    /// Reads the history ordered by installed rank; empty when the table is missing.
    fn history(&mut self, schema: &str, table: &str) -> TempDbResult<Vec<HistoryRecord>>;

    fn insert_history(
        &mut self,
        schema: &str,
        table: &str,
        record: &HistoryRecord,
    ) -> TempDbResult<()>;

    /// Drops every object of `schema` and returns how many were dropped.
    fn drop_all_objects(&mut self, schema: &str) -> TempDbResult<usize>;
}

/// One row of the schema history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub installed_rank: i64,
    pub version: String,
    pub description: String,
    pub script: String,
    pub checksum: String,
    pub success: bool,
}

impl HistoryRecord {
    pub fn is_baseline(&self) -> bool {
        self.script == crate::common::BASELINE_SCRIPT
    }
}

/// DDL of the history table, shared by engines that accept standard SQL types.
pub fn history_table_ddl(qualified_table: &str, rank_type: &str, bool_type: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
            installed_rank {} PRIMARY KEY, \
            version TEXT NOT NULL, \
            description TEXT NOT NULL, \
            script TEXT NOT NULL, \
            checksum TEXT NOT NULL, \
            success {} NOT NULL)",
        qualified_table, rank_type, bool_type
    )
}
