use crate::common::quote_identifier;
use crate::engine::{history_table_ddl, ConnectionTarget, HistoryRecord, Session};
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

const SQLITE_SCHEMA: &str = "main";

// unreserved characters and separators stay readable in file URIs
const URI_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b':');

/// Builds a `file:` URI for a database file, escaping characters that
/// SQLite would otherwise read as query, fragment or escape markers.
pub fn file_uri(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    let encoded = utf8_percent_encode(&path, URI_PATH).to_string();
    // drive letter paths need an empty authority
    if path.as_bytes().get(1) == Some(&b':') {
        format!("file:///{}", encoded)
    } else {
        format!("file:{}", encoded)
    }
}

/// Connection target for a SQLite database addressed by URI.
///
/// Both `file:<name>?mode=memory&cache=shared` and `file:<path>` forms are
/// accepted, connections are opened with URI parsing enabled.
#[derive(Debug, Clone)]
pub struct SqliteTarget {
    url: String,
    engine: String,
}

impl SqliteTarget {
    pub fn new(url: &str, engine: &str) -> Self {
        SqliteTarget {
            url: url.to_string(),
            engine: engine.to_string(),
        }
    }

    /// Opens a raw connection, used by providers for their anchor connection.
    pub fn open(&self) -> TempDbResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(&self.url, flags)?)
    }
}

impl ConnectionTarget for SqliteTarget {
    fn url(&self) -> &str {
        &self.url
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    fn connect(&self) -> TempDbResult<Box<dyn Session>> {
        Ok(Box::new(SqliteSession::new(self.open()?)))
    }
}

/// [`Session`] over a rusqlite connection.
///
/// SQLite has a single writable schema per database, `main`; any other schema
/// name is rejected.
pub struct SqliteSession {
    connection: Connection,
}

impl SqliteSession {
    pub fn new(connection: Connection) -> Self {
        SqliteSession { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn check_schema(schema: &str) -> TempDbResult<()> {
        if schema.eq_ignore_ascii_case(SQLITE_SCHEMA) {
            Ok(())
        } else {
            log::error!("SQLite database has no schema named '{}'", schema);
            Err(TempDbError::new(
                &format!(
                    "SQLite databases only expose the '{}' schema, got '{}'",
                    SQLITE_SCHEMA, schema
                ),
                ErrorKind::ValidationError,
            ))
        }
    }

    fn qualified(schema: &str, table: &str) -> String {
        format!("{}.{}", quote_identifier(schema), quote_identifier(table))
    }
}

impl Session for SqliteSession {
    fn execute_script(&mut self, sql: &str) -> TempDbResult<()> {
        Ok(self.connection.execute_batch(sql)?)
    }

    fn default_schema(&self) -> &str {
        SQLITE_SCHEMA
    }

    fn ensure_schema(&mut self, schema: &str) -> TempDbResult<()> {
        Self::check_schema(schema)
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> TempDbResult<bool> {
        Self::check_schema(schema)?;
        let count: i64 = self.connection.query_row(
            "SELECT count(*) FROM main.sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn ensure_history_table(&mut self, schema: &str, table: &str) -> TempDbResult<()> {
        Self::check_schema(schema)?;
        let ddl = history_table_ddl(&Self::qualified(schema, table), "INTEGER", "INTEGER");
        self.execute_script(&ddl)
    }

    fn history(&mut self, schema: &str, table: &str) -> TempDbResult<Vec<HistoryRecord>> {
        if !self.table_exists(schema, table)? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT installed_rank, version, description, script, checksum, success \
             FROM {} ORDER BY installed_rank",
            Self::qualified(schema, table)
        );
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map([], |row| {
            Ok(HistoryRecord {
                installed_rank: row.get(0)?,
                version: row.get(1)?,
                description: row.get(2)?,
                script: row.get(3)?,
                checksum: row.get(4)?,
                success: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn insert_history(
        &mut self,
        schema: &str,
        table: &str,
        record: &HistoryRecord,
    ) -> TempDbResult<()> {
        Self::check_schema(schema)?;
        let sql = format!(
            "INSERT INTO {} (installed_rank, version, description, script, checksum, success) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            Self::qualified(schema, table)
        );
        self.connection.execute(
            &sql,
            params![
                record.installed_rank,
                record.version,
                record.description,
                record.script,
                record.checksum,
                record.success
            ],
        )?;
        Ok(())
    }

    fn drop_all_objects(&mut self, schema: &str) -> TempDbResult<usize> {
        Self::check_schema(schema)?;

        let mut objects: Vec<(String, String)> = Vec::new();
        {
            let mut statement = self.connection.prepare(
                "SELECT type, name FROM main.sqlite_master \
                 WHERE name NOT LIKE 'sqlite_%' AND type IN ('view', 'trigger', 'table') \
                 ORDER BY CASE type WHEN 'view' THEN 0 WHEN 'trigger' THEN 1 ELSE 2 END, name",
            )?;
            let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                objects.push(row?);
            }
        }

        let foreign_keys: i64 = self
            .connection
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        self.execute_script("PRAGMA foreign_keys = OFF")?;

        let mut dropped = 0;
        for (kind, name) in &objects {
            let sql = format!("DROP {} IF EXISTS {}", kind.to_uppercase(), quote_identifier(name));
            log::debug!("Cleaning SQLite object: {}", sql);
            self.execute_script(&sql)?;
            dropped += 1;
        }

        if foreign_keys != 0 {
            self.execute_script("PRAGMA foreign_keys = ON")?;
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::database_name;

    fn memory_target() -> (SqliteTarget, Connection) {
        let url = format!("file:{}?mode=memory&cache=shared", database_name("engine"));
        let target = SqliteTarget::new(&url, "sqlite-memory");
        let anchor = target.open().unwrap();
        (target, anchor)
    }

    fn record(rank: i64, version: &str) -> HistoryRecord {
        HistoryRecord {
            installed_rank: rank,
            version: version.to_string(),
            description: "create orders".to_string(),
            script: format!("V{}__create_orders.sql", version),
            checksum: "abc".to_string(),
            success: true,
        }
    }

    #[test]
    fn sessions_share_a_named_memory_database() {
        let (target, _anchor) = memory_target();
        let mut first = target.connect().unwrap();
        first.execute_script("CREATE TABLE orders (id INTEGER)").unwrap();

        let mut second = target.connect().unwrap();
        assert!(second.table_exists("main", "orders").unwrap());
    }

    #[test]
    fn other_schemas_are_rejected() {
        let (target, _anchor) = memory_target();
        let mut session = target.connect().unwrap();
        assert_eq!(session.default_schema(), "main");
        assert!(session.ensure_schema("MAIN").is_ok());

        let err = session.ensure_schema("billing").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn history_roundtrip_keeps_rank_order() {
        let (target, _anchor) = memory_target();
        let mut session = target.connect().unwrap();
        assert!(session.history("main", "history").unwrap().is_empty());

        session.ensure_history_table("main", "history").unwrap();
        session.ensure_history_table("main", "history").unwrap();
        session.insert_history("main", "history", &record(2, "2")).unwrap();
        session.insert_history("main", "history", &record(1, "1")).unwrap();

        let history = session.history("main", "history").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], record(1, "1"));
        assert_eq!(history[1].version, "2");
    }

    #[test]
    fn file_uri_escapes_uri_markers() {
        let uri = file_uri(Path::new("/tmp/a?b#c%d e/orders.db"));
        assert_eq!(uri, "file:/tmp/a%3Fb%23c%25d%20e/orders.db");
        assert_eq!(file_uri(Path::new("C:\\data\\orders.db")), "file:///C:/data/orders.db");
    }

    #[test]
    fn drop_all_objects_counts_tables_views_and_triggers() {
        let (target, anchor) = memory_target();
        let mut session = target.connect().unwrap();
        session
            .execute_script(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE customers (id INTEGER PRIMARY KEY);
                 CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id));
                 CREATE INDEX orders_customer ON orders (customer_id);
                 CREATE VIEW order_count AS SELECT count(*) FROM orders;
                 CREATE TRIGGER orders_audit AFTER INSERT ON orders BEGIN SELECT 1; END;",
            )
            .unwrap();

        // the index goes with its table and is not counted
        assert_eq!(session.drop_all_objects("main").unwrap(), 4);
        assert!(!session.table_exists("main", "orders").unwrap());
        let indexes: i64 = anchor
            .query_row("SELECT count(*) FROM main.sqlite_master WHERE type = 'index'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(indexes, 0);
        assert_eq!(session.drop_all_objects("main").unwrap(), 0);
    }

    #[test]
    fn engine_errors_keep_their_text() {
        let (target, _anchor) = memory_target();
        let mut session = target.connect().unwrap();
        let err = session.execute_script("CREAT TABLE broken (id INTEGER)").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BackendError);
        assert!(err.message().contains("syntax error"), "{}", err.message());
    }

    #[test]
    fn rollback_discards_changes() {
        let (target, _anchor) = memory_target();
        let mut session = target.connect().unwrap();
        session.begin().unwrap();
        session.execute_script("CREATE TABLE scratch (id INTEGER)").unwrap();
        session.rollback().unwrap();
        assert!(!session.table_exists("main", "scratch").unwrap());
    }
}
