use postgres::{Client, NoTls};
use tempdb::common::quote_identifier;
use tempdb::engine::{history_table_ddl, ConnectionTarget, HistoryRecord, Session};
use tempdb::errors::{ErrorKind, TempDbError, TempDbResult};

pub const POSTGRES_ENGINE: &str = "postgres";
const DEFAULT_SCHEMA: &str = "public";

/// Connection target for one database on a PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PostgresTarget {
    url: String,
}

impl PostgresTarget {
    pub fn new(url: &str) -> Self {
        PostgresTarget {
            url: url.to_string(),
        }
    }

    /// Opens a raw client.
    pub fn open(&self) -> TempDbResult<Client> {
        Client::connect(&self.url, NoTls).map_err(backend_error)
    }
}

impl ConnectionTarget for PostgresTarget {
    fn url(&self) -> &str {
        &self.url
    }

    fn engine(&self) -> &str {
        POSTGRES_ENGINE
    }

    fn connect(&self) -> TempDbResult<Box<dyn Session>> {
        Ok(Box::new(PostgresSession::new(self.open()?)))
    }
}

/// [`Session`] over a synchronous `postgres` client.
///
/// Schemas are created on demand and [`ensure_schema`](Session::ensure_schema)
/// pins the `search_path` to the target schema, so unqualified names in
/// migration scripts land there.
pub struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    pub fn new(client: Client) -> Self {
        PostgresSession { client }
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    fn qualified(schema: &str, table: &str) -> String {
        format!("{}.{}", quote_identifier(schema), quote_identifier(table))
    }
}

impl Session for PostgresSession {
    fn execute_script(&mut self, sql: &str) -> TempDbResult<()> {
        self.client.batch_execute(sql).map_err(backend_error)
    }

    fn default_schema(&self) -> &str {
        DEFAULT_SCHEMA
    }

    fn ensure_schema(&mut self, schema: &str) -> TempDbResult<()> {
        let schema = quote_identifier(schema);
        self.execute_script(&format!(
            "CREATE SCHEMA IF NOT EXISTS {0}; SET search_path TO {0}",
            schema
        ))
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> TempDbResult<bool> {
        let row = self
            .client
            .query_one(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&schema, &table],
            )
            .map_err(backend_error)?;
        Ok(row.get::<_, i64>(0) > 0)
    }

    fn ensure_history_table(&mut self, schema: &str, table: &str) -> TempDbResult<()> {
        let ddl = history_table_ddl(&Self::qualified(schema, table), "BIGINT", "BOOLEAN");
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
        let rows = self.client.query(sql.as_str(), &[]).map_err(backend_error)?;
        Ok(rows
            .iter()
            .map(|row| HistoryRecord {
                installed_rank: row.get(0),
                version: row.get(1),
                description: row.get(2),
                script: row.get(3),
                checksum: row.get(4),
                success: row.get(5),
            })
            .collect())
    }

    fn insert_history(
        &mut self,
        schema: &str,
        table: &str,
        record: &HistoryRecord,
    ) -> TempDbResult<()> {
        let sql = format!(
            "INSERT INTO {} (installed_rank, version, description, script, checksum, success) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            Self::qualified(schema, table)
        );
        self.client
            .execute(
                sql.as_str(),
                &[
                    &record.installed_rank,
                    &record.version,
                    &record.description,
                    &record.script,
                    &record.checksum,
                    &record.success,
                ],
            )
            .map_err(backend_error)?;
        Ok(())
    }

    fn drop_all_objects(&mut self, schema: &str) -> TempDbResult<usize> {
        let row = self
            .client
            .query_one(
                "SELECT \
                   (SELECT count(*) FROM information_schema.tables WHERE table_schema = $1) + \
                   (SELECT count(*) FROM information_schema.sequences WHERE sequence_schema = $1) + \
                   (SELECT count(*) FROM information_schema.routines WHERE routine_schema = $1)",
                &[&schema],
            )
            .map_err(backend_error)?;
        let objects: i64 = row.get(0);

        let quoted = quote_identifier(schema);
        log::debug!("Cleaning PostgreSQL schema {} ({} objects)", schema, objects);
        self.execute_script(&format!(
            "DROP SCHEMA IF EXISTS {0} CASCADE; CREATE SCHEMA {0}; SET search_path TO {0}",
            quoted
        ))?;
        Ok(objects.max(0) as usize)
    }
}

/// Maps a client error, keeping the server's text.
pub fn backend_error(e: postgres::Error) -> TempDbError {
    TempDbError::new(&e.to_string(), ErrorKind::BackendError)
}
