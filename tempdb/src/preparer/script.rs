use crate::engine::ConnectionTarget;
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::migration::checksum;
use crate::preparer::{DatabasePreparer, Preparer, PreparerKey};
use std::fs;
use std::path::Path;

/// Runs a plain SQL script, typically to seed data after migrations.
///
/// Identity is the script name plus the checksum of its content. Unlike
/// migrations, the script is not tracked, so running it twice runs it twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlScriptPreparer {
    name: String,
    sql: String,
}

impl SqlScriptPreparer {
    pub fn from_sql(name: &str, sql: &str) -> Self {
        SqlScriptPreparer {
            name: name.to_string(),
            sql: sql.to_string(),
        }
    }

    /// Reads the script from a file; the file name becomes the script name.
    pub fn from_file(path: impl AsRef<Path>) -> TempDbResult<Self> {
        let path = path.as_ref();
        let sql = fs::read_to_string(path).map_err(|e| {
            log::error!("Failed to read seed script {}: {}", path.display(), e);
            TempDbError::new_with_cause(
                &format!("Failed to read seed script {}", path.display()),
                ErrorKind::IOError,
                e.into(),
            )
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_sql(&name, &sql))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl DatabasePreparer for SqlScriptPreparer {
    fn key(&self) -> PreparerKey {
        PreparerKey::new("sql")
            .with("name", &self.name)
            .with("checksum", checksum(&self.sql))
    }

    fn prepare(&self, target: &dyn ConnectionTarget) -> TempDbResult<()> {
        log::debug!("Running seed script {} on {}", self.name, target.url());
        let mut session = target.connect()?;
        session.execute_script(&self.sql).map_err(|e| {
            log::error!("Seed script {} failed: {}", self.name, e);
            TempDbError::new_with_cause(
                &format!("Seed script {} failed: {}", self.name, e.message()),
                ErrorKind::MigrationFailure,
                e,
            )
        })
    }
}

impl From<SqlScriptPreparer> for Preparer {
    fn from(preparer: SqlScriptPreparer) -> Self {
        Preparer::new(preparer)
    }
}
