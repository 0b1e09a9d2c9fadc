use crate::common::BASELINE_SCRIPT;
use crate::engine::{HistoryRecord, Session};
use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::migration::{MigrationScript, ScriptVersion, ToolConfig};
use std::collections::HashSet;

/// Runs versioned SQL migrations against one session.
///
/// The tool keeps a schema history table inside the target schema. Every
/// script is applied in its own transaction together with its history row, so
/// a failing script leaves neither partial changes nor a history entry behind
/// (on engines with transactional DDL).
///
/// All failures surface as [`ErrorKind::MigrationFailure`] whose message keeps
/// the engine's original text.
pub struct MigrationTool {
    config: ToolConfig,
    session: Box<dyn Session>,
}

impl MigrationTool {
    pub fn new(config: ToolConfig, session: Box<dyn Session>) -> Self {
        MigrationTool { config, session }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Applies pending scripts in version order and returns how many were applied.
    pub fn migrate(&mut self) -> TempDbResult<usize> {
        self.run_migrate().map_err(|e| Self::failure("Migrate", e))
    }

    /// Drops every object of the schema, the history table included.
    ///
    /// Returns the number of dropped objects.
    pub fn clean(&mut self) -> TempDbResult<usize> {
        self.run_clean().map_err(|e| Self::failure("Clean", e))
    }

    /// Records a baseline in an empty history.
    ///
    /// Returns `true` when a baseline row was written and `false` when the same
    /// baseline is already recorded.
    pub fn baseline(&mut self) -> TempDbResult<bool> {
        self.run_baseline().map_err(|e| Self::failure("Baseline", e))
    }

    /// Applied history rows, ordered by installed rank.
    pub fn info(&mut self) -> TempDbResult<Vec<HistoryRecord>> {
        let schema = self.schema();
        let table = self.config.history_table().to_string();
        self.session
            .history(&schema, &table)
            .map_err(|e| Self::failure("Info", e))
    }

    /// Checks resolved scripts against the applied history.
    pub fn validate(&mut self) -> TempDbResult<()> {
        let result = self.resolve_scripts().and_then(|scripts| {
            let schema = self.schema();
            let table = self.config.history_table().to_string();
            let history = self.session.history(&schema, &table)?;
            Self::validate_against(&scripts, &history)
        });
        result.map_err(|e| Self::failure("Validate", e))
    }

    /// Scripts of all locations sorted by version; duplicate versions are rejected.
    pub fn resolve_scripts(&self) -> TempDbResult<Vec<MigrationScript>> {
        let mut scripts = Vec::new();
        for location in self.config.locations() {
            scripts.extend(location.load_scripts()?);
        }
        scripts.sort_by(|a, b| a.version().cmp(b.version()));

        for pair in scripts.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(TempDbError::new(
                    &format!(
                        "Found more than one migration with version {}: {} and {}",
                        pair[0].version(),
                        pair[0].script(),
                        pair[1].script()
                    ),
                    ErrorKind::ValidationError,
                ));
            }
        }
        Ok(scripts)
    }

    fn schema(&self) -> String {
        if self.config.schema().is_empty() {
            self.session.default_schema().to_string()
        } else {
            self.config.schema().to_string()
        }
    }

    fn run_migrate(&mut self) -> TempDbResult<usize> {
        let scripts = self.resolve_scripts()?;
        let schema = self.schema();
        let table = self.config.history_table().to_string();

        self.session.ensure_schema(&schema)?;
        self.session.ensure_history_table(&schema, &table)?;
        let history = self.session.history(&schema, &table)?;

        if let Some(failed) = history.iter().find(|record| !record.success) {
            return Err(TempDbError::new(
                &format!(
                    "Schema {} contains a failed migration to version {}",
                    schema, failed.version
                ),
                ErrorKind::ValidationError,
            ));
        }
        if self.config.validate_on_migrate() {
            Self::validate_against(&scripts, &history)?;
        }

        let applied: HashSet<ScriptVersion> = Self::applied_versions(&history);
        let baseline = Self::baseline_version(&history);
        let current = applied.iter().max().cloned();
        let mut rank = history.iter().map(|r| r.installed_rank).max().unwrap_or(0);

        let mut count = 0;
        for script in &scripts {
            if applied.contains(script.version()) {
                continue;
            }
            if baseline.as_ref().is_some_and(|b| script.version() <= b) {
                log::debug!("Skipping {} at or below the baseline", script.script());
                continue;
            }
            if current.as_ref().is_some_and(|c| script.version() < c) {
                log::warn!(
                    "Skipping {} as it is older than the current version {}",
                    script.script(),
                    current.as_ref().map(|c| c.to_string()).unwrap_or_default()
                );
                continue;
            }

            rank += 1;
            self.apply(&schema, &table, script, rank)?;
            count += 1;
        }

        log::info!(
            "Successfully applied {} migration(s) to schema {}",
            count,
            schema
        );
        Ok(count)
    }

    fn apply(
        &mut self,
        schema: &str,
        table: &str,
        script: &MigrationScript,
        rank: i64,
    ) -> TempDbResult<()> {
        log::debug!(
            "Migrating schema {} to version {} - {}",
            schema,
            script.version(),
            script.description()
        );

        let record = HistoryRecord {
            installed_rank: rank,
            version: script.version().to_string(),
            description: script.description().to_string(),
            script: script.script().to_string(),
            checksum: script.checksum().to_string(),
            success: true,
        };

        self.session
            .begin()
            .map_err(|e| Self::script_failure(script, e))?;

        let mut result = self.session.execute_script(script.sql());
        if result.is_ok() {
            result = self.session.insert_history(schema, table, &record);
        }

        match result {
            Ok(()) => self
                .session
                .commit()
                .map_err(|e| Self::script_failure(script, e)),
            Err(e) => {
                if let Err(rollback) = self.session.rollback() {
                    log::warn!("Rollback after failed migration {} failed: {}", script.script(), rollback);
                }
                Err(Self::script_failure(script, e))
            }
        }
    }

    fn run_clean(&mut self) -> TempDbResult<usize> {
        let schema = self.schema();
        self.session.ensure_schema(&schema)?;
        let dropped = self.session.drop_all_objects(&schema)?;
        log::info!("Cleaned schema {} ({} objects dropped)", schema, dropped);
        Ok(dropped)
    }

    fn run_baseline(&mut self) -> TempDbResult<bool> {
        let schema = self.schema();
        let table = self.config.history_table().to_string();
        self.session.ensure_schema(&schema)?;
        self.session.ensure_history_table(&schema, &table)?;

        let history = self.session.history(&schema, &table)?;
        let wanted = self.config.baseline_version().clone();

        if history.is_empty() {
            let record = HistoryRecord {
                installed_rank: 1,
                version: wanted.to_string(),
                description: self.config.baseline_description().to_string(),
                script: BASELINE_SCRIPT.to_string(),
                checksum: String::new(),
                success: true,
            };
            self.session.insert_history(&schema, &table, &record)?;
            log::info!("Baselined schema {} at version {}", schema, wanted);
            return Ok(true);
        }

        match Self::baseline_version(&history) {
            Some(existing) if existing == wanted => {
                log::debug!("Schema {} is already baselined at version {}", schema, wanted);
                Ok(false)
            }
            Some(existing) => Err(TempDbError::new(
                &format!(
                    "Schema history table {} already contains a baseline with version {}",
                    table, existing
                ),
                ErrorKind::ValidationError,
            )),
            None => Err(TempDbError::new(
                &format!(
                    "Unable to baseline schema history table {} as it already contains migrations",
                    table
                ),
                ErrorKind::ValidationError,
            )),
        }
    }

    fn validate_against(scripts: &[MigrationScript], history: &[HistoryRecord]) -> TempDbResult<()> {
        for record in history.iter().filter(|r| !r.is_baseline()) {
            let version = ScriptVersion::parse(&record.version)?;
            match scripts.iter().find(|s| s.version() == &version) {
                None => {
                    return Err(TempDbError::new(
                        &format!(
                            "Detected applied migration not resolved locally: {}",
                            record.version
                        ),
                        ErrorKind::ValidationError,
                    ))
                }
                Some(script) if script.checksum() != record.checksum => {
                    return Err(TempDbError::new(
                        &format!(
                            "Migration checksum mismatch for migration version {}\n\
                             -> Applied to database : {}\n\
                             -> Resolved locally    : {}",
                            record.version,
                            record.checksum,
                            script.checksum()
                        ),
                        ErrorKind::ValidationError,
                    ))
                }
                Some(_) => {}
            }
        }

        let applied = Self::applied_versions(history);
        let baseline = Self::baseline_version(history);
        if let Some(current) = applied.iter().max() {
            for script in scripts {
                let above_baseline = baseline.as_ref().map_or(true, |b| script.version() > b);
                if !applied.contains(script.version()) && script.version() < current && above_baseline
                {
                    return Err(TempDbError::new(
                        &format!(
                            "Detected resolved migration not applied to database: {}",
                            script.version()
                        ),
                        ErrorKind::ValidationError,
                    ));
                }
            }
        }
        Ok(())
    }

    fn applied_versions(history: &[HistoryRecord]) -> HashSet<ScriptVersion> {
        history
            .iter()
            .filter(|r| !r.is_baseline() && r.success)
            .filter_map(|r| ScriptVersion::parse(&r.version).ok())
            .collect()
    }

    fn baseline_version(history: &[HistoryRecord]) -> Option<ScriptVersion> {
        history
            .iter()
            .filter(|r| r.is_baseline())
            .filter_map(|r| ScriptVersion::parse(&r.version).ok())
            .max()
    }

    fn script_failure(script: &MigrationScript, cause: TempDbError) -> TempDbError {
        TempDbError::new_with_cause(
            &format!("Migration {} failed: {}", script.script(), cause.message()),
            ErrorKind::MigrationFailure,
            cause,
        )
    }

    fn failure(operation: &str, cause: TempDbError) -> TempDbError {
        log::error!("{} failed: {}", operation, cause.message());
        if cause.kind() == &ErrorKind::MigrationFailure {
            return cause;
        }
        TempDbError::new_with_cause(
            &format!("{} failed: {}", operation, cause.message()),
            ErrorKind::MigrationFailure,
            cause,
        )
    }
}
