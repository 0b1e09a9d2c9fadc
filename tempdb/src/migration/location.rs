use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::migration::{checksum, MigrationScript};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const FILESYSTEM_PREFIX: &str = "filesystem:";

/// Where migration scripts are read from.
///
/// Equality is structural: two filesystem locations are equal when their paths
/// are equal, two inline locations when their names and scripts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// A directory scanned recursively for `V<version>__<description>.sql` files.
    Filesystem(PathBuf),
    /// Scripts embedded in code, as `(file name, sql)` pairs.
    Inline {
        name: String,
        scripts: Vec<(String, String)>,
    },
}

impl Location {
    pub fn filesystem(path: impl AsRef<Path>) -> Location {
        Location::Filesystem(path.as_ref().to_path_buf())
    }

    pub fn inline(name: &str, scripts: &[(&str, &str)]) -> Location {
        Location::Inline {
            name: name.to_string(),
            scripts: scripts
                .iter()
                .map(|(file, sql)| (file.to_string(), sql.to_string()))
                .collect(),
        }
    }

    /// Parses the string form of a location: `filesystem:<path>` or a bare path.
    pub fn parse(text: &str) -> TempDbResult<Location> {
        let path = text.strip_prefix(FILESYSTEM_PREFIX).unwrap_or(text).trim();
        if path.is_empty() {
            log::error!("Empty migration location '{}'", text);
            return Err(TempDbError::new(
                &format!("Invalid migration location '{}'", text),
                ErrorKind::InvalidConfiguration,
            ));
        }
        if let Some((scheme, _)) = path.split_once(':') {
            // single letters are drive prefixes, not schemes
            if scheme.len() > 1 && !path.starts_with('/') {
                return Err(TempDbError::new(
                    &format!("Unsupported migration location scheme '{}'", scheme),
                    ErrorKind::InvalidConfiguration,
                ));
            }
        }
        Ok(Location::filesystem(path))
    }

    /// Stable text identifying the location and, for inline scripts, their content.
    pub fn identity(&self) -> String {
        match self {
            Location::Filesystem(_) => self.to_string(),
            Location::Inline { name, scripts } => {
                let content: Vec<String> = scripts
                    .iter()
                    .map(|(file, sql)| format!("{}\n{}", file, sql))
                    .collect();
                format!("inline:{}@{}", name, checksum(&content.join("\n")))
            }
        }
    }

    /// Loads the versioned scripts of this location.
    ///
    /// A missing directory is logged and yields no scripts.
    pub fn load_scripts(&self) -> TempDbResult<Vec<MigrationScript>> {
        match self {
            Location::Filesystem(path) => {
                if !path.is_dir() {
                    log::warn!("Migration location {} does not exist, skipping", self);
                    return Ok(Vec::new());
                }
                let mut scripts = Vec::new();
                collect_scripts(path, &mut scripts)?;
                Ok(scripts)
            }
            Location::Inline { scripts, .. } => {
                let mut loaded = Vec::new();
                for (file_name, sql) in scripts {
                    if let Some(script) = MigrationScript::from_file_name(file_name, sql)? {
                        loaded.push(script);
                    }
                }
                Ok(loaded)
            }
        }
    }
}

fn collect_scripts(dir: &Path, scripts: &mut Vec<MigrationScript>) -> TempDbResult<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        entries.push(entry?.path());
    }
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_scripts(&path, scripts)?;
            continue;
        }
        let file_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !file_name.ends_with(".sql") {
            log::debug!("Ignoring non-script file {}", path.display());
            continue;
        }
        let sql = fs::read_to_string(&path)?;
        if let Some(script) = MigrationScript::from_file_name(&file_name, &sql)? {
            scripts.push(script);
        }
    }
    Ok(())
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Filesystem(path) => write!(f, "{}{}", FILESYSTEM_PREFIX, path.display()),
            Location::Inline { name, .. } => write!(f, "inline:{}", name),
        }
    }
}
