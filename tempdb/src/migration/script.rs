use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Version of a migration script, e.g. `1`, `1.2`, `2024.01.15`.
///
/// Segments are compared numerically and trailing zero segments are ignored,
/// so `1.0` and `1` are the same version.
#[derive(Debug, Clone)]
pub struct ScriptVersion {
    segments: Vec<u64>,
}

impl ScriptVersion {
    pub fn new(segments: Vec<u64>) -> ScriptVersion {
        ScriptVersion { segments }
    }

    /// Parses a version made of integers separated by `.` or `_`.
    pub fn parse(text: &str) -> TempDbResult<ScriptVersion> {
        if text.is_empty() {
            return Err(TempDbError::new(
                "Migration version must not be empty",
                ErrorKind::ValidationError,
            ));
        }

        let mut segments = Vec::new();
        for part in text.split(['.', '_']) {
            let segment = part.parse::<u64>().map_err(|_| {
                TempDbError::new(
                    &format!("Invalid migration version '{}'", text),
                    ErrorKind::ValidationError,
                )
            })?;
            segments.push(segment);
        }
        Ok(ScriptVersion { segments })
    }

    fn significant(&self) -> &[u64] {
        let mut len = self.segments.len();
        while len > 1 && self.segments[len - 1] == 0 {
            len -= 1;
        }
        &self.segments[..len]
    }
}

impl PartialEq for ScriptVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for ScriptVersion {}

impl Hash for ScriptVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl PartialOrd for ScriptVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScriptVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.segments, &other.segments);
        for i in 0..a.len().max(b.len()) {
            let left = a.get(i).copied().unwrap_or(0);
            let right = b.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl Display for ScriptVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text: Vec<String> = self.significant().iter().map(|s| s.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

/// A versioned migration script, named `V<version>__<description>.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    version: ScriptVersion,
    description: String,
    script: String,
    sql: String,
    checksum: String,
}

impl MigrationScript {
    /// Builds a script from its file name and content.
    ///
    /// Returns `Ok(None)` for files that are not versioned migrations (no
    /// leading `V` or no `.sql` suffix) and an error for `V*.sql` files whose
    /// name cannot be parsed.
    pub fn from_file_name(file_name: &str, sql: &str) -> TempDbResult<Option<MigrationScript>> {
        let stem = match file_name.strip_suffix(".sql") {
            Some(stem) if stem.starts_with('V') => &stem[1..],
            _ => return Ok(None),
        };

        let (version, description) = stem.split_once("__").ok_or_else(|| {
            log::error!("Wrong migration name format: {}", file_name);
            TempDbError::new(
                &format!(
                    "Wrong migration name format: {} (expected V<version>__<description>.sql)",
                    file_name
                ),
                ErrorKind::ValidationError,
            )
        })?;

        Ok(Some(MigrationScript {
            version: ScriptVersion::parse(version)?,
            description: description.replace('_', " "),
            script: file_name.to_string(),
            sql: sql.to_string(),
            checksum: checksum(sql),
        }))
    }

    pub fn version(&self) -> &ScriptVersion {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// File name of the script.
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// SHA-256 hex digest of a script with line endings normalised to `\n`.
pub fn checksum(sql: &str) -> String {
    let normalized = sql.replace("\r\n", "\n");
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
