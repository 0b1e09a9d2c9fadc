use crate::preparer::{Preparer, PreparerKey};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// Identity of a provisioning request: the ordered preparer keys.
///
/// Two requests with equal cache keys produce databases in the same state, so
/// a pooling layer may hand out either. Order is significant: `clean` then
/// `migrate` is a different request from `migrate` then `clean`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    preparers: Vec<PreparerKey>,
}

impl CacheKey {
    pub fn of(preparers: &[Preparer]) -> Self {
        CacheKey {
            preparers: preparers.iter().map(|p| p.key()).collect(),
        }
    }

    pub fn preparers(&self) -> &[PreparerKey] {
        &self.preparers
    }

    pub fn len(&self) -> usize {
        self.preparers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preparers.is_empty()
    }

    /// SHA-256 hex digest of the key, stable across processes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for key in &self.preparers {
            hasher.update(key.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, key) in self.preparers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", key)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Location, MigrationDescriptor};
    use std::collections::HashMap;

    fn descriptor() -> MigrationDescriptor {
        MigrationDescriptor::new("main", vec![Location::filesystem("db/migration")])
    }

    #[test]
    fn equal_requests_have_equal_keys() {
        let a = CacheKey::of(&[descriptor().migrate().into()]);
        let b = CacheKey::of(&[descriptor().migrate().into()]);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn order_matters() {
        let d = descriptor();
        let clean_then_migrate = CacheKey::of(&[d.clean().into(), d.migrate().into()]);
        let migrate_then_clean = CacheKey::of(&[d.migrate().into(), d.clean().into()]);
        assert_ne!(clean_then_migrate, migrate_then_clean);
        assert_ne!(clean_then_migrate.fingerprint(), migrate_then_clean.fingerprint());
    }

    #[test]
    fn usable_as_map_key() {
        let mut pool: HashMap<CacheKey, &str> = HashMap::new();
        pool.insert(CacheKey::of(&[descriptor().migrate().into()]), "db1");
        assert_eq!(
            pool.get(&CacheKey::of(&[descriptor().migrate().into()])),
            Some(&"db1")
        );
    }

    #[test]
    fn empty_key() {
        let key = CacheKey::of(&[]);
        assert!(key.is_empty());
        assert_eq!(key.to_string(), "[]");
        assert_eq!(key.fingerprint().len(), 64);
    }
}
