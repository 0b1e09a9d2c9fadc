use crate::engine::ConnectionTarget;
use crate::errors::TempDbResult;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// An operation that brings a database into a known state.
///
/// Implementations must be immutable once constructed and safe to share
/// between threads. [`key`](DatabasePreparer::key) must capture every input
/// that influences the resulting state and nothing else.
pub trait DatabasePreparer: Send + Sync {
    /// Identity of the operation.
    fn key(&self) -> PreparerKey;

    /// Applies the operation to the database behind `target`.
    fn prepare(&self, target: &dyn ConnectionTarget) -> TempDbResult<()>;
}

/// Identity of a preparer: an operation kind plus its replay parameters.
///
/// Attributes are kept sorted by name so that the key does not depend on the
/// order in which they were added.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreparerKey {
    kind: String,
    attributes: BTreeMap<String, String>,
}

impl PreparerKey {
    pub fn new(kind: &str) -> Self {
        PreparerKey {
            kind: kind.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|v| v.as_str())
    }
}

impl Display for PreparerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.kind)?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Shareable handle to a [`DatabasePreparer`].
///
/// Equality and hashing go through [`PreparerKey`], so preparers can be used
/// as map keys and compared across threads.
///
/// ```rust,ignore
/// let descriptor = MigrationDescriptor::new("main", vec![Location::filesystem("db/migration")]);
/// let migrate: Preparer = descriptor.migrate().into();
/// let seed = Preparer::new(SqlScriptPreparer::from_sql("seed", "INSERT INTO orders VALUES (1);"));
/// let database = provider.provide_database(&[migrate, seed])?;
/// ```
#[derive(Clone)]
pub struct Preparer {
    inner: Arc<dyn DatabasePreparer>,
}

impl Preparer {
    pub fn new<T: DatabasePreparer + 'static>(inner: T) -> Self {
        Preparer {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for Preparer {
    type Target = Arc<dyn DatabasePreparer>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl PartialEq for Preparer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.key() == other.inner.key()
    }
}

impl Eq for Preparer {}

impl Hash for Preparer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key().hash(state);
    }
}

impl Debug for Preparer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Preparer({})", self.inner.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Fixed(&'static str);

    impl DatabasePreparer for Fixed {
        fn key(&self) -> PreparerKey {
            PreparerKey::new("fixed").with("value", self.0)
        }

        fn prepare(&self, _target: &dyn ConnectionTarget) -> TempDbResult<()> {
            Ok(())
        }
    }

    #[test]
    fn key_attributes_are_order_independent() {
        let a = PreparerKey::new("migrate").with("schema", "main").with("validate", true);
        let b = PreparerKey::new("migrate").with("validate", true).with("schema", "main");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "migrate{schema=main, validate=true}");
        assert_eq!(a.attribute("schema"), Some("main"));
        assert_eq!(a.attribute("missing"), None);
    }

    #[test]
    fn preparers_compare_by_key() {
        let a = Preparer::new(Fixed("x"));
        let b = Preparer::new(Fixed("x"));
        let c = Preparer::new(Fixed("y"));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Preparer> = vec![a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn debug_shows_key() {
        let preparer = Preparer::new(Fixed("x"));
        assert_eq!(format!("{:?}", preparer), "Preparer(fixed{value=x})");
    }
}
