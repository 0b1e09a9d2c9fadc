use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use crate::provider::Provider;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// What happens when a `(database, provider type)` pair is registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// Registration fails with [`ErrorKind::DuplicateProvider`].
    #[default]
    Reject,
    /// The later registration wins.
    Replace,
}

impl FromStr for RegistrationPolicy {
    type Err = TempDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(RegistrationPolicy::Reject),
            "replace" => Ok(RegistrationPolicy::Replace),
            other => Err(TempDbError::new(
                &format!("Unknown registration policy '{}'", other),
                ErrorKind::InvalidConfiguration,
            )),
        }
    }
}

/// Registry key: logical database name plus provider type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId {
    database_name: String,
    provider_type: String,
}

impl ProviderId {
    pub fn new(database_name: &str, provider_type: &str) -> Self {
        ProviderId {
            database_name: database_name.to_string(),
            provider_type: provider_type.to_string(),
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.database_name, self.provider_type)
    }
}

/// Resolves `(database name, provider type)` to a [`Provider`].
///
/// Built once through [`ProviderRegistry::builder`] and immutable afterwards;
/// clones share the same map and can be read from any thread without locking.
/// Resolution is an exact match on both parts. The registry never creates or
/// releases databases itself.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = ProviderRegistry::builder()
///     .register("orders", "memory", InMemoryProvider::new().into())
///     .register("orders", "file", TempFileProvider::new().into())
///     .build()?;
///
/// let provider = registry.resolve("orders", "memory")?;
/// let database = provider.provide_database(&[descriptor.migrate().into()])?;
/// ```
#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<HashMap<ProviderId, Provider>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Returns the provider registered for the pair.
    ///
    /// Fails with [`ErrorKind::MissingProvider`], naming the request and every
    /// registered provider type in sorted order.
    pub fn resolve(&self, database_name: &str, provider_type: &str) -> TempDbResult<Provider> {
        let id = ProviderId::new(database_name, provider_type);
        match self.inner.get(&id) {
            Some(provider) => Ok(provider.clone()),
            None => {
                let message = format!(
                    "No provider registered for database '{}' with type '{}'; available provider types: {:?}",
                    database_name,
                    provider_type,
                    self.provider_types()
                );
                log::error!("{}", message);
                Err(TempDbError::new(&message, ErrorKind::MissingProvider))
            }
        }
    }

    pub fn contains(&self, database_name: &str, provider_type: &str) -> bool {
        self.inner
            .contains_key(&ProviderId::new(database_name, provider_type))
    }

    /// Every registered provider type, sorted and deduplicated.
    pub fn provider_types(&self) -> Vec<String> {
        self.inner
            .keys()
            .map(|id| id.provider_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every registered pair, sorted.
    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.inner.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Closes every distinct provider once, even if registered under several
    /// pairs. All providers are closed; the first error is returned.
    pub fn close(&self) -> TempDbResult<()> {
        let mut closed: Vec<&Provider> = Vec::new();
        let mut first_error = None;
        for id in self.ids() {
            let provider = match self.inner.get(&id) {
                Some(provider) => provider,
                None => continue,
            };
            if closed.iter().any(|p| p.ptr_eq(provider)) {
                continue;
            }
            closed.push(provider);
            if let Err(e) = provider.close() {
                log::warn!("Failed to close provider {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.ids().iter().map(|id| id.to_string()))
            .finish()
    }
}

/// Collects registrations; duplicates are resolved by the
/// [`RegistrationPolicy`] when [`build`](Self::build) is called.
pub struct ProviderRegistryBuilder {
    policy: RegistrationPolicy,
    entries: Vec<(ProviderId, Provider)>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        ProviderRegistryBuilder {
            policy: RegistrationPolicy::default(),
            entries: Vec::new(),
        }
    }

    pub fn policy(mut self, policy: RegistrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn register(mut self, database_name: &str, provider_type: &str, provider: Provider) -> Self {
        self.entries
            .push((ProviderId::new(database_name, provider_type), provider));
        self
    }

    pub fn build(self) -> TempDbResult<ProviderRegistry> {
        let mut providers: HashMap<ProviderId, Provider> = HashMap::new();
        for (id, provider) in self.entries {
            if providers.contains_key(&id) {
                match self.policy {
                    RegistrationPolicy::Reject => {
                        log::error!("Provider {} registered twice", id);
                        return Err(TempDbError::new(
                            &format!("A provider is already registered for {}", id),
                            ErrorKind::DuplicateProvider,
                        ));
                    }
                    RegistrationPolicy::Replace => {
                        log::debug!("Replacing provider {}", id);
                    }
                }
            }
            providers.insert(id, provider);
        }
        Ok(ProviderRegistry {
            inner: Arc::new(providers),
        })
    }
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
