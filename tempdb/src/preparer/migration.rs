use crate::common::AsyncResult;
use crate::engine::ConnectionTarget;
use crate::errors::TempDbResult;
use crate::migration::MigrationDescriptor;
use crate::preparer::{DatabasePreparer, Preparer, PreparerKey};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Migration tool operation run by a [`MigrationPreparer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MigrationOperation {
    /// Applies pending scripts; the result is the number applied.
    Migrate,
    /// Drops every object of the schema; the result is the number dropped.
    Clean,
    /// Records a baseline; the result is 1 when written, 0 when already present.
    Baseline,
}

impl MigrationOperation {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationOperation::Migrate => "migrate",
            MigrationOperation::Clean => "clean",
            MigrationOperation::Baseline => "baseline",
        }
    }
}

impl Display for MigrationOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Runs one migration tool operation described by a [`MigrationDescriptor`].
///
/// The outcome of the first run is published through [`result`](Self::result).
/// Running the same preparer again (e.g. on a second database) is harmless;
/// the result keeps the first outcome.
///
/// Equality covers the operation and the descriptor only.
#[derive(Debug, Clone)]
pub struct MigrationPreparer {
    operation: MigrationOperation,
    descriptor: MigrationDescriptor,
    result: AsyncResult<usize>,
}

impl MigrationPreparer {
    pub fn new(operation: MigrationOperation, descriptor: MigrationDescriptor) -> Self {
        MigrationPreparer {
            operation,
            descriptor,
            result: AsyncResult::new(),
        }
    }

    pub fn migrate(descriptor: MigrationDescriptor) -> Self {
        Self::new(MigrationOperation::Migrate, descriptor)
    }

    pub fn clean(descriptor: MigrationDescriptor) -> Self {
        Self::new(MigrationOperation::Clean, descriptor)
    }

    pub fn baseline(descriptor: MigrationDescriptor) -> Self {
        Self::new(MigrationOperation::Baseline, descriptor)
    }

    pub fn operation(&self) -> MigrationOperation {
        self.operation
    }

    pub fn descriptor(&self) -> &MigrationDescriptor {
        &self.descriptor
    }

    /// Outcome of the first run of this preparer.
    pub fn result(&self) -> AsyncResult<usize> {
        self.result.clone()
    }

    fn run(&self, target: &dyn ConnectionTarget) -> TempDbResult<usize> {
        let session = target.connect()?;
        let mut tool = self.descriptor.configure(session);
        match self.operation {
            MigrationOperation::Migrate => tool.migrate(),
            MigrationOperation::Clean => tool.clean(),
            MigrationOperation::Baseline => tool.baseline().map(usize::from),
        }
    }
}

impl DatabasePreparer for MigrationPreparer {
    fn key(&self) -> PreparerKey {
        let locations: Vec<String> = self
            .descriptor
            .locations()
            .iter()
            .map(|location| location.identity())
            .collect();

        PreparerKey::new(self.operation.name())
            .with("schema", self.descriptor.schema())
            .with("locations", format!("[{}]", locations.join(", ")))
            .with("validate", self.descriptor.validate_on_migrate())
    }

    fn prepare(&self, target: &dyn ConnectionTarget) -> TempDbResult<()> {
        log::debug!("Running {} on {}", self.operation, target.url());
        let outcome = self.run(target);
        if !self.result.offer(outcome.clone()) {
            log::debug!("{} result already published, keeping the first outcome", self.operation);
        }
        outcome.map(|_| ())
    }
}

impl PartialEq for MigrationPreparer {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation && self.descriptor == other.descriptor
    }
}

impl Eq for MigrationPreparer {}

impl Hash for MigrationPreparer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation.hash(state);
        self.descriptor.hash(state);
    }
}

impl From<MigrationPreparer> for Preparer {
    fn from(preparer: MigrationPreparer) -> Self {
        Preparer::new(preparer)
    }
}
