//! Preparers: database-mutating operations as comparable values.
//!
//! A [`Preparer`] wraps any [`DatabasePreparer`] and derives equality and
//! hashing from its [`PreparerKey`]. Two preparers are equal when replaying
//! them from the same empty database yields the same state; the ordered list
//! of keys of a provisioning request is its [`CacheKey`].
//!
//! Built-in preparers:
//! - [`MigrationPreparer`] - migrate, clean or baseline through a
//!   [`MigrationDescriptor`](crate::migration::MigrationDescriptor)
//! - [`SqlScriptPreparer`] - runs a seed script

mod cache_key;
mod migration;
mod preparer;
mod script;

pub use cache_key::*;
pub use migration::*;
pub use preparer::*;
pub use script::*;
