#![allow(clippy::module_inception)]
//! # tempdb - throwaway databases for tests
//!
//! tempdb provisions isolated, fully migrated databases for automated tests
//! and reclaims them once a test is done.
//!
//! ## Key Features
//!
//! - **Preparers as values**: migrate, clean, baseline and seed operations
//!   compare by what they do, so a provisioning request has a stable
//!   [`CacheKey`](preparer::CacheKey)
//! - **Pluggable providers**: SQLite in-memory and temp-file databases built
//!   in, server-backed engines through adapter crates
//! - **Explicit registry**: `(database, provider type)` resolution with
//!   diagnostics listing what is registered
//! - **Release exactly once**: databases tear down their resources once, also
//!   under concurrent or repeated release
//! - **Lifecycle events**: provisioned/released notifications and a reaper that
//!   releases a test's databases when the test finishes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tempdb::migration::{Location, MigrationDescriptor};
//! use tempdb::provider::{InMemoryProvider, ProviderRegistry};
//!
//! let registry = ProviderRegistry::builder()
//!     .register("orders", "memory", InMemoryProvider::new().into())
//!     .build()?;
//!
//! let descriptor = MigrationDescriptor::new("main", vec![Location::filesystem("db/migration")]);
//! let migrate = descriptor.migrate();
//! let applied = migrate.result();
//!
//! let database = registry
//!     .resolve("orders", "memory")?
//!     .provide_database(&[migrate.into()])?;
//! println!("{} scripts applied, url {}", applied.wait()?, database.url());
//!
//! database.release()?;
//! ```
//!
//! ## Module Organization
//!
//! - [`common`] - async result, event bus, constants and helpers
//! - [`config`] - declarative configuration and provider factories
//! - [`database`] - the provisioned database handle
//! - [`engine`] - connection targets and sessions
//! - [`errors`] - error types and result definitions
//! - [`lifecycle`] - lifecycle events, reaper and test scopes
//! - [`migration`] - descriptors, locations and the migration tool
//! - [`preparer`] - preparers and cache keys
//! - [`provider`] - providers and the registry

pub mod common;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod migration;
pub mod preparer;
pub mod provider;
