//! Versioned SQL migrations.
//!
//! A [`MigrationDescriptor`] names what to migrate (schema, [`Location`]s,
//! validation). It is turned into a [`ToolConfig`] by a
//! [`MigrationToolConfigBuilder`], one per configuration API generation, and
//! executed by the [`MigrationTool`] against a [`Session`](crate::engine::Session).
//!
//! Scripts are named `V<version>__<description>.sql`. Applied scripts are
//! recorded with their SHA-256 checksum in a schema history table so that
//! re-running a migration only applies what is pending.

mod builder;
mod config;
mod descriptor;
mod location;
mod script;
mod tool;

pub use builder::*;
pub use config::*;
pub use descriptor::*;
pub use location::*;
pub use script::*;
pub use tool::*;
