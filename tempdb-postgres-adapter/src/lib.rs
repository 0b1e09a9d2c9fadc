//! PostgreSQL provider for tempdb.
//!
//! [`PostgresProvider`] runs one PostgreSQL server per provider, either a
//! `postgres` container managed through testcontainers or an external server,
//! and creates a fresh database for every request. Sessions use the
//! synchronous `postgres` client.

mod config;
mod provider;
mod server;
mod session;

pub use config::*;
pub use provider::*;
pub use session::*;
