//! Providers allocate isolated databases; the registry picks one per request.
//!
//! Built-in providers run in process:
//! - [`InMemoryProvider`] - SQLite shared-cache in-memory databases
//! - [`TempFileProvider`] - SQLite files in throwaway directories
//!
//! Server-backed providers live in adapter crates and plug in through
//! [`DatabaseProvider`] and [`prepare_database`].

mod memory;
mod provider;
mod registry;
mod temp_file;

pub use memory::*;
pub use provider::*;
pub use registry::*;
pub use temp_file::*;
