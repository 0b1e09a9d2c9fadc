//! Engine seam between the migration tool and a concrete database.
//!
//! A [`ConnectionTarget`] is "something that yields a usable connection"; every
//! provisioned database exposes one. A [`Session`] is one open connection with
//! the handful of operations the migration tool and preparers need. Engines
//! implement both: SQLite lives here, server-backed engines live in adapter
//! crates.

mod session;
mod sqlite;

pub use session::*;
pub use sqlite::*;
