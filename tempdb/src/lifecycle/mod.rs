//! Test lifecycle events and reclamation of databases when tests finish.

mod event;
mod reaper;

pub use event::*;
pub use reaper::*;
