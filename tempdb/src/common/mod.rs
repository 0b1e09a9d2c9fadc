//! Shared building blocks used across the crate.
//!
//! - [`AsyncResult`] - single-write, many-reader outcome channel
//! - [`LifecycleEventBus`] - publish/subscribe bus for test and database lifecycle events
//! - constants and small helpers (identifier quoting, name generation, background tasks)

mod async_result;
mod constants;
mod event_bus;
mod util;

pub use async_result::*;
pub use constants::*;
pub use event_bus::*;
pub use util::*;
