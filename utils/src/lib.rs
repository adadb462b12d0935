//! Shared utilities for the Ember workspace.

mod logging;
mod time;

pub use logging::{init_tracing, init_tracing_with_default};
pub use time::unix_now_millis;
