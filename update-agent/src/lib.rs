#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

pub mod bootstrap;
pub mod client;
pub mod fetcher;
pub mod guard;
pub mod logging;
pub mod manager;
pub mod retention;
mod settings;
pub mod store;

pub use manager::{CheckCycle, UpdateManager};
pub use settings::{Args, Command, Settings};

/// Milliseconds since the unix epoch. Extraction directory names and
/// rollback history timestamps both use this clock.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
