//! Scriptwatch Core - Types, configuration, snapshots, and error handling

pub mod config;
pub mod error;
pub mod snapshot;
pub mod types;
pub mod normalize;

pub use config::{ConfigStore, JsonConfigStore, MemoryConfigStore};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
pub use types::*;
pub use normalize::normalize_url;
