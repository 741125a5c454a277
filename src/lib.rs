//! Shared-folder replication for independently deployed services.
//!
//! Facade over the workspace crates; see [`sync`] for the replication loop
//! and [`entities`] for the replicated records.

pub use relaysync_config::{self as config, ConfigError, SyncConfig};
pub use relaysync_core::{self as sync, *};
pub use relaysync_entities::{self as entities, EntityStores, MemoryStore};
