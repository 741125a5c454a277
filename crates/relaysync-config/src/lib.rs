//! Configuration for relaysync nodes.
//!
//! A node's [`SyncConfig`] is assembled in three layers, each overriding the
//! previous one:
//!
//! 1. Built-in defaults ([`SyncConfig::default`]).
//! 2. A TOML file, either given explicitly or found at
//!    [`SyncConfig::default_config_path`].
//! 3. `RELAYSYNC_*` environment variables.
//!
//! Command-line flags are applied on top by the binary.

pub mod config;
pub mod error;

pub use config::{SyncConfig, AUTO_NODE_ID, ENV_PREFIX};
pub use error::{ConfigError, Result};
