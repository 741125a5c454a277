//! Node identity.
//!
//! All services on one host share a single identity file. The first process
//! to need an id creates the file with `create_new`; a process that loses
//! that race reads the winner's id instead. When the file cannot be read or
//! written the node runs with an ephemeral id and reports itself degraded.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

const NODE_PREFIX: &str = "NODE_";
const FALLBACK_PREFIX: &str = "FALLBACK_";
const RACE_REREAD_ATTEMPTS: u32 = 5;
const RACE_REREAD_DELAY: Duration = Duration::from_millis(20);

/// Where a node id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Set explicitly in configuration.
    Configured,
    /// Read from the shared identity file.
    Persisted,
    /// Generated by this process and written to the identity file.
    Generated,
    /// Process-local, never persisted.
    Ephemeral,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Configured => "configured",
            IdentitySource::Persisted => "persisted",
            IdentitySource::Generated => "generated",
            IdentitySource::Ephemeral => "ephemeral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    id: String,
    source: IdentitySource,
    file: Option<PathBuf>,
}

impl NodeIdentity {
    /// Resolve the identity of this node.
    ///
    /// A configured id wins; otherwise the shared identity file is read or
    /// created. Never fails.
    pub fn resolve(configured: Option<&str>, identity_file: &Path) -> Self {
        if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
            info!("Using configured node id {}", id);
            return Self {
                id: id.to_string(),
                source: IdentitySource::Configured,
                file: None,
            };
        }

        match read_or_create(identity_file) {
            Ok((id, source)) => {
                info!(
                    "Node id {} ({}) from {}",
                    id,
                    source.as_str(),
                    identity_file.display()
                );
                Self {
                    id,
                    source,
                    file: Some(identity_file.to_path_buf()),
                }
            }
            Err(e) => {
                let id = ephemeral_node_id();
                warn!(
                    "Could not persist node id at {}: {}. Running degraded with ephemeral id {}",
                    identity_file.display(),
                    e,
                    id
                );
                Self {
                    id,
                    source: IdentitySource::Ephemeral,
                    file: None,
                }
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// Identity file backing this id, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Whether this id will change on the next restart.
    pub fn is_degraded(&self) -> bool {
        self.source == IdentitySource::Ephemeral
    }
}

/// A fresh id of the form `NODE_` followed by 8 upper-case hex digits.
pub fn generate_node_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", NODE_PREFIX, hex[..8].to_uppercase())
}

fn ephemeral_node_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", FALLBACK_PREFIX, &hex[..8])
}

fn read_existing(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = contents.trim();
            Ok((!id.is_empty()).then(|| id.to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_or_create(path: &Path) -> io::Result<(String, IdentitySource)> {
    if let Some(id) = read_existing(path)? {
        return Ok((id, IdentitySource::Persisted));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let id = generate_node_id();
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(id.as_bytes())?;
            file.sync_all()?;
            Ok((id, IdentitySource::Generated))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // Lost the race; the winner may still be writing.
            for _ in 0..RACE_REREAD_ATTEMPTS {
                if let Some(winner) = read_existing(path)? {
                    return Ok((winner, IdentitySource::Persisted));
                }
                thread::sleep(RACE_REREAD_DELAY);
            }
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "identity file exists but is empty",
            ))
        }
        Err(e) => Err(e),
    }
}
