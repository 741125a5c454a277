//! Point-in-time replication status for operators.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hostname::get as get_hostname;
use serde::Serialize;

use crate::importer::{ChangeImporter, PollReport};
use crate::node::NodeIdentity;
use crate::snapshot::{BootstrapGate, BootstrapState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub node_id: String,
    pub node_id_source: &'static str,
    pub degraded: bool,
    pub hostname: String,
    pub app_name: String,
    pub folder: PathBuf,
    pub bootstrap: BootstrapState,
    pub import_enabled: bool,
    pub processed_files: usize,
    /// `None` when the folder could not be listed.
    pub pending_files: Option<usize>,
    pub last_poll: Option<PollReport>,
    pub collected_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn collect(
        identity: &NodeIdentity,
        app_name: &str,
        importer: &ChangeImporter,
        gate: &BootstrapGate,
        import_enabled: bool,
    ) -> Self {
        Self {
            node_id: identity.id().to_string(),
            node_id_source: identity.source().as_str(),
            degraded: identity.is_degraded(),
            hostname: local_hostname(),
            app_name: app_name.to_string(),
            folder: importer.folder().to_path_buf(),
            bootstrap: gate.state(),
            import_enabled,
            processed_files: importer.processed_count(),
            pending_files: importer.pending_files().ok(),
            last_poll: importer.last_report(),
            collected_at: Utc::now(),
        }
    }

    /// One-line health summary.
    pub fn message(&self) -> String {
        if self.degraded {
            return "degraded: node id is not persisted".to_string();
        }
        match (self.bootstrap, self.pending_files) {
            (BootstrapState::NotStarted, _) => "waiting for snapshot bootstrap".to_string(),
            (_, None) => "sync folder unavailable".to_string(),
            (_, Some(0)) => "up to date".to_string(),
            (_, Some(n)) => format!("{} event files pending", n),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node:        {} ({})", self.node_id, self.node_id_source)?;
        writeln!(f, "Host:        {}", self.hostname)?;
        writeln!(f, "Application: {}", self.app_name)?;
        writeln!(f, "Folder:      {}", self.folder.display())?;
        writeln!(f, "Bootstrap:   {:?}", self.bootstrap)?;
        writeln!(f, "Import:      {}", if self.import_enabled { "enabled" } else { "disabled" })?;
        writeln!(f, "Processed:   {}", self.processed_files)?;
        match self.pending_files {
            Some(n) => writeln!(f, "Pending:     {}", n)?,
            None => writeln!(f, "Pending:     unknown")?,
        }
        if let Some(poll) = &self.last_poll {
            writeln!(
                f,
                "Last poll:   {} applied, {} failed, {} purged",
                poll.applied, poll.failed, poll.purged
            )?;
        }
        write!(f, "Status:      {}", self.message())
    }
}

fn local_hostname() -> String {
    get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
