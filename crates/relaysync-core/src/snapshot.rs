//! Snapshot bootstrap.
//!
//! A full snapshot is one JSON object mapping entity type names to that
//! type's records, written as `snapshot_full_{app}_{node}.json`. At startup
//! a node imports the best peer snapshot once and then opens the
//! [`BootstrapGate`], which the importer checks before every poll. The gate
//! opens even when the import fails.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::adapter::AdapterRegistry;
use crate::context::OperationContext;
use crate::error::{Result, SyncError};
use crate::event::Snapshot;
use crate::exporter::write_atomically;
use crate::naming::{
    is_snapshot_file, ledger_node_id, snapshot_file_name, snapshot_is_from_app, snapshot_owner,
    EventFileName,
};
use crate::resolver::{upsert, Applied, ResolveOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootstrapState {
    NotStarted,
    Completed,
}

/// One-shot gate between snapshot bootstrap and incremental import.
#[derive(Debug, Default)]
pub struct BootstrapGate {
    completed: AtomicBool,
}

impl BootstrapGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn mark_completed(&self) {
        if !self.completed.swap(true, Ordering::AcqRel) {
            info!("Snapshot bootstrap completed, incremental import enabled");
        }
    }

    pub fn state(&self) -> BootstrapState {
        if self.is_completed() {
            BootstrapState::Completed
        } else {
            BootstrapState::NotStarted
        }
    }
}

/// A snapshot file found in the shared folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCandidate {
    pub file_name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Pick the snapshot to bootstrap from.
///
/// The newest snapshot of the same application from another node wins;
/// failing that, the newest snapshot of any application from another node.
/// This node's own snapshots are never chosen. `peer_nodes` are the node ids
/// seen in the folder; they split snapshot names into application and node
/// exactly. A name that matches no known node falls back to a prefix check
/// on the application and counts as foreign.
pub fn select_snapshot<'a>(
    candidates: &'a [SnapshotCandidate],
    app_name: &str,
    node_id: &str,
    peer_nodes: &[&str],
) -> Option<&'a SnapshotCandidate> {
    let classify = |candidate: &SnapshotCandidate| {
        let known = peer_nodes.iter().copied().chain(std::iter::once(node_id));
        match snapshot_owner(&candidate.file_name, known) {
            Some(owner) => (owner.node_id == node_id, owner.app_name == app_name),
            None => (false, snapshot_is_from_app(&candidate.file_name, app_name)),
        }
    };
    let newest = |same_app: bool| {
        candidates
            .iter()
            .filter(|c| {
                let (own, from_app) = classify(*c);
                !own && (!same_app || from_app)
            })
            .max_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| a.file_name.cmp(&b.file_name))
            })
    };
    newest(true).or_else(|| newest(false))
}

/// How a bootstrap attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ImportOutcome {
    AlreadyCompleted,
    Disabled,
    NoSnapshots,
    OnlyOwnSnapshots,
    Imported(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotImportReport {
    pub outcome: ImportOutcome,
    pub inserted: usize,
    pub merged: usize,
    pub failed: usize,
    pub skipped_types: Vec<String>,
}

impl SnapshotImportReport {
    fn new(outcome: ImportOutcome) -> Self {
        Self {
            outcome,
            inserted: 0,
            merged: 0,
            failed: 0,
            skipped_types: Vec::new(),
        }
    }

    pub fn applied(&self) -> usize {
        self.inserted + self.merged
    }
}

pub struct SnapshotBootstrap {
    folder: PathBuf,
    app_name: String,
    node_id: String,
    import_enabled: bool,
    registry: Arc<AdapterRegistry>,
    gate: Arc<BootstrapGate>,
}

impl SnapshotBootstrap {
    pub fn new(
        folder: impl Into<PathBuf>,
        app_name: impl Into<String>,
        node_id: impl Into<String>,
        registry: Arc<AdapterRegistry>,
        gate: Arc<BootstrapGate>,
    ) -> Self {
        Self {
            folder: folder.into(),
            app_name: app_name.into(),
            node_id: node_id.into(),
            import_enabled: true,
            registry,
            gate,
        }
    }

    /// When disabled, [`import_if_needed`](Self::import_if_needed) opens the gate without importing.
    pub fn with_import_enabled(mut self, enabled: bool) -> Self {
        self.import_enabled = enabled;
        self
    }

    pub fn gate(&self) -> &Arc<BootstrapGate> {
        &self.gate
    }

    pub fn is_completed(&self) -> bool {
        self.gate.is_completed()
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.folder
            .join(snapshot_file_name(&self.app_name, &self.node_id))
    }

    /// Dump every registered entity type into this node's snapshot file,
    /// replacing any previous one.
    pub fn export_full_snapshot(&self) -> Result<PathBuf> {
        let mut snapshot = Snapshot::new();
        for adapter in self.registry.iter() {
            let records = adapter.find_all_wire()?;
            debug!("Snapshot: {} {} records", records.len(), adapter.type_name());
            snapshot.insert(adapter.type_name().to_string(), records);
        }

        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SyncError::json("snapshot", e))?;
        let name = snapshot_file_name(&self.app_name, &self.node_id);
        let path = write_atomically(&self.folder, &name, &body)?;
        info!(
            "Exported full snapshot ({} types) to {}",
            snapshot.len(),
            path.display()
        );
        Ok(path)
    }

    /// Run the startup import once, then open the gate whatever happened.
    pub fn import_if_needed(&self) -> SnapshotImportReport {
        if self.gate.is_completed() {
            return SnapshotImportReport::new(ImportOutcome::AlreadyCompleted);
        }
        if !self.import_enabled {
            info!("Snapshot import disabled, skipping bootstrap");
            self.gate.mark_completed();
            return SnapshotImportReport::new(ImportOutcome::Disabled);
        }

        let report = match self.import_latest() {
            Ok(report) => report,
            Err(e) => {
                error!("Snapshot bootstrap failed: {}", e);
                SnapshotImportReport::new(ImportOutcome::Failed(e.to_string()))
            }
        };
        self.gate.mark_completed();
        report
    }

    /// Import the preferred peer snapshot now, regardless of the gate.
    pub fn import_latest(&self) -> Result<SnapshotImportReport> {
        let candidates = self.list_snapshots()?;
        if candidates.is_empty() {
            info!("No snapshots in {}, nothing to bootstrap", self.folder.display());
            return Ok(SnapshotImportReport::new(ImportOutcome::NoSnapshots));
        }

        let peers = self.peer_node_ids()?;
        let peers: Vec<&str> = peers.iter().map(String::as_str).collect();
        match select_snapshot(&candidates, &self.app_name, &self.node_id, &peers) {
            Some(chosen) => self.import_from(&chosen.path),
            None => {
                info!("Only this node's own snapshots are present, skipping import");
                Ok(SnapshotImportReport::new(ImportOutcome::OnlyOwnSnapshots))
            }
        }
    }

    /// Import every record of the snapshot at `path`.
    ///
    /// A record that fails is logged and counted; the rest still apply.
    pub fn import_from(&self, path: &Path) -> Result<SnapshotImportReport> {
        let raw = fs::read(path).map_err(|e| SyncError::io(path, e))?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::json(path.display().to_string(), e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Importing snapshot {}", file_name);

        let mut report = SnapshotImportReport::new(ImportOutcome::Imported(file_name));
        for (entity_type, records) in &snapshot {
            let Some(adapter) = self.registry.get(entity_type) else {
                warn!("Snapshot contains unknown entity type {}, skipping", entity_type);
                report.skipped_types.push(entity_type.clone());
                continue;
            };

            for record in records {
                let ctx = OperationContext::new();
                let _replay = ctx.enter_replay();
                let applied = adapter
                    .decode(record)
                    .and_then(|candidate| upsert(adapter, &ctx, candidate, ResolveOrder::NaturalKeyFirst));
                match applied {
                    Ok(Applied::Inserted(_)) => report.inserted += 1,
                    Ok(Applied::Merged(_)) => report.merged += 1,
                    Err(e) => {
                        warn!("Failed to import {} record from snapshot: {}", entity_type, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Snapshot import done: {} inserted, {} merged, {} failed",
            report.inserted, report.merged, report.failed
        );
        Ok(report)
    }

    /// Ids of the other nodes that left event or ledger files in the folder.
    pub fn peer_node_ids(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(SyncError::io(&self.folder, e)),
        };

        let mut peers = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.folder, e))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let node_id = match EventFileName::parse(&file_name) {
                Some(name) => Some(name.origin_node_id),
                None => ledger_node_id(&file_name).map(str::to_string),
            };
            if let Some(node_id) = node_id.filter(|id| id != &self.node_id) {
                peers.insert(node_id);
            }
        }
        Ok(peers)
    }

    /// Snapshot files in the shared folder. A missing folder has none.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotCandidate>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&self.folder, e)),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.folder, e))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !is_snapshot_file(&file_name) {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| SyncError::io(entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            candidates.push(SnapshotCandidate {
                file_name,
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(candidates)
    }
}
