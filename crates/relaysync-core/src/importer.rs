//! Change importer.
//!
//! Each [`poll_once`](ChangeImporter::poll_once) lists the shared folder in
//! file-name order and applies every event that is routable, foreign, not
//! yet in the ledger and of a registered type. Files are applied one at a
//! time; a failure only affects its own file, which stays unprocessed and is
//! retried on the next poll. Event files older than the retention horizon
//! are deleted at the end of every poll.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, EntityAdapter};
use crate::context::OperationContext;
use crate::error::{Result, SyncError};
use crate::event::{SyncAction, SyncEvent};
use crate::ledger::ProcessedLedger;
use crate::naming::{is_snapshot_file, is_temporary, EventFileName, EVENT_EXTENSION};
use crate::resolver::{find_existing, upsert, Applied, ResolveOrder};
use crate::snapshot::BootstrapGate;

/// What applying one event did to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Upserted(Applied),
    Deleted,
    /// DELETE of a record this node does not have.
    NothingToDelete,
    /// The event body claims this node as its origin.
    OwnEvent,
}

/// Counters for one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub started_at: Option<DateTime<Utc>>,
    /// The poll did nothing because bootstrap had not completed.
    pub gated: bool,
    pub scanned: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped_processed: usize,
    pub skipped_own: usize,
    pub skipped_unroutable: usize,
    pub skipped_unknown_type: usize,
    pub purged: usize,
}

struct ImporterState {
    ledger: ProcessedLedger,
    last_report: Option<PollReport>,
}

pub struct ChangeImporter {
    folder: PathBuf,
    node_id: String,
    retention: Duration,
    registry: Arc<AdapterRegistry>,
    gate: Arc<BootstrapGate>,
    state: Mutex<ImporterState>,
}

enum Eligibility {
    Eligible,
    Processed,
    Own,
    Unroutable,
    UnknownType,
}

impl ChangeImporter {
    /// Create an importer and load its ledger from `folder`.
    pub fn new(
        folder: impl Into<PathBuf>,
        node_id: impl Into<String>,
        retention: Duration,
        registry: Arc<AdapterRegistry>,
        gate: Arc<BootstrapGate>,
    ) -> Result<Self> {
        let folder = folder.into();
        let node_id = node_id.into();
        let ledger = ProcessedLedger::load(&folder, &node_id)?;
        Ok(Self {
            folder,
            node_id,
            retention,
            registry,
            gate,
            state: Mutex::new(ImporterState {
                ledger,
                last_report: None,
            }),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn state(&self) -> MutexGuard<'_, ImporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply every eligible event file once, then run the retention sweep.
    ///
    /// Concurrent calls are serialized.
    pub fn poll_once(&self) -> PollReport {
        let mut state = self.state();
        let mut report = PollReport {
            started_at: Some(Utc::now()),
            ..PollReport::default()
        };

        if !self.gate.is_completed() {
            debug!("Snapshot bootstrap not completed, skipping poll");
            report.gated = true;
            state.last_report = Some(report.clone());
            return report;
        }

        let files = match self.list_event_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list sync folder {}: {}", self.folder.display(), e);
                state.last_report = Some(report.clone());
                return report;
            }
        };

        for (file_name, path) in files {
            report.scanned += 1;
            match self.eligibility(&state.ledger, &file_name) {
                Eligibility::Processed => report.skipped_processed += 1,
                Eligibility::Own => report.skipped_own += 1,
                Eligibility::Unroutable => {
                    debug!("Skipping unroutable file {}", file_name);
                    report.skipped_unroutable += 1;
                }
                Eligibility::UnknownType => {
                    debug!("Skipping {}: no adapter for its entity type", file_name);
                    report.skipped_unknown_type += 1;
                }
                Eligibility::Eligible => match self.apply_file(&path) {
                    Ok(ApplyOutcome::OwnEvent) => report.skipped_own += 1,
                    Ok(outcome) => match state.ledger.record(&file_name) {
                        Ok(()) => {
                            debug!("Applied {}: {:?}", file_name, outcome);
                            report.applied += 1;
                        }
                        Err(e) => {
                            warn!("Applied {} but could not record it: {}", file_name, e);
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to apply {}: {}", file_name, e);
                        report.failed += 1;
                    }
                },
            }
        }

        report.purged = self.sweep_retention();

        if report.applied > 0 || report.failed > 0 {
            info!(
                "Poll applied {} events ({} failed, {} purged)",
                report.applied, report.failed, report.purged
            );
        }
        state.last_report = Some(report.clone());
        report
    }

    fn eligibility(&self, ledger: &ProcessedLedger, file_name: &str) -> Eligibility {
        if ledger.contains(file_name) {
            return Eligibility::Processed;
        }
        let Some(name) = EventFileName::parse(file_name) else {
            return Eligibility::Unroutable;
        };
        if name.is_from(&self.node_id) {
            return Eligibility::Own;
        }
        if !self.registry.contains(&name.entity_type) {
            return Eligibility::UnknownType;
        }
        Eligibility::Eligible
    }

    fn apply_file(&self, path: &Path) -> Result<ApplyOutcome> {
        let raw = fs::read(path).map_err(|e| SyncError::io(path, e))?;
        let event: SyncEvent = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::json(path.display().to_string(), e))?;
        self.apply_event(&event)
    }

    /// Apply one event under a fresh replaying context.
    pub fn apply_event(&self, event: &SyncEvent) -> Result<ApplyOutcome> {
        if event.origin_node_id == self.node_id {
            return Ok(ApplyOutcome::OwnEvent);
        }
        let adapter = self
            .registry
            .get(&event.entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(event.entity_type.clone()))?;
        let payload = event
            .payload()
            .map_err(|e| SyncError::json(format!("{} payload", event.entity_type), e))?;

        let ctx = OperationContext::new();
        let _replay = ctx.enter_replay();
        let candidate = adapter.decode(&payload)?;
        match event.action {
            SyncAction::Save => {
                upsert(adapter, &ctx, candidate, ResolveOrder::IdFirst).map(ApplyOutcome::Upserted)
            }
            SyncAction::Delete => delete_record(adapter, &ctx, candidate),
        }
    }

    /// Event files in name order. A missing folder has none.
    fn list_event_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&self.folder, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.folder, e))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(EVENT_EXTENSION)
                || is_snapshot_file(&file_name)
                || is_temporary(&file_name)
            {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push((file_name, entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Delete event files whose modification time is past the retention horizon.
    fn sweep_retention(&self) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(self.retention) else {
            return 0;
        };
        let files = match self.list_event_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Retention sweep skipped: {}", e);
                return 0;
            }
        };

        let mut purged = 0;
        for (file_name, path) in files {
            if EventFileName::parse(&file_name).is_none() {
                continue;
            }
            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Purged expired event file {}", file_name);
                    purged += 1;
                }
                Err(e) => warn!("Could not purge {}: {}", file_name, e),
            }
        }
        purged
    }

    /// Eligible files not yet applied.
    pub fn pending_files(&self) -> Result<usize> {
        let state = self.state();
        Ok(self
            .list_event_files()?
            .iter()
            .filter(|(name, _)| matches!(self.eligibility(&state.ledger, name), Eligibility::Eligible))
            .count())
    }

    pub fn processed_count(&self) -> usize {
        self.state().ledger.len()
    }

    pub fn is_processed(&self, file_name: &str) -> bool {
        self.state().ledger.contains(file_name)
    }

    pub fn last_report(&self) -> Option<PollReport> {
        self.state().last_report.clone()
    }
}

fn delete_record(
    adapter: &EntityAdapter,
    ctx: &OperationContext,
    candidate: serde_json::Value,
) -> Result<ApplyOutcome> {
    let target = find_existing(adapter, &candidate, ResolveOrder::IdFirst)?.unwrap_or(candidate);
    if adapter.delete(ctx, target)? {
        Ok(ApplyOutcome::Deleted)
    } else {
        Ok(ApplyOutcome::NothingToDelete)
    }
}
