//! Change exporter.
//!
//! Called by a store right after a local write commits. Publishes one event
//! file per change and never reports failure back to the caller.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::context::OperationContext;
use crate::error::{Result, SyncError};
use crate::event::{SyncAction, SyncEvent};
use crate::naming::{temporary_name, EventFileName};
use crate::store::SyncEntity;

#[derive(Debug, Clone)]
pub struct ChangeExporter {
    folder: PathBuf,
    node_id: String,
}

impl ChangeExporter {
    pub fn new(folder: impl Into<PathBuf>, node_id: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            node_id: node_id.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish `entity` as a `action` event.
    ///
    /// Silent while `ctx` is replaying a remote change, and for a repeat of
    /// the same `(type, id, action)` within one operation. Returns the
    /// written path, or `None` when nothing was written.
    pub fn export_change<T: SyncEntity>(
        &self,
        ctx: &OperationContext,
        entity: &T,
        action: SyncAction,
    ) -> Option<PathBuf> {
        if ctx.is_replaying() {
            debug!("Suppressing export of replayed {} change", T::TYPE_NAME);
            return None;
        }
        if let Some(id) = entity.id() {
            if !ctx.claim_export(T::TYPE_NAME, id, action) {
                debug!("Already exported {} {}#{} in this operation", action, T::TYPE_NAME, id);
                return None;
            }
        }

        match self.write_event(entity, action) {
            Ok(path) => {
                info!("Exported {} {} to {}", action, T::TYPE_NAME, path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to export {} {}: {}", action, T::TYPE_NAME, e);
                None
            }
        }
    }

    fn write_event<T: SyncEntity>(&self, entity: &T, action: SyncAction) -> Result<PathBuf> {
        let payload = entity
            .to_wire()
            .map_err(|e| SyncError::json(format!("{} wire projection", T::TYPE_NAME), e))?;
        let event = SyncEvent::new(&self.node_id, T::TYPE_NAME, action, &payload)
            .map_err(|e| SyncError::json("event payload", e))?;
        let body = serde_json::to_vec(&event).map_err(|e| SyncError::json("event", e))?;
        let name = EventFileName::new(&self.node_id, T::TYPE_NAME).to_string();
        write_atomically(&self.folder, &name, &body)
    }
}

/// Write `body` to a hidden temporary file and rename it to `name`.
pub(crate) fn write_atomically(folder: &Path, name: &str, body: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(folder).map_err(|e| SyncError::io(folder, e))?;
    let temp = folder.join(temporary_name(name));
    let target = folder.join(name);
    if let Err(e) = write_synced(&temp, body) {
        let _ = fs::remove_file(&temp);
        return Err(SyncError::io(&temp, e));
    }
    if let Err(e) = fs::rename(&temp, &target) {
        let _ = fs::remove_file(&temp);
        return Err(SyncError::io(&target, e));
    }
    if let Ok(dir) = File::open(folder) {
        let _ = dir.sync_all();
    }
    Ok(target)
}

fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(body)?;
    file.sync_all()
}
