//! In-memory table with optional JSON file persistence.
//!
//! Each [`MemoryStore`] holds one entity type keyed by id. When opened on a
//! data directory it rewrites `{type}.json` after every mutation. The
//! type's [`SyncEntity::unique_key`] is enforced as a unique column, and an
//! attached [`ChangeExporter`] is called after each committed write.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use relaysync_core::resolver::normalize_key;
use relaysync_core::{
    ChangeExporter, EntityId, EntityStore, OperationContext, StoreError, StoreResult, SyncAction,
    SyncEntity,
};
use serde_json::Value;
use tracing::debug;

type SaveHook<T> = Box<dyn Fn(&mut T) -> StoreResult<()> + Send + Sync>;

pub struct MemoryStore<T: SyncEntity> {
    rows: RwLock<BTreeMap<EntityId, T>>,
    file: Option<PathBuf>,
    exporter: Option<Arc<ChangeExporter>>,
    before_save: Option<SaveHook<T>>,
}

impl<T: SyncEntity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncEntity> MemoryStore<T> {
    /// Volatile store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            file: None,
            exporter: None,
            before_save: None,
        }
    }

    /// Store persisted under `data_dir`, loading existing rows.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let file = data_dir.join(table_file_name::<T>());
        let rows = match fs::read(&file) {
            Ok(raw) => {
                let records: Vec<T> = serde_json::from_slice(&raw).map_err(|e| {
                    StoreError::Backend(format!("corrupt table {}: {}", file.display(), e))
                })?;
                records
                    .into_iter()
                    .filter_map(|record| record.id().map(|id| (id, record)))
                    .collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(backend(&file, e)),
        };
        debug!("Opened {} with {} rows", file.display(), rows.len());
        Ok(Self {
            rows: RwLock::new(rows),
            file: Some(file),
            exporter: None,
            before_save: None,
        })
    }

    /// Publish every committed local write through `exporter`.
    pub fn with_exporter(mut self, exporter: Arc<ChangeExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run `hook` on every record before it is stored.
    pub fn with_before_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut T) -> StoreResult<()> + Send + Sync + 'static,
    {
        self.before_save = Some(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EntityId, T>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityId, T>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, rows: &BTreeMap<EntityId, T>) -> StoreResult<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let records: Vec<&T> = rows.values().collect();
        let body = serde_json::to_vec_pretty(&records)
            .map_err(|e| StoreError::Backend(format!("encoding {}: {}", T::TYPE_NAME, e)))?;
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).map_err(|e| backend(dir, e))?;
        }
        let temp = file.with_extension("json.tmp");
        fs::write(&temp, body).map_err(|e| backend(&temp, e))?;
        fs::rename(&temp, file).map_err(|e| backend(file, e))
    }

    fn export(&self, ctx: &OperationContext, entity: &T, action: SyncAction) {
        if let Some(exporter) = &self.exporter {
            exporter.export_change(ctx, entity, action);
        }
    }
}

fn table_file_name<T: SyncEntity>() -> String {
    format!("{}.json", T::TYPE_NAME.to_lowercase())
}

fn backend(path: &Path, e: io::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", path.display(), e))
}

/// Normalized string value of `field` in the serialized record.
fn field_key<T: SyncEntity>(entity: &T, field: &str) -> Option<String> {
    match serde_json::to_value(entity).ok()?.get(field)? {
        Value::String(s) => Some(normalize_key(s)),
        _ => None,
    }
}

impl<T: SyncEntity> EntityStore<T> for MemoryStore<T> {
    fn find_all(&self) -> StoreResult<Vec<T>> {
        Ok(self.read().values().cloned().collect())
    }

    fn find_by_id(&self, id: EntityId) -> StoreResult<Option<T>> {
        Ok(self.read().get(&id).cloned())
    }

    fn find_by_natural_key(&self, field: &str, value: &str) -> StoreResult<Option<T>> {
        if !T::NATURAL_KEYS.iter().any(|key| *key == field) {
            return Err(StoreError::UnsupportedLookup {
                entity_type: T::TYPE_NAME.to_string(),
                field: field.to_string(),
            });
        }
        let wanted = normalize_key(value);
        Ok(self
            .read()
            .values()
            .find(|row| field_key(*row, field).as_deref() == Some(wanted.as_str()))
            .cloned())
    }

    fn save(&self, ctx: &OperationContext, mut entity: T) -> StoreResult<T> {
        if let Some(hook) = &self.before_save {
            hook(&mut entity)?;
        }

        let saved = {
            let mut rows = self.write();
            if let Some(key) = entity.unique_key() {
                let taken = rows.values().any(|row| {
                    row.id() != entity.id() && row.unique_key().as_deref() == Some(key.as_str())
                });
                if taken {
                    return Err(StoreError::ConstraintViolation {
                        entity_type: T::TYPE_NAME.to_string(),
                        field: T::NATURAL_KEYS.first().copied().unwrap_or("unique").to_string(),
                        value: key,
                    });
                }
            }

            let id = match entity.id() {
                Some(id) => id,
                None => rows.keys().next_back().map_or(1, |last| last + 1),
            };
            entity.set_id(id);
            let previous = rows.insert(id, entity.clone());
            if let Err(e) = self.persist(&rows) {
                match previous {
                    Some(previous) => rows.insert(id, previous),
                    None => rows.remove(&id),
                };
                return Err(e);
            }
            entity
        };

        self.export(ctx, &saved, SyncAction::Save);
        Ok(saved)
    }

    fn delete(&self, ctx: &OperationContext, entity: &T) -> StoreResult<bool> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        let removed = {
            let mut rows = self.write();
            let Some(removed) = rows.remove(&id) else {
                return Ok(false);
            };
            if let Err(e) = self.persist(&rows) {
                rows.insert(id, removed);
                return Err(e);
            }
            removed
        };

        self.export(ctx, &removed, SyncAction::Delete);
        Ok(true)
    }
}
