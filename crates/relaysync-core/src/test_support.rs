//! Minimal entity and store used by the unit tests of this crate.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::context::OperationContext;
use crate::event::SyncAction;
use crate::exporter::ChangeExporter;
use crate::resolver::normalize_key;
use crate::store::{EntityId, EntityStore, StoreError, StoreResult, SyncEntity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Option<EntityId>,
    pub nombre: Option<String>,
    pub stock: Option<i64>,
}

impl Item {
    pub fn named(nombre: &str) -> Self {
        Self {
            nombre: Some(nombre.to_string()),
            ..Self::default()
        }
    }
}

impl SyncEntity for Item {
    const TYPE_NAME: &'static str = "Item";
    const NATURAL_KEYS: &'static [&'static str] = &["nombre"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn unique_key(&self) -> Option<String> {
        self.nombre.as_deref().map(normalize_key)
    }
}

/// In-memory table with a unique `nombre` column.
#[derive(Default)]
pub struct ItemStore {
    rows: Mutex<BTreeMap<EntityId, Item>>,
    exporter: Option<Arc<ChangeExporter>>,
}

impl ItemStore {
    pub fn with_exporter(exporter: Arc<ChangeExporter>) -> Self {
        Self {
            rows: Mutex::default(),
            exporter: Some(exporter),
        }
    }
}

impl EntityStore<Item> for ItemStore {
    fn find_all(&self) -> StoreResult<Vec<Item>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    fn find_by_id(&self, id: EntityId) -> StoreResult<Option<Item>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    fn find_by_natural_key(&self, field: &str, value: &str) -> StoreResult<Option<Item>> {
        if field != "nombre" {
            return Err(StoreError::UnsupportedLookup {
                entity_type: Item::TYPE_NAME.to_string(),
                field: field.to_string(),
            });
        }
        let wanted = normalize_key(value);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|item| item.unique_key().as_deref() == Some(wanted.as_str()))
            .cloned())
    }

    fn save(&self, ctx: &OperationContext, mut entity: Item) -> StoreResult<Item> {
        let saved = {
            let mut rows = self.rows.lock().unwrap();
            if let Some(key) = entity.unique_key() {
                let clash = rows.values().any(|row| {
                    row.id != entity.id && row.unique_key().as_deref() == Some(key.as_str())
                });
                if clash {
                    return Err(StoreError::ConstraintViolation {
                        entity_type: Item::TYPE_NAME.to_string(),
                        field: "nombre".to_string(),
                        value: key,
                    });
                }
            }
            let id = match entity.id {
                Some(id) => id,
                None => rows.keys().next_back().map_or(1, |last| last + 1),
            };
            entity.set_id(id);
            rows.insert(id, entity.clone());
            entity
        };
        if let Some(exporter) = &self.exporter {
            exporter.export_change(ctx, &saved, SyncAction::Save);
        }
        Ok(saved)
    }

    fn delete(&self, ctx: &OperationContext, entity: &Item) -> StoreResult<bool> {
        let removed = match entity.id {
            Some(id) => self.rows.lock().unwrap().remove(&id).is_some(),
            None => false,
        };
        if removed {
            if let Some(exporter) = &self.exporter {
                exporter.export_change(ctx, entity, SyncAction::Delete);
            }
        }
        Ok(removed)
    }
}
