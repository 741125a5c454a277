//! Per-entity capability table.
//!
//! Each replicated type registers one [`EntityAdapter`] at startup: a small
//! table of closures (`find_all`, `find_by_id`, natural-key finders, an
//! optional identity override, `decode`, `merge`, `save`, `delete`) that work
//! on JSON records and hide the concrete type behind them. The importer and
//! snapshot bootstrap route on [`EntityAdapter::type_name`] through an
//! [`AdapterRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::context::OperationContext;
use crate::error::{Result, SyncError};
use crate::store::{EntityId, EntityStore, StoreError, StoreResult, SyncEntity};

/// Outcome of an entity-specific identity lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityMatch<T> {
    /// The rule does not apply to this candidate; use the generic strategy.
    NotApplicable,
    /// The rule applies and found no local record.
    Missing,
    Found(T),
}

impl<T> IdentityMatch<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> IdentityMatch<U> {
        match self {
            IdentityMatch::NotApplicable => IdentityMatch::NotApplicable,
            IdentityMatch::Missing => IdentityMatch::Missing,
            IdentityMatch::Found(value) => IdentityMatch::Found(f(value)),
        }
    }
}

type FindAllFn = Box<dyn Fn() -> Result<Vec<Value>> + Send + Sync>;
type FindByIdFn = Box<dyn Fn(EntityId) -> Result<Option<Value>> + Send + Sync>;
type FindByKeyFn = Box<dyn Fn(&str) -> Result<Option<Value>> + Send + Sync>;
type IdentityFn = Box<dyn Fn(&Value) -> Result<IdentityMatch<Value>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&Value) -> Result<Value> + Send + Sync>;
type MergeFn = Box<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;
type SaveFn = Box<dyn Fn(&OperationContext, Value) -> Result<Value> + Send + Sync>;
type DeleteFn = Box<dyn Fn(&OperationContext, Value) -> Result<bool> + Send + Sync>;

struct NaturalKeyLookup {
    field: &'static str,
    find: FindByKeyFn,
}

/// Type-erased replication capabilities of one entity type.
pub struct EntityAdapter {
    type_name: String,
    find_all_wire: FindAllFn,
    find_by_id: FindByIdFn,
    natural_keys: Vec<NaturalKeyLookup>,
    identity_override: Option<IdentityFn>,
    decode: DecodeFn,
    merge: MergeFn,
    save: SaveFn,
    delete: DeleteFn,
}

impl fmt::Debug for EntityAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("type_name", &self.type_name)
            .field(
                "natural_keys",
                &self.natural_keys.iter().map(|k| k.field).collect::<Vec<_>>(),
            )
            .field("identity_override", &self.identity_override.is_some())
            .finish()
    }
}

impl EntityAdapter {
    /// Start building an adapter over `store`.
    pub fn builder<T, S>(store: Arc<S>) -> AdapterBuilder<T>
    where
        T: SyncEntity,
        S: EntityStore<T> + 'static,
    {
        AdapterBuilder {
            store,
            identity_override: None,
            decoder: None,
        }
    }

    /// Adapter with the generic strategy only.
    pub fn for_store<T, S>(store: Arc<S>) -> Self
    where
        T: SyncEntity,
        S: EntityStore<T> + 'static,
    {
        Self::builder(store).build()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn natural_key_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.natural_keys.iter().map(|k| k.field)
    }

    pub fn has_lookup(&self, field: &str) -> bool {
        self.natural_keys.iter().any(|k| k.field == field)
    }

    /// Every record in its wire projection.
    pub fn find_all_wire(&self) -> Result<Vec<Value>> {
        (self.find_all_wire)()
    }

    pub fn find_by_id(&self, id: EntityId) -> Result<Option<Value>> {
        (self.find_by_id)(id)
    }

    pub fn find_by_natural_key(&self, field: &str, value: &str) -> Result<Option<Value>> {
        let lookup = self
            .natural_keys
            .iter()
            .find(|k| k.field == field)
            .ok_or_else(|| StoreError::UnsupportedLookup {
                entity_type: self.type_name.clone(),
                field: field.to_string(),
            })?;
        (lookup.find)(value)
    }

    pub fn identity_override(&self, candidate: &Value) -> Result<IdentityMatch<Value>> {
        match &self.identity_override {
            Some(rule) => rule(candidate),
            None => Ok(IdentityMatch::NotApplicable),
        }
    }

    /// Turn a wire payload into a local record candidate.
    pub fn decode(&self, payload: &Value) -> Result<Value> {
        (self.decode)(payload)
    }

    /// Merge `incoming` onto `existing`, keeping `existing`'s identity.
    pub fn merge(&self, existing: &Value, incoming: &Value) -> Result<Value> {
        (self.merge)(existing, incoming)
    }

    pub fn save(&self, ctx: &OperationContext, record: Value) -> Result<Value> {
        (self.save)(ctx, record)
    }

    pub fn delete(&self, ctx: &OperationContext, record: Value) -> Result<bool> {
        (self.delete)(ctx, record)
    }
}

/// Typed builder for an [`EntityAdapter`].
pub struct AdapterBuilder<T: SyncEntity> {
    store: Arc<dyn EntityStore<T>>,
    identity_override: Option<Arc<dyn Fn(&T) -> StoreResult<IdentityMatch<T>> + Send + Sync>>,
    decoder: Option<Arc<dyn Fn(Value) -> Result<T> + Send + Sync>>,
}

impl<T: SyncEntity> AdapterBuilder<T> {
    /// Entity-specific identity rule, consulted before the generic id / natural-key lookup.
    pub fn identity_override<F>(mut self, rule: F) -> Self
    where
        F: Fn(&T) -> StoreResult<IdentityMatch<T>> + Send + Sync + 'static,
    {
        self.identity_override = Some(Arc::new(rule));
        self
    }

    /// Custom reconstruction of a record from its wire payload.
    pub fn decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(Value) -> Result<T> + Send + Sync + 'static,
    {
        self.decoder = Some(Arc::new(decode));
        self
    }

    pub fn build(self) -> EntityAdapter {
        let type_name = T::TYPE_NAME;

        let store = self.store.clone();
        let find_all_wire: FindAllFn = Box::new(move || {
            store
                .find_all()?
                .iter()
                .map(|entity| {
                    entity
                        .to_wire()
                        .map_err(|e| SyncError::json(format!("{} wire projection", type_name), e))
                })
                .collect()
        });

        let store = self.store.clone();
        let find_by_id: FindByIdFn = Box::new(move |id| {
            store.find_by_id(id)?.as_ref().map(encode::<T>).transpose()
        });

        let natural_keys = T::NATURAL_KEYS
            .iter()
            .map(|&field| {
                let store = self.store.clone();
                NaturalKeyLookup {
                    field,
                    find: Box::new(move |value: &str| {
                        store
                            .find_by_natural_key(field, value)?
                            .as_ref()
                            .map(encode::<T>)
                            .transpose()
                    }),
                }
            })
            .collect();

        let identity_override = self.identity_override.map(|rule| -> IdentityFn {
            Box::new(move |candidate: &Value| {
                let candidate: T = decode_record(candidate)?;
                let matched = rule(&candidate)?;
                match matched {
                    IdentityMatch::Found(entity) => Ok(IdentityMatch::Found(encode(&entity)?)),
                    other => Ok(other.map(|_| Value::Null)),
                }
            })
        });

        let decode: DecodeFn = match self.decoder {
            Some(decoder) => Box::new(move |payload: &Value| encode(&decoder(payload.clone())?)),
            None => Box::new(|payload: &Value| encode(&decode_record::<T>(payload)?)),
        };

        let merge: MergeFn = Box::new(move |existing: &Value, incoming: &Value| {
            let mut current: T = decode_record(existing)?;
            let incoming: T = decode_record(incoming)?;
            current
                .merge_from(&incoming)
                .map_err(|e| SyncError::json(format!("{} merge", type_name), e))?;
            encode(&current)
        });

        let store = self.store.clone();
        let save: SaveFn = Box::new(move |ctx, record| {
            let entity: T = decode_record(&record)?;
            encode(&store.save(ctx, entity)?)
        });

        let store = self.store;
        let delete: DeleteFn = Box::new(move |ctx, record| {
            let entity: T = decode_record(&record)?;
            Ok(store.delete(ctx, &entity)?)
        });

        EntityAdapter {
            type_name: type_name.to_string(),
            find_all_wire,
            find_by_id,
            natural_keys,
            identity_override,
            decode,
            merge,
            save,
            delete,
        }
    }
}

fn encode<T: Serialize>(entity: &T) -> Result<Value> {
    serde_json::to_value(entity).map_err(|e| SyncError::json("record encoding", e))
}

fn decode_record<T: SyncEntity + DeserializeOwned>(value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| SyncError::json(format!("{} record", T::TYPE_NAME), e))
}

/// Adapters indexed by entity type name, in registration order.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<EntityAdapter>>,
    by_name: HashMap<String, usize>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. A later registration for the same type replaces the earlier one.
    pub fn register(&mut self, adapter: EntityAdapter) -> &mut Self {
        let name = adapter.type_name().to_string();
        let adapter = Arc::new(adapter);
        match self.by_name.get(&name) {
            Some(&index) => {
                warn!("Replacing sync adapter for entity type {}", name);
                self.adapters[index] = adapter;
            }
            None => {
                self.by_name.insert(name, self.adapters.len());
                self.adapters.push(adapter);
            }
        }
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<EntityAdapter>> {
        self.by_name.get(entity_type).map(|&index| &self.adapters[index])
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.by_name.contains_key(entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityAdapter>> {
        self.adapters.iter()
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.type_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
