//! Entity store boundary.
//!
//! The relational layer of each service is an external collaborator. This
//! module defines the two traits it has to satisfy to take part in
//! replication: [`SyncEntity`] for the record type and [`EntityStore`] for
//! the table holding it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::OperationContext;
use crate::resolver;

/// Primary key type shared by every replicated table.
pub type EntityId = i64;

/// Errors surfaced by an entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated on {entity_type}.{field}: {value}")]
    ConstraintViolation {
        entity_type: String,
        field: String,
        value: String,
    },

    #[error("Record not found: {entity_type}#{id}")]
    NotFound { entity_type: String, id: EntityId },

    #[error("Lookup by {field} is not supported for {entity_type}")]
    UnsupportedLookup { entity_type: String, field: String },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A record type that can be replicated.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Logical type name, used as the routing key in event files and snapshots.
    const TYPE_NAME: &'static str;

    /// Fields the store can look records up by, in the wire (camelCase) spelling.
    const NATURAL_KEYS: &'static [&'static str] = &[];

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: EntityId);

    /// Normalized value of the type's unique column, if it has one.
    fn unique_key(&self) -> Option<String> {
        None
    }

    /// Projection written to the wire. Defaults to the full serialized record.
    fn to_wire(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Copy every non-null property of `incoming` onto `self`, keeping `self`'s id.
    fn merge_from(&mut self, incoming: &Self) -> serde_json::Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        let incoming = serde_json::to_value(incoming)?;
        resolver::merge_non_null(&mut current, &incoming, &[resolver::ID_FIELD]);
        *self = serde_json::from_value(current)?;
        Ok(())
    }
}

/// Table-level operations the replication core calls into.
///
/// `save` and `delete` receive the caller's [`OperationContext`] so that a
/// store hooked up to a [`ChangeExporter`](crate::exporter::ChangeExporter)
/// can tell local writes from replayed ones.
pub trait EntityStore<T: SyncEntity>: Send + Sync {
    fn find_all(&self) -> StoreResult<Vec<T>>;

    fn find_by_id(&self, id: EntityId) -> StoreResult<Option<T>>;

    /// Case-insensitive lookup on one of `T::NATURAL_KEYS`.
    fn find_by_natural_key(&self, field: &str, value: &str) -> StoreResult<Option<T>>;

    /// Insert or update. Records without an id get one assigned.
    fn save(&self, ctx: &OperationContext, entity: T) -> StoreResult<T>;

    /// Delete by id. Returns `false` when nothing was deleted.
    fn delete(&self, ctx: &OperationContext, entity: &T) -> StoreResult<bool>;
}
