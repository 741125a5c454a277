//! Entity resolution and field-level merge.
//!
//! An incoming record is matched against local state in this order:
//!
//! 1. the adapter's identity override, when it applies;
//! 2. the identifier and the conventional natural keys, in the order given
//!    by [`ResolveOrder`].
//!
//! A match is merged (non-null incoming fields win, the id never changes);
//! otherwise the record is inserted. Conflicts between nodes are not
//! detected: the record processed last wins field by field.

use serde_json::Value;
use tracing::debug;

use crate::adapter::{EntityAdapter, IdentityMatch};
use crate::context::OperationContext;
use crate::error::{Result, SyncError};
use crate::store::EntityId;

pub const ID_FIELD: &str = "id";

/// Conventional natural-key field names, tried in order.
pub const NATURAL_KEY_CANDIDATES: &[&str] = &[
    "codigo",
    "codigoProducto",
    "codigoBarra",
    "code",
    "nombre",
    "name",
    "username",
];

/// Which lookup wins when a candidate carries both an id and a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOrder {
    /// Incremental events: ids are usually shared with the producer.
    IdFirst,
    /// Snapshot import: ids of a foreign node mean little locally.
    NaturalKeyFirst,
}

/// Result of [`upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Inserted(Value),
    Merged(Value),
}

impl Applied {
    pub fn record(&self) -> &Value {
        match self {
            Applied::Inserted(record) | Applied::Merged(record) => record,
        }
    }

    pub fn was_merge(&self) -> bool {
        matches!(self, Applied::Merged(_))
    }
}

/// Copy every non-null top-level property of `incoming` onto `target`,
/// skipping `excluded` keys. Non-object inputs leave `target` untouched.
pub fn merge_non_null(target: &mut Value, incoming: &Value, excluded: &[&str]) {
    let (Value::Object(target), Value::Object(incoming)) = (target, incoming) else {
        return;
    };
    for (key, value) in incoming {
        if value.is_null() || excluded.contains(&key.as_str()) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Trimmed, lower-cased form used for every natural-key comparison.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn extract_id(record: &Value) -> Option<EntityId> {
    record.get(ID_FIELD).and_then(Value::as_i64)
}

fn key_value<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Locate the local record `candidate` refers to.
pub fn find_existing(
    adapter: &EntityAdapter,
    candidate: &Value,
    order: ResolveOrder,
) -> Result<Option<Value>> {
    match adapter.identity_override(candidate)? {
        IdentityMatch::Found(existing) => return Ok(Some(existing)),
        IdentityMatch::Missing => return Ok(None),
        IdentityMatch::NotApplicable => {}
    }

    match order {
        ResolveOrder::IdFirst => match find_by_id(adapter, candidate)? {
            Some(existing) => Ok(Some(existing)),
            None => find_by_natural_key(adapter, candidate),
        },
        ResolveOrder::NaturalKeyFirst => match natural_key(adapter, candidate) {
            Some((field, value)) => lookup_natural_key(adapter, field, value),
            None => find_by_id(adapter, candidate),
        },
    }
}

fn find_by_id(adapter: &EntityAdapter, candidate: &Value) -> Result<Option<Value>> {
    match extract_id(candidate) {
        Some(id) => adapter.find_by_id(id),
        None => Ok(None),
    }
}

/// First natural key that the candidate carries and the adapter can look up.
fn natural_key<'a>(adapter: &EntityAdapter, candidate: &'a Value) -> Option<(&'static str, &'a str)> {
    let declared = adapter
        .natural_key_fields()
        .filter(|field| !NATURAL_KEY_CANDIDATES.contains(field));
    NATURAL_KEY_CANDIDATES
        .iter()
        .copied()
        .chain(declared)
        .filter(|field| adapter.has_lookup(field))
        .find_map(|field| key_value(candidate, field).map(|value| (field, value)))
}

fn find_by_natural_key(adapter: &EntityAdapter, candidate: &Value) -> Result<Option<Value>> {
    match natural_key(adapter, candidate) {
        Some((field, value)) => lookup_natural_key(adapter, field, value),
        None => Ok(None),
    }
}

fn lookup_natural_key(adapter: &EntityAdapter, field: &str, value: &str) -> Result<Option<Value>> {
    let key = normalize_key(value);
    debug!("Resolving {} by {}='{}'", adapter.type_name(), field, key);
    adapter.find_by_natural_key(field, &key)
}

/// Merge `candidate` into its local match, or insert it when there is none.
///
/// An insert that trips a unique constraint is retried once as a merge into
/// the record that owns the natural key.
pub fn upsert(
    adapter: &EntityAdapter,
    ctx: &OperationContext,
    candidate: Value,
    order: ResolveOrder,
) -> Result<Applied> {
    if let Some(existing) = find_existing(adapter, &candidate, order)? {
        return merge_into(adapter, ctx, &existing, &candidate);
    }

    let insert = without_taken_id(adapter, candidate.clone())?;
    match adapter.save(ctx, insert) {
        Ok(saved) => Ok(Applied::Inserted(saved)),
        Err(SyncError::Store(err)) if err.is_constraint_violation() => {
            debug!(
                "Insert of {} hit a unique constraint, retrying as merge: {}",
                adapter.type_name(),
                err
            );
            match find_existing(adapter, &candidate, ResolveOrder::NaturalKeyFirst)? {
                Some(existing) => merge_into(adapter, ctx, &existing, &candidate),
                None => Err(SyncError::Store(err)),
            }
        }
        Err(err) => Err(err),
    }
}

/// Drop the candidate's id when a different local record already owns it.
fn without_taken_id(adapter: &EntityAdapter, mut candidate: Value) -> Result<Value> {
    if let Some(id) = extract_id(&candidate) {
        if adapter.find_by_id(id)?.is_some() {
            debug!("{} id {} is taken locally, inserting with a new id", adapter.type_name(), id);
            if let Value::Object(fields) = &mut candidate {
                fields.insert(ID_FIELD.to_string(), Value::Null);
            }
        }
    }
    Ok(candidate)
}

fn merge_into(
    adapter: &EntityAdapter,
    ctx: &OperationContext,
    existing: &Value,
    candidate: &Value,
) -> Result<Applied> {
    let merged = adapter.merge(existing, candidate)?;
    Ok(Applied::Merged(adapter.save(ctx, merged)?))
}
