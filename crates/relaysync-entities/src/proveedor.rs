//! Providers with their legal entities and bank accounts.
//!
//! Providers are identified across nodes by name. Merging a provider merges
//! its nested collections element by element instead of replacing them:
//! legal entities match by id, then by case-insensitive name; bank accounts
//! match by id, then by account number.

use std::sync::Arc;

use chrono::NaiveDateTime;
use relaysync_core::resolver::{merge_non_null, normalize_key, ID_FIELD};
use relaysync_core::{EntityId, EntityStore, IdentityMatch, StoreResult, SyncEntity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::Timestamped;

const RAZONES_FIELD: &str = "razonesSociales";
const CUENTAS_FIELD: &str = "cuentasBancarias";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proveedor {
    pub id: Option<EntityId>,
    pub nombre: Option<String>,
    pub cuit: Option<String>,
    pub calle: Option<String>,
    pub altura: Option<String>,
    pub codigo_postal: Option<String>,
    pub provincia: Option<String>,
    pub ciudad: Option<String>,
    pub telefono_fijo: Option<String>,
    pub celular: Option<String>,
    pub pagina_web: Option<String>,
    pub condicion_venta: Option<String>,
    pub moneda: Option<String>,
    pub observaciones: Option<String>,
    pub razones_sociales: Option<Vec<RazonSocial>>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazonSocial {
    pub id: Option<EntityId>,
    pub nombre: Option<String>,
    pub descuento_sobre_lista: Option<String>,
    pub descuento_sobre_factura: Option<String>,
    pub cuentas_bancarias: Option<Vec<CuentaBancaria>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuentaBancaria {
    pub id: Option<EntityId>,
    pub cbu: Option<String>,
    pub alias: Option<String>,
    pub tipo_cuenta: Option<String>,
    pub numero_cuenta: Option<String>,
    pub titular: Option<String>,
}

/// Overlay the non-null fields of `incoming` onto `target`, skipping `excluded`.
fn overlay<T: Serialize + DeserializeOwned>(
    target: &mut T,
    incoming: &T,
    excluded: &[&str],
) -> serde_json::Result<()> {
    let mut current = serde_json::to_value(&*target)?;
    merge_non_null(&mut current, &serde_json::to_value(incoming)?, excluded);
    *target = serde_json::from_value(current)?;
    Ok(())
}

/// Merge `incoming` elements into `managed`, matching by id and then by `same`.
fn merge_children<T>(
    managed: &mut Vec<T>,
    incoming: &[T],
    id: impl Fn(&T) -> Option<EntityId>,
    same: impl Fn(&T, &T) -> bool,
    merge: impl Fn(&mut T, &T) -> serde_json::Result<()>,
) -> serde_json::Result<()>
where
    T: Clone,
{
    for child in incoming {
        let by_id = id(child).and_then(|wanted| managed.iter().position(|m| id(m) == Some(wanted)));
        let position = by_id.or_else(|| managed.iter().position(|m| same(m, child)));
        match position {
            Some(index) => merge(&mut managed[index], child)?,
            None => managed.push(child.clone()),
        }
    }
    Ok(())
}

impl CuentaBancaria {
    fn same_account(&self, other: &Self) -> bool {
        matches!((&self.numero_cuenta, &other.numero_cuenta), (Some(a), Some(b)) if a == b)
    }
}

impl RazonSocial {
    fn same_name(&self, other: &Self) -> bool {
        match (&self.nombre, &other.nombre) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        }
    }

    fn merge_from(&mut self, incoming: &Self) -> serde_json::Result<()> {
        overlay(self, incoming, &[ID_FIELD, CUENTAS_FIELD])?;
        if let Some(cuentas) = &incoming.cuentas_bancarias {
            merge_children(
                self.cuentas_bancarias.get_or_insert_with(Vec::new),
                cuentas,
                |c| c.id,
                CuentaBancaria::same_account,
                |managed, incoming| overlay(managed, incoming, &[ID_FIELD]),
            )?;
        }
        Ok(())
    }
}

impl SyncEntity for Proveedor {
    const TYPE_NAME: &'static str = "Proveedor";
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

    fn merge_from(&mut self, incoming: &Self) -> serde_json::Result<()> {
        overlay(self, incoming, &[ID_FIELD, RAZONES_FIELD])?;
        if let Some(razones) = &incoming.razones_sociales {
            merge_children(
                self.razones_sociales.get_or_insert_with(Vec::new),
                razones,
                |r| r.id,
                RazonSocial::same_name,
                RazonSocial::merge_from,
            )?;
        }
        Ok(())
    }
}

impl Timestamped for Proveedor {
    fn timestamps(&mut self) -> (&mut Option<NaiveDateTime>, &mut Option<NaiveDateTime>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

/// Resolve providers by trimmed, case-insensitive name before anything else.
///
/// A name with no local match is not conclusive: the provider may have been
/// renamed on its origin node, so the generic id lookup runs next.
pub fn identity_by_nombre<S>(
    store: Arc<S>,
) -> impl Fn(&Proveedor) -> StoreResult<IdentityMatch<Proveedor>> + Send + Sync + 'static
where
    S: EntityStore<Proveedor> + 'static,
{
    move |candidate: &Proveedor| {
        let nombre = candidate
            .nombre
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        match nombre {
            Some(nombre) => Ok(match store.find_by_natural_key("nombre", nombre)? {
                Some(found) => IdentityMatch::Found(found),
                None => IdentityMatch::NotApplicable,
            }),
            None => Ok(IdentityMatch::NotApplicable),
        }
    }
}
