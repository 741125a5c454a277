//! Products and their related-product links.
//!
//! Related products travel as a list of ids (`productosRelacionadosIds`) and
//! are resolved against the local product table on decode. Ids with no local
//! row are dropped.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use relaysync_core::{EntityId, EntityStore, StoreResult, SyncEntity, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{touch, Timestamped};

const RELATED_FIELD: &str = "productosRelacionados";
const RELATED_IDS_FIELD: &str = "productosRelacionadosIds";
const CODE_PREFIX: &str = "PROD-";

/// Summary of a related product as stored on its owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductoRef {
    pub id: Option<EntityId>,
    pub codigo_producto: Option<String>,
    pub descripcion: Option<String>,
}

impl From<&Producto> for ProductoRef {
    fn from(producto: &Producto) -> Self {
        Self {
            id: producto.id,
            codigo_producto: producto.codigo_producto.clone(),
            descripcion: producto.descripcion.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Producto {
    pub id: Option<EntityId>,
    pub codigo_producto: Option<String>,
    pub descripcion: Option<String>,
    pub cantidad: Option<i64>,
    pub iva: Option<f64>,
    pub precio_publico: Option<f64>,
    pub costo_pesos: Option<f64>,
    pub costo_dolares: Option<f64>,
    pub porcentaje_ganancia: Option<f64>,
    pub costo_fijo: Option<bool>,
    pub fecha_ingreso: Option<NaiveDate>,
    pub proveedor_id: Option<EntityId>,
    pub tipo_producto_id: Option<EntityId>,
    pub productos_relacionados: Option<Vec<ProductoRef>>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl SyncEntity for Producto {
    const TYPE_NAME: &'static str = "Producto";
    const NATURAL_KEYS: &'static [&'static str] = &["codigoProducto"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn to_wire(&self) -> serde_json::Result<Value> {
        let mut wire = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut wire {
            fields.remove(RELATED_FIELD);
            let ids: Vec<EntityId> = self
                .productos_relacionados
                .iter()
                .flatten()
                .filter_map(|related| related.id)
                .collect();
            fields.insert(RELATED_IDS_FIELD.to_string(), serde_json::to_value(ids)?);
        }
        Ok(wire)
    }
}

impl Timestamped for Producto {
    fn timestamps(&mut self) -> (&mut Option<NaiveDateTime>, &mut Option<NaiveDateTime>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

/// Rebuild a [`Producto`] from its wire form, resolving related ids locally.
pub fn producto_decoder<S>(
    store: Arc<S>,
) -> impl Fn(Value) -> relaysync_core::Result<Producto> + Send + Sync + 'static
where
    S: EntityStore<Producto> + 'static,
{
    move |payload: Value| {
        let related_ids: Option<Vec<EntityId>> = match payload.get(RELATED_IDS_FIELD) {
            Some(Value::Null) | None => None,
            Some(ids) => Some(
                serde_json::from_value(ids.clone())
                    .map_err(|e| SyncError::json("Producto related ids", e))?,
            ),
        };

        let mut producto: Producto = serde_json::from_value(payload)
            .map_err(|e| SyncError::json("Producto payload", e))?;

        if let Some(ids) = related_ids {
            let mut related = Vec::with_capacity(ids.len());
            for id in ids {
                match store.find_by_id(id)? {
                    Some(found) => related.push(ProductoRef::from(&found)),
                    None => debug!("Dropping unknown related product {}", id),
                }
            }
            producto.productos_relacionados = Some(related);
        }
        Ok(producto)
    }
}

/// Store hook: assign a product code when missing and refresh timestamps.
pub fn prepare_producto(producto: &mut Producto) -> StoreResult<()> {
    let missing_code = producto
        .codigo_producto
        .as_deref()
        .map_or(true, |code| code.trim().is_empty());
    if missing_code {
        producto.codigo_producto = Some(generate_codigo());
    }
    touch(producto)
}

fn generate_codigo() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{}{}", CODE_PREFIX, simple[..8].to_uppercase())
}
