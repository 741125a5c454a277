//! Simple catalog records keyed by a unique `nombre`.

use chrono::{Local, NaiveDateTime};
use relaysync_core::resolver::normalize_key;
use relaysync_core::{EntityId, StoreResult, SyncEntity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipoProducto {
    pub id: Option<EntityId>,
    pub nombre: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl SyncEntity for TipoProducto {
    const TYPE_NAME: &'static str = "TipoProducto";
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

impl Timestamped for TipoProducto {
    fn timestamps(&mut self) -> (&mut Option<NaiveDateTime>, &mut Option<NaiveDateTime>) {
        (&mut self.created_at, &mut self.updated_at)
    }
}

/// Named exchange rate, e.g. "oficial" or "blue".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dolar {
    pub id: Option<EntityId>,
    pub nombre: Option<String>,
    pub compra: Option<f64>,
    pub venta: Option<f64>,
    pub fecha_actualizacion: Option<NaiveDateTime>,
}

impl SyncEntity for Dolar {
    const TYPE_NAME: &'static str = "Dolar";
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

/// Records carrying creation and update times.
pub trait Timestamped {
    fn timestamps(&mut self) -> (&mut Option<NaiveDateTime>, &mut Option<NaiveDateTime>);
}

/// Store hook: set `createdAt` once and `updatedAt` on every save.
pub fn touch<T: Timestamped>(record: &mut T) -> StoreResult<()> {
    let now = Local::now().naive_local();
    let (created_at, updated_at) = record.timestamps();
    created_at.get_or_insert(now);
    *updated_at = Some(now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn touch_keeps_creation_time() {
        let mut tipo = TipoProducto::default();
        touch(&mut tipo).expect("touch");
        let created = tipo.created_at.expect("created");

        touch(&mut tipo).expect("touch");
        assert_eq!(tipo.created_at, Some(created));
        assert!(tipo.updated_at.expect("updated") >= created);
    }

    #[test]
    fn dolar_merge_keeps_missing_quotes() {
        let mut local = Dolar {
            id: Some(1),
            nombre: Some("blue".into()),
            compra: Some(1180.0),
            venta: Some(1200.0),
            fecha_actualizacion: None,
        };
        let incoming: Dolar =
            serde_json::from_value(json!({"id": 9, "nombre": "Blue", "venta": 1215.5})).unwrap();

        local.merge_from(&incoming).expect("merge");
        assert_eq!(local.id, Some(1));
        assert_eq!(local.nombre.as_deref(), Some("Blue"));
        assert_eq!(local.compra, Some(1180.0));
        assert_eq!(local.venta, Some(1215.5));
    }
}
