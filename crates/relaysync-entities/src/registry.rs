//! Wiring of the business tables into the replication core.

use std::path::Path;
use std::sync::Arc;

use relaysync_core::{AdapterRegistry, ChangeExporter, EntityAdapter, StoreResult, SyncEntity};
use tracing::info;

use crate::catalog::{touch, Dolar, TipoProducto};
use crate::memory::MemoryStore;
use crate::producto::{prepare_producto, producto_decoder, Producto};
use crate::proveedor::{identity_by_nombre, Proveedor};
use crate::usuario::{encode_password_on_save, usuario_decoder, Authority, Usuario};

/// All tables of one service.
pub struct EntityStores {
    pub proveedores: Arc<MemoryStore<Proveedor>>,
    pub productos: Arc<MemoryStore<Producto>>,
    pub tipos_producto: Arc<MemoryStore<TipoProducto>>,
    pub dolares: Arc<MemoryStore<Dolar>>,
    pub usuarios: Arc<MemoryStore<Usuario>>,
    /// Roles are local only; users carry them by name.
    pub authorities: Arc<MemoryStore<Authority>>,
}

impl EntityStores {
    /// Volatile tables, optionally exporting local writes.
    pub fn in_memory(exporter: Option<Arc<ChangeExporter>>) -> Self {
        Self::assemble(
            MemoryStore::new(),
            MemoryStore::new(),
            MemoryStore::new(),
            MemoryStore::new(),
            MemoryStore::new(),
            MemoryStore::new(),
            exporter,
        )
    }

    /// Tables persisted as JSON files under `data_dir`.
    pub fn open(data_dir: &Path, exporter: Option<Arc<ChangeExporter>>) -> StoreResult<Self> {
        let stores = Self::assemble(
            MemoryStore::open(data_dir)?,
            MemoryStore::open(data_dir)?,
            MemoryStore::open(data_dir)?,
            MemoryStore::open(data_dir)?,
            MemoryStore::open(data_dir)?,
            MemoryStore::open(data_dir)?,
            exporter,
        );
        info!(
            "Opened entity stores in {} ({} proveedores, {} productos, {} usuarios)",
            data_dir.display(),
            stores.proveedores.len(),
            stores.productos.len(),
            stores.usuarios.len()
        );
        Ok(stores)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        proveedores: MemoryStore<Proveedor>,
        productos: MemoryStore<Producto>,
        tipos_producto: MemoryStore<TipoProducto>,
        dolares: MemoryStore<Dolar>,
        usuarios: MemoryStore<Usuario>,
        authorities: MemoryStore<Authority>,
        exporter: Option<Arc<ChangeExporter>>,
    ) -> Self {
        Self {
            proveedores: attach(proveedores.with_before_save(touch::<Proveedor>), &exporter),
            productos: attach(productos.with_before_save(prepare_producto), &exporter),
            tipos_producto: attach(
                tipos_producto.with_before_save(touch::<TipoProducto>),
                &exporter,
            ),
            dolares: attach(dolares, &exporter),
            usuarios: attach(usuarios.with_before_save(encode_password_on_save), &exporter),
            authorities: Arc::new(authorities),
        }
    }

    /// Adapters for every replicated type.
    pub fn registry(&self) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry
            .register(
                EntityAdapter::builder::<Proveedor, _>(self.proveedores.clone())
                    .identity_override(identity_by_nombre(self.proveedores.clone()))
                    .build(),
            )
            .register(
                EntityAdapter::builder::<Producto, _>(self.productos.clone())
                    .decoder(producto_decoder(self.productos.clone()))
                    .build(),
            )
            .register(EntityAdapter::for_store::<TipoProducto, _>(
                self.tipos_producto.clone(),
            ))
            .register(EntityAdapter::for_store::<Dolar, _>(self.dolares.clone()))
            .register(
                EntityAdapter::builder::<Usuario, _>(self.usuarios.clone())
                    .decoder(usuario_decoder(self.authorities.clone()))
                    .build(),
            );
        registry
    }
}

fn attach<T: SyncEntity>(
    store: MemoryStore<T>,
    exporter: &Option<Arc<ChangeExporter>>,
) -> Arc<MemoryStore<T>> {
    Arc::new(match exporter {
        Some(exporter) => store.with_exporter(exporter.clone()),
        None => store,
    })
}
