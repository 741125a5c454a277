//! Replicated business records for relaysync nodes.
//!
//! The record types ([`Proveedor`], [`Producto`], [`TipoProducto`], [`Dolar`],
//! [`Usuario`]) and a JSON-file backed [`MemoryStore`] that implements
//! [`relaysync_core::EntityStore`] for each of them. [`EntityStores`] opens
//! every table of a service and builds the matching
//! [`relaysync_core::AdapterRegistry`].

pub mod catalog;
pub mod memory;
pub mod producto;
pub mod proveedor;
pub mod registry;
pub mod usuario;

pub use catalog::{Dolar, TipoProducto};
pub use memory::MemoryStore;
pub use producto::{Producto, ProductoRef};
pub use proveedor::{CuentaBancaria, Proveedor, RazonSocial};
pub use registry::EntityStores;
pub use usuario::{verify_password, Authority, Usuario, UsuarioSyncDto};
