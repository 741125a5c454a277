//! Two nodes replicating through one shared folder.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use relaysync_core::{
    BootstrapGate, ChangeExporter, ChangeImporter, EntityStore, EventFileName, ImportOutcome,
    OperationContext, SnapshotBootstrap, SyncAction, SyncEvent,
};
use relaysync_entities::{
    verify_password, Authority, CuentaBancaria, Dolar, EntityStores, Proveedor, RazonSocial,
    TipoProducto, Usuario,
};
use serde_json::json;
use tempfile::tempdir;

const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Node {
    id: &'static str,
    stores: EntityStores,
    importer: ChangeImporter,
    bootstrap: SnapshotBootstrap,
}

impl Node {
    fn start(folder: &Path, id: &'static str, app: &str) -> Self {
        let exporter = Arc::new(ChangeExporter::new(folder, id));
        let stores = EntityStores::in_memory(Some(exporter));
        let registry = Arc::new(stores.registry());
        let gate = Arc::new(BootstrapGate::new());
        let importer = ChangeImporter::new(folder, id, RETENTION, registry.clone(), gate.clone())
            .expect("importer");
        let bootstrap = SnapshotBootstrap::new(folder, app, id, registry, gate);
        Self {
            id,
            stores,
            importer,
            bootstrap,
        }
    }

    /// Start with an empty folder: bootstrap finds nothing and opens the gate.
    fn ready(folder: &Path, id: &'static str) -> Self {
        let node = Self::start(folder, id, "inventario");
        let report = node.bootstrap.import_if_needed();
        assert_eq!(report.outcome, ImportOutcome::NoSnapshots);
        node
    }

    fn events_written(&self, folder: &Path) -> usize {
        fs::read_dir(folder)
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| EventFileName::parse(&entry.file_name().to_string_lossy()))
            .filter(|name| name.is_from(self.id))
            .count()
    }
}

fn proveedor(nombre: &str) -> Proveedor {
    Proveedor {
        nombre: Some(nombre.to_string()),
        ..Proveedor::default()
    }
}

fn tipo(nombre: &str) -> TipoProducto {
    TipoProducto {
        nombre: Some(nombre.to_string()),
        ..TipoProducto::default()
    }
}

#[test]
fn local_write_reaches_peer_once_without_echo() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::ready(dir.path(), "NODE_B");

    a.stores
        .tipos_producto
        .save(&OperationContext::new(), tipo("Cables"))
        .expect("save");
    assert_eq!(a.events_written(dir.path()), 1);

    let first = b.importer.poll_once();
    assert_eq!(first.applied, 1);
    let replicated = b
        .stores
        .tipos_producto
        .find_by_natural_key("nombre", "cables")
        .expect("lookup")
        .expect("replicated");
    assert_eq!(replicated.nombre.as_deref(), Some("Cables"));

    // Applying a peer change never produces a new event.
    assert_eq!(b.events_written(dir.path()), 0);

    let second = b.importer.poll_once();
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped_processed, 1);

    let own = a.importer.poll_once();
    assert_eq!(own.applied, 0);
    assert_eq!(own.skipped_own, 1);
}

#[test]
fn deletes_propagate() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::ready(dir.path(), "NODE_B");
    let ctx = OperationContext::new();

    let blue = a
        .stores
        .dolares
        .save(
            &ctx,
            Dolar {
                nombre: Some("blue".into()),
                venta: Some(1200.0),
                ..Dolar::default()
            },
        )
        .expect("save");
    b.importer.poll_once();
    assert_eq!(b.stores.dolares.len(), 1);

    assert!(a
        .stores
        .dolares
        .delete(&OperationContext::new(), &blue)
        .expect("delete"));
    let report = b.importer.poll_once();
    assert_eq!(report.applied, 1);
    assert!(b.stores.dolares.is_empty());
}

#[test]
fn provider_merge_matches_by_name_and_keeps_local_children() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::ready(dir.path(), "NODE_B");

    // Occupies id 1 on B, the id A will give its provider.
    let initech = b
        .stores
        .proveedores
        .save(&OperationContext::new(), proveedor("Initech"))
        .expect("save");
    let local = b
        .stores
        .proveedores
        .save(
            &OperationContext::new(),
            Proveedor {
                ciudad: Some("Rosario".into()),
                razones_sociales: Some(vec![RazonSocial {
                    nombre: Some("Acme SA".into()),
                    cuentas_bancarias: Some(vec![CuentaBancaria {
                        numero_cuenta: Some("001".into()),
                        ..CuentaBancaria::default()
                    }]),
                    ..RazonSocial::default()
                }]),
                ..proveedor("Acme")
            },
        )
        .expect("save");

    let remote = a
        .stores
        .proveedores
        .save(
            &OperationContext::new(),
            Proveedor {
                cuit: Some("30-11111111-1".into()),
                razones_sociales: Some(vec![RazonSocial {
                    nombre: Some("acme sa".into()),
                    cuentas_bancarias: Some(vec![
                        CuentaBancaria {
                            numero_cuenta: Some("001".into()),
                            titular: Some("Acme Sociedad Anonima".into()),
                            ..CuentaBancaria::default()
                        },
                        CuentaBancaria {
                            numero_cuenta: Some("002".into()),
                            ..CuentaBancaria::default()
                        },
                    ]),
                    ..RazonSocial::default()
                }]),
                ..proveedor("ACME ")
            },
        )
        .expect("save");
    assert_eq!(remote.id, initech.id);

    let report = b.importer.poll_once();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(b.stores.proveedores.len(), 2);

    let untouched = b
        .stores
        .proveedores
        .find_by_id(initech.id.expect("id"))
        .expect("lookup")
        .expect("present");
    assert_eq!(untouched.nombre.as_deref(), Some("Initech"));

    let merged = b
        .stores
        .proveedores
        .find_by_id(local.id.expect("id"))
        .expect("lookup")
        .expect("present");
    assert_eq!(merged.cuit.as_deref(), Some("30-11111111-1"));
    assert_eq!(merged.ciudad.as_deref(), Some("Rosario"));
    let razones = merged.razones_sociales.expect("razones");
    assert_eq!(razones.len(), 1);
    let cuentas = razones[0].cuentas_bancarias.as_ref().expect("cuentas");
    assert_eq!(cuentas.len(), 2);
    assert_eq!(cuentas[0].titular.as_deref(), Some("Acme Sociedad Anonima"));
}

#[test]
fn renamed_provider_updates_the_same_row_on_peers() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::ready(dir.path(), "NODE_B");

    let acme = a
        .stores
        .proveedores
        .save(&OperationContext::new(), proveedor("Acme"))
        .expect("save");
    assert_eq!(b.importer.poll_once().applied, 1);

    a.stores
        .proveedores
        .save(
            &OperationContext::new(),
            Proveedor {
                nombre: Some("Acme Corp".into()),
                ..acme.clone()
            },
        )
        .expect("rename");
    let report = b.importer.poll_once();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);

    let rows = b.stores.proveedores.find_all().expect("all");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, acme.id);
    assert_eq!(rows[0].nombre.as_deref(), Some("Acme Corp"));
    assert_eq!(a.stores.proveedores.len(), 1);
}

#[test]
fn same_event_applied_twice_leaves_one_row() {
    let dir = tempdir().expect("tempdir");
    let b = Node::ready(dir.path(), "NODE_B");

    let provider = SyncEvent::new(
        "NODE_A",
        "Proveedor",
        SyncAction::Save,
        &json!({"id": 7, "nombre": "Acme", "cuit": "30-11111111-1"}),
    )
    .expect("event");
    let tipo = SyncEvent::new(
        "NODE_A",
        "TipoProducto",
        SyncAction::Save,
        &json!({"id": 3, "nombre": "Cables"}),
    )
    .expect("event");

    for event in [&provider, &tipo, &provider, &tipo] {
        b.importer.apply_event(event).expect("apply");
    }

    let proveedores = b.stores.proveedores.find_all().expect("all");
    assert_eq!(proveedores.len(), 1);
    assert_eq!(proveedores[0].id, Some(7));
    assert_eq!(proveedores[0].nombre.as_deref(), Some("Acme"));
    assert_eq!(proveedores[0].cuit.as_deref(), Some("30-11111111-1"));

    let tipos = b.stores.tipos_producto.find_all().expect("all");
    assert_eq!(tipos.len(), 1);
    assert_eq!(tipos[0].id, Some(3));
    assert_eq!(tipos[0].nombre.as_deref(), Some("Cables"));
}

#[test]
fn user_password_hash_is_copied_not_rehashed() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::ready(dir.path(), "NODE_B");

    let ana = a
        .stores
        .usuarios
        .save(
            &OperationContext::new(),
            Usuario {
                username: Some("Ana".into()),
                password: Some("s3creto".into()),
                authorities: vec![Authority::named("ROLE_ADMIN")],
                ..Usuario::default()
            },
        )
        .expect("save");
    let hash = ana.password.clone().expect("hash");
    assert!(verify_password(&hash, "s3creto"));

    let report = b.importer.poll_once();
    assert_eq!(report.applied, 1);

    let replicated = b
        .stores
        .usuarios
        .find_by_natural_key("username", "ana")
        .expect("lookup")
        .expect("replicated");
    assert_eq!(replicated.password.as_deref(), Some(hash.as_str()));
    assert!(!replicated.skip_password_encoding);
    assert_eq!(replicated.authorities.len(), 1);
    assert!(b
        .stores
        .authorities
        .find_by_natural_key("name", "role_admin")
        .expect("lookup")
        .is_some());
}

#[test]
fn polling_waits_for_bootstrap() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let b = Node::start(dir.path(), "NODE_B", "inventario");

    a.stores
        .tipos_producto
        .save(&OperationContext::new(), tipo("Cables"))
        .expect("save");

    let gated = b.importer.poll_once();
    assert!(gated.gated);
    assert_eq!(gated.scanned, 0);
    assert!(b.stores.tipos_producto.is_empty());

    b.bootstrap.import_if_needed();
    assert_eq!(b.importer.poll_once().applied, 1);
}

#[test]
fn snapshot_bootstrap_merges_by_name_and_stays_silent() {
    let dir = tempdir().expect("tempdir");
    let a = Node::ready(dir.path(), "NODE_A");
    let ctx = OperationContext::new();
    a.stores.tipos_producto.save(&ctx, tipo("Fichas")).expect("save");
    a.stores.tipos_producto.save(&ctx, tipo("Cables")).expect("save");
    a.bootstrap.export_full_snapshot().expect("snapshot");

    let b = Node::start(dir.path(), "NODE_B", "inventario");
    let local = b
        .stores
        .tipos_producto
        .save(&OperationContext::new(), tipo("CABLES"))
        .expect("save");
    assert_eq!(b.events_written(dir.path()), 1);

    let report = b.bootstrap.import_if_needed();
    assert!(matches!(report.outcome, ImportOutcome::Imported(_)));
    assert_eq!(report.inserted, 1);
    assert_eq!(report.merged, 1);
    assert_eq!(report.failed, 0);
    assert!(b.bootstrap.is_completed());

    assert_eq!(b.stores.tipos_producto.len(), 2);
    let cables = b
        .stores
        .tipos_producto
        .find_by_id(local.id.expect("id"))
        .expect("lookup")
        .expect("present");
    assert_eq!(cables.nombre.as_deref(), Some("Cables"));

    // Snapshot records are applied as replays.
    assert_eq!(b.events_written(dir.path()), 1);

    let again = b.bootstrap.import_if_needed();
    assert_eq!(again.outcome, ImportOutcome::AlreadyCompleted);
}

#[test]
fn unroutable_files_are_skipped() {
    let dir = tempdir().expect("tempdir");
    let b = Node::ready(dir.path(), "NODE_B");

    fs::write(dir.path().join("notas.json"), b"{}").expect("write");
    fs::write(
        dir.path().join("20240101120000000_NODE_A_Desconocido_0a1b2c3d.json"),
        b"{}",
    )
    .expect("write");

    let report = b.importer.poll_once();
    assert_eq!(report.applied, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped_unroutable, 1);
    assert_eq!(report.skipped_unknown_type, 1);
}
