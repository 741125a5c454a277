//! Assembly of one replicating service from its configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use relaysync_config::SyncConfig;
use relaysync_core::{
    AdapterRegistry, BootstrapGate, ChangeExporter, ChangeImporter, EntityAdapter, NodeIdentity,
    SnapshotBootstrap, SyncStatus,
};
use relaysync_entities::EntityStores;
use tracing::{info, warn};

pub struct SyncNode {
    pub config: SyncConfig,
    pub identity: NodeIdentity,
    pub registry: Arc<AdapterRegistry>,
    pub gate: Arc<BootstrapGate>,
    pub importer: Arc<ChangeImporter>,
    pub bootstrap: Arc<SnapshotBootstrap>,
}

impl SyncNode {
    pub fn open(config: SyncConfig) -> Result<Self> {
        let identity = NodeIdentity::resolve(config.configured_node_id(), &config.node_id_file);
        if identity.is_degraded() {
            warn!(
                "Node id {} is not persisted; peers will see a new node after restart",
                identity.id()
            );
        }

        let exporter = Arc::new(ChangeExporter::new(&config.folder_path, identity.id()));
        let stores = EntityStores::open(&config.data_dir, Some(exporter))
            .with_context(|| format!("opening entity stores in {}", config.data_dir.display()))?;
        let registry = Arc::new(stores.registry());
        let gate = Arc::new(BootstrapGate::new());

        let importer = ChangeImporter::new(
            &config.folder_path,
            identity.id(),
            config.retention(),
            registry.clone(),
            gate.clone(),
        )
        .context("loading processed-file ledger")?;
        let bootstrap = SnapshotBootstrap::new(
            &config.folder_path,
            &config.app_name,
            identity.id(),
            registry.clone(),
            gate.clone(),
        )
        .with_import_enabled(config.import_enabled);

        info!(
            "Node {} ready: app {}, folder {}, types {:?}",
            identity.id(),
            config.app_name,
            config.folder_path.display(),
            registry.type_names()
        );

        Ok(Self {
            config,
            identity,
            registry,
            gate,
            importer: Arc::new(importer),
            bootstrap: Arc::new(bootstrap),
        })
    }

    pub fn adapter(&self, entity_type: &str) -> Result<&Arc<EntityAdapter>> {
        self.registry.get(entity_type).with_context(|| {
            format!(
                "unknown entity type {} (known: {})",
                entity_type,
                self.registry.type_names().join(", ")
            )
        })
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::collect(
            &self.identity,
            &self.config.app_name,
            &self.importer,
            &self.gate,
            self.config.import_enabled,
        )
    }
}
