/// Background driver for snapshot bootstrap, periodic import and scheduled snapshots
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, Interval};
use tracing::{debug, error, info};

use crate::importer::{ChangeImporter, PollReport};
use crate::snapshot::{SnapshotBootstrap, SnapshotImportReport};

/// Configuration for the sync coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCoordinatorConfig {
    /// Delay between import polls
    pub poll_interval: Duration,
    /// Period of full snapshot exports, if any
    pub snapshot_export_interval: Option<Duration>,
}

impl Default for SyncCoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            snapshot_export_interval: None,
        }
    }
}

impl From<&relaysync_config::SyncConfig> for SyncCoordinatorConfig {
    fn from(config: &relaysync_config::SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            snapshot_export_interval: config.snapshot_export_interval(),
        }
    }
}

pub struct SyncCoordinator {
    importer: Arc<ChangeImporter>,
    bootstrap: Arc<SnapshotBootstrap>,
    config: SyncCoordinatorConfig,
}

impl SyncCoordinator {
    pub fn new(
        importer: Arc<ChangeImporter>,
        bootstrap: Arc<SnapshotBootstrap>,
        config: SyncCoordinatorConfig,
    ) -> Self {
        Self {
            importer,
            bootstrap,
            config,
        }
    }

    /// Bootstrap once, then poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting sync coordinator for node {} with poll interval {:?}",
            self.importer.node_id(),
            self.config.poll_interval
        );

        self.run_bootstrap().await;

        let mut poll = time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut export = self.config.snapshot_export_interval.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_poll_cycle().await {
                        error!("Poll cycle failed: {}", e);
                    }
                }
                _ = next_tick(&mut export) => {
                    if let Err(e) = self.run_snapshot_export().await {
                        error!("Scheduled snapshot export failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Run the startup snapshot import off the async runtime.
    pub async fn run_bootstrap(&self) -> Option<SnapshotImportReport> {
        let bootstrap = self.bootstrap.clone();
        match task::spawn_blocking(move || bootstrap.import_if_needed()).await {
            Ok(report) => {
                debug!("Bootstrap outcome: {:?}", report.outcome);
                Some(report)
            }
            Err(e) => {
                error!("Snapshot bootstrap task failed: {}", e);
                self.bootstrap.gate().mark_completed();
                None
            }
        }
    }

    /// Run a single import poll
    pub async fn run_poll_cycle(&self) -> Result<PollReport> {
        let importer = self.importer.clone();
        let report = task::spawn_blocking(move || importer.poll_once()).await?;
        Ok(report)
    }

    async fn run_snapshot_export(&self) -> Result<()> {
        let bootstrap = self.bootstrap.clone();
        let path = task::spawn_blocking(move || bootstrap.export_full_snapshot()).await??;
        debug!("Scheduled snapshot written to {}", path.display());
        Ok(())
    }

    /// Handle cleanup on shutdown
    pub async fn shutdown(&self) {
        info!("Shutting down sync coordinator");
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Start the sync coordinator as a background task
pub async fn start_sync_coordinator(
    importer: Arc<ChangeImporter>,
    bootstrap: Arc<SnapshotBootstrap>,
    config: SyncCoordinatorConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let coordinator = Arc::new(SyncCoordinator::new(importer, bootstrap, config));

    tokio::spawn(async move {
        coordinator.start(shutdown).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRegistry, EntityAdapter};
    use crate::context::OperationContext;
    use crate::event::SyncAction;
    use crate::exporter::ChangeExporter;
    use crate::snapshot::BootstrapGate;
    use crate::store::EntityStore;
    use crate::test_support::{Item, ItemStore};
    use relaysync_config::SyncConfig;
    use std::path::Path;
    use tempfile::tempdir;

    fn parts(
        folder: &Path,
        store: Arc<ItemStore>,
    ) -> (Arc<ChangeImporter>, Arc<SnapshotBootstrap>) {
        let mut registry = AdapterRegistry::new();
        registry.register(EntityAdapter::for_store::<Item, _>(store));
        let registry = Arc::new(registry);
        let gate = Arc::new(BootstrapGate::new());
        let importer = ChangeImporter::new(
            folder,
            "NODE_B",
            Duration::from_secs(3600),
            registry.clone(),
            gate.clone(),
        )
        .expect("importer");
        let bootstrap = SnapshotBootstrap::new(folder, "inventario", "NODE_B", registry, gate);
        (Arc::new(importer), Arc::new(bootstrap))
    }

    #[test]
    fn config_from_sync_config() {
        let mut config = SyncConfig::default();
        config.poll_interval_secs = 2;
        config.snapshot_export_interval_secs = Some(600);

        let coordinator = SyncCoordinatorConfig::from(&config);
        assert_eq!(coordinator.poll_interval, Duration::from_secs(2));
        assert_eq!(
            coordinator.snapshot_export_interval,
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn bootstrap_then_poll_applies_events() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(ItemStore::default());
        let (importer, bootstrap) = parts(dir.path(), store.clone());
        let coordinator = SyncCoordinator::new(
            importer,
            bootstrap.clone(),
            SyncCoordinatorConfig::default(),
        );

        ChangeExporter::new(dir.path(), "NODE_A").export_change(
            &OperationContext::new(),
            &Item::named("Acme"),
            SyncAction::Save,
        );

        let gated = coordinator.run_poll_cycle().await.expect("poll");
        assert!(gated.gated);

        coordinator.run_bootstrap().await.expect("bootstrap report");
        assert!(bootstrap.is_completed());

        let report = coordinator.run_poll_cycle().await.expect("poll");
        assert_eq!(report.applied, 1);
        assert_eq!(store.find_all().expect("all").len(), 1);
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(ItemStore::default());
        let (importer, bootstrap) = parts(dir.path(), store);
        let config = SyncCoordinatorConfig {
            poll_interval: Duration::from_millis(10),
            snapshot_export_interval: Some(Duration::from_millis(10)),
        };
        let (tx, rx) = watch::channel(false);

        let handle = start_sync_coordinator(importer.clone(), bootstrap, config, rx).await;
        time::sleep(Duration::from_millis(100)).await;
        tx.send(true).expect("send shutdown");

        time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("coordinator stopped")
            .expect("join");
        assert!(importer.last_report().is_some());
        assert!(dir
            .path()
            .join("snapshot_full_inventario_NODE_B.json")
            .exists());
    }
}
