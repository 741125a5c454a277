//! Filesystem-mediated replication between relaysync nodes.
//!
//! Every node writes its local changes as immutable event files into a
//! shared folder and applies the files written by every other node. This
//! crate provides the pieces of that loop:
//!
//! - [`NodeIdentity`]: a stable id shared by all services on one host.
//! - [`EntityAdapter`] / [`AdapterRegistry`]: per-type capability tables
//!   over the application's [`EntityStore`]s.
//! - [`ChangeExporter`]: publishes one event file per local write.
//! - [`OperationContext`]: marks replayed writes so they are not re-exported.
//! - [`ChangeImporter`]: applies foreign event files and prunes old ones.
//! - [`SnapshotBootstrap`]: full-state export and one-shot startup import.
//! - [`SyncCoordinator`]: drives bootstrap, polling and scheduled snapshots.
//!
//! # Usage
//!
//! ```ignore
//! use relaysync_core::{AdapterRegistry, BootstrapGate, ChangeImporter, EntityAdapter};
//!
//! let mut registry = AdapterRegistry::new();
//! registry.register(EntityAdapter::for_store::<Proveedor, _>(proveedores));
//! let registry = Arc::new(registry);
//!
//! let gate = Arc::new(BootstrapGate::new());
//! let importer = ChangeImporter::new(folder, node_id, retention, registry, gate)?;
//! let report = importer.poll_once();
//! ```

pub mod adapter;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod exporter;
pub mod importer;
pub mod ledger;
pub mod naming;
pub mod node;
pub mod resolver;
pub mod snapshot;
pub mod status;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types for convenience
pub use adapter::{AdapterBuilder, AdapterRegistry, EntityAdapter, IdentityMatch};
pub use context::{OperationContext, ReplayGuard};
pub use coordinator::{start_sync_coordinator, SyncCoordinator, SyncCoordinatorConfig};
pub use error::{Result, SyncError};
pub use event::{Snapshot, SyncAction, SyncEvent};
pub use exporter::ChangeExporter;
pub use importer::{ApplyOutcome, ChangeImporter, PollReport};
pub use ledger::ProcessedLedger;
pub use naming::EventFileName;
pub use node::{generate_node_id, IdentitySource, NodeIdentity};
pub use resolver::{Applied, ResolveOrder};
pub use snapshot::{
    select_snapshot, BootstrapGate, BootstrapState, ImportOutcome, SnapshotBootstrap,
    SnapshotCandidate, SnapshotImportReport,
};
pub use status::SyncStatus;
pub use store::{EntityId, EntityStore, StoreError, StoreResult, SyncEntity};
