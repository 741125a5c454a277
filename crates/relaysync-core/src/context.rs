//! Per-operation sync context.
//!
//! An [`OperationContext`] is created for every unit of work (one local
//! request, one imported file, one snapshot record) and passed down to the
//! store. While a [`ReplayGuard`] is alive the context reports that it is
//! replaying a remote change, and the exporter stays silent. The context
//! is `!Sync` and never shared between units of work.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use crate::event::SyncAction;
use crate::store::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExportKey {
    entity_type: &'static str,
    id: EntityId,
    action: SyncAction,
}

#[derive(Debug, Default)]
pub struct OperationContext {
    replay_depth: Cell<u32>,
    exported: RefCell<HashSet<ExportKey>>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this operation is applying a change that came from another node.
    pub fn is_replaying(&self) -> bool {
        self.replay_depth.get() > 0
    }

    /// Mark the operation as replaying until the returned guard is dropped.
    ///
    /// Guards nest; the flag clears when the outermost guard goes away,
    /// including during unwinding.
    pub fn enter_replay(&self) -> ReplayGuard<'_> {
        self.replay_depth.set(self.replay_depth.get() + 1);
        ReplayGuard { ctx: self }
    }

    /// Record an export of `(entity_type, id, action)`.
    ///
    /// Returns `false` if the same tuple was already exported in this operation.
    pub fn claim_export(&self, entity_type: &'static str, id: EntityId, action: SyncAction) -> bool {
        self.exported.borrow_mut().insert(ExportKey {
            entity_type,
            id,
            action,
        })
    }
}

/// Clears the replay flag on drop.
#[must_use = "the replay flag is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReplayGuard<'a> {
    ctx: &'a OperationContext,
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        let depth = self.ctx.replay_depth.get();
        self.ctx.replay_depth.set(depth.saturating_sub(1));
    }
}
