//! Rollback-on-crash protection for bundles pending validation.

use std::{
    panic,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ota_update_agent_core::RollbackReason;
use tracing::{debug, error, warn};

use crate::{
    manager,
    store::{Durability, StateStore},
};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the process-wide crash guard. Idempotent: returns `true` only
/// when this call armed the hook, meaning a bundle was pending validation
/// and no earlier call installed it.
///
/// A confirmed bundle gets no hook at all; an ordinary crash must never
/// touch bundle state.
pub fn install(store: &Arc<StateStore>) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }
    if !store.pending_validation() {
        debug!("bundle is confirmed; crash guard not armed");
        return false;
    }
    warn!("bundle is pending validation; arming crash guard");
    let store = Arc::clone(store);
    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        handle_fault(&store);
        // Whatever crash reporting was installed before still runs.
        previous_hook(info);
    }));
    true
}

/// The fault path. Re-checks the pending flag, since a racing confirm may
/// have cleared it after the hook was armed, then rolls back with synced
/// writes: the process may die the moment this returns.
pub fn handle_fault(store: &StateStore) {
    if !store.pending_validation() {
        debug!("fault observed but bundle already confirmed; not rolling back");
        return;
    }
    warn!("fault while bundle is pending validation; rolling back");
    if let Err(err) =
        manager::execute_rollback(store, RollbackReason::CrashDetected, Durability::Synced)
    {
        error!("crash rollback failed to persist: {err}");
    }
}
