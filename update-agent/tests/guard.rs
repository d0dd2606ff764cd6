//! The crash guard installs a real panic hook, which is process-global
//! state. This file stays a single test so nothing else races the hook.

use std::{
    panic,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use ota_update_agent::{
    bootstrap, guard,
    store::{Durability, StateStore},
};

static PREVIOUS_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn install_is_idempotent_and_chains_the_previous_hook() {
    // Stand-in for the platform's own crash reporting.
    panic::set_hook(Box::new(|_| {
        PREVIOUS_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }));

    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(root.path(), "7").unwrap());
    store
        .mutate(Durability::Buffered, |state| {
            state.set_unzipped_path("/data/ota_unzipped_2/main.jsbundle");
            state.set_version("1.1.0");
            state.set_previous_unzipped_path("/data/ota_unzipped_1/main.jsbundle");
            state.set_previous_version("1.0.0");
            state.set_pending_validation(true);
        })
        .unwrap();

    // Resolving the bundle path arms the guard; only the first install
    // registers a hook.
    let path = bootstrap::resolve_bundle_path(&store);
    assert_eq!(
        path.as_deref().and_then(|p| p.to_str()),
        Some("/data/ota_unzipped_2/main.jsbundle"),
    );
    assert!(!guard::install(&store));

    let caught = panic::catch_unwind(|| panic!("bundle blew up"));
    assert!(caught.is_err());

    // The hook rolled back durably and forwarded to the previous handler
    // exactly once.
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 1);
    assert!(!store.pending_validation());
    assert_eq!(store.version().as_deref(), Some("1.0.0"));
    let history = store.rollback_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "crash_detected");

    // A second fault finds nothing pending and leaves state alone.
    let caught = panic::catch_unwind(|| panic!("unrelated crash"));
    assert!(caught.is_err());
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 2);
    assert_eq!(store.rollback_history().len(), 1);
}
