//! Startup integration point for the host application.

use std::{path::PathBuf, sync::Arc};

use crate::{guard, store::StateStore};

/// Returns the bundle path the host should load, arming the crash guard
/// first so the window between loading the bundle and confirming it is
/// covered.
///
/// `None` means "load the built-in bundle": either nothing was ever
/// activated, or a rollback reset to original. The two are deliberately
/// indistinguishable.
pub fn resolve_bundle_path(store: &Arc<StateStore>) -> Option<PathBuf> {
    guard::install(store);
    store.unzipped_path().map(PathBuf::from)
}
