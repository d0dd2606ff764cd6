//! The bundle lifecycle: check, download, activate, confirm, roll back.

use std::{path::PathBuf, sync::Arc};

use ota_update_agent_core::{
    descriptor, rollback::ORIGINAL_BUNDLE, RollbackReason, RollbackRecord, VersionDescriptor,
};
use tracing::{debug, info, warn};

use crate::{
    fetcher::{BundleFetcher, ProgressFn},
    retention,
    store::{Durability, StateStore},
};

/// Consecutive rollbacks tolerated before the agent abandons OTA bundles and
/// resets to the host's built-in code.
pub const MAX_ROLLBACK_COUNT: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no version check URL was provided and none is stored")]
    NoCheckUrl,
    #[error("failed fetching bundle data")]
    Fetch(#[from] crate::fetcher::Error),
    #[error("failed parsing remote version descriptor")]
    Descriptor(#[from] descriptor::Error),
    #[error("failed persisting bundle state")]
    Store(#[from] crate::store::Error),
}

/// Outcome of one scheduled check-and-download cycle.
#[derive(Debug)]
pub enum CheckCycle {
    UpToDate,
    Installed(PathBuf),
}

pub struct UpdateManager {
    store: Arc<StateStore>,
    fetcher: BundleFetcher,
}

impl UpdateManager {
    pub fn new(store: Arc<StateStore>, fetcher: BundleFetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Asks the version check URL (the argument wins over the stored one)
    /// whether a bundle other than the current one is available.
    /// Blacklisted versions are reported as "no update", forever.
    pub fn check_for_update(&self, version_check_url: Option<&str>) -> Result<bool, Error> {
        let url = version_check_url
            .map(str::to_owned)
            .or_else(|| self.store.version_check_url())
            .ok_or(Error::NoCheckUrl)?;
        let body = self.fetcher.download_text(&url)?;
        let descriptor = VersionDescriptor::parse(&body)?;
        let remote = descriptor.version;

        if self.store.blacklisted_versions().iter().any(|v| *v == remote) {
            info!(version = %remote, "remote version was rolled back before; not offering it");
            return Ok(false);
        }
        let current = self.store.version();
        let has_update = current.as_deref() != Some(remote.as_str());
        debug!(%remote, current = current.as_deref().unwrap_or(""), has_update);
        Ok(has_update)
    }

    /// Downloads, extracts, and activates the bundle at `download_url`.
    ///
    /// The previous-bundle rotation and the pending-validation flag are
    /// committed before the download starts: if the process dies anywhere in
    /// the window, the crash guard finds a previous bundle to fall back to.
    /// The write order is part of the crash contract; do not reorder.
    ///
    /// A failed download leaves the rotation in place with the previous
    /// bundle equal to the still-active current one, so a subsequent crash
    /// rolls back onto the same bundle. Harmless, but it blacklists the
    /// current version and spends one rollback.
    pub fn download_and_activate(
        &self,
        download_url: &str,
        version_check_url: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf, Error> {
        self.store.mutate(Durability::Buffered, |state| {
            let current_path = state.unzipped_path();
            let current_version = state.version();
            if let Some(path) = current_path {
                state.set_previous_unzipped_path(&path);
                state.set_previous_version(current_version.as_deref().unwrap_or(""));
            }
            state.set_download_url(download_url);
            if let Some(url) = version_check_url {
                state.set_version_check_url(url);
            }
            state.set_rollback_count(0);
            state.set_pending_validation(true);
        })?;

        let fetched = self
            .fetcher
            .fetch_and_extract(download_url, version_check_url, progress)?;
        let bundle_path = fetched.content_dir.join(&fetched.bundle_file_name);

        self.store.mutate(Durability::Buffered, |state| {
            state.set_unzipped_path(&bundle_path.to_string_lossy());
            state.set_bundle_name(&fetched.bundle_file_name);
            match &fetched.version {
                Some(version) => state.set_version(version),
                None => warn!("no version resolved; keeping the stored one"),
            }
        })?;

        let referenced: Vec<PathBuf> = [self.store.unzipped_path(), self.store.previous_unzipped_path()]
            .into_iter()
            .flatten()
            .map(PathBuf::from)
            .collect();
        retention::sweep(self.fetcher.extract_root(), &referenced);

        info!(
            version = fetched.version.as_deref().unwrap_or("unknown"),
            path = %bundle_path.display(),
            "bundle activated, pending validation"
        );
        Ok(fetched.content_dir)
    }

    /// Like [`Self::download_and_activate`], but off-thread. The receiver
    /// yields the outcome exactly once; dropping it detaches the download.
    pub fn download_and_activate_background(
        self: &Arc<Self>,
        download_url: String,
        version_check_url: Option<String>,
        progress: Option<ProgressFn>,
    ) -> flume::Receiver<Result<PathBuf, Error>> {
        let (tx, rx) = flume::bounded(1);
        let manager = Arc::clone(self);
        std::thread::spawn(move || {
            let result = manager.download_and_activate(
                &download_url,
                version_check_url.as_deref(),
                progress.as_ref(),
            );
            let _ = tx.send(result);
        });
        rx
    }

    /// Marks the active bundle as good, disarming crash rollback until the
    /// next activation.
    pub fn confirm_bundle(&self) -> Result<(), Error> {
        self.store
            .mutate(Durability::Buffered, |state| state.set_pending_validation(false))?;
        info!("bundle confirmed");
        Ok(())
    }

    /// Rolls back to the previous bundle (or to the built-in code when none
    /// exists or the rollback budget is spent). Returns `true`; the protocol
    /// itself cannot fail, only persisting it can.
    pub fn rollback_to_previous_bundle(&self) -> Result<bool, Error> {
        execute_rollback(&self.store, RollbackReason::Manual, Durability::Buffered)?;
        Ok(true)
    }

    /// Rolls back and labels the history entry with a host-supplied reason.
    pub fn mark_current_bundle_as_bad(&self, reason: &str) -> Result<(), Error> {
        execute_rollback(&self.store, RollbackReason::Manual, Durability::Buffered)?;
        let reason = RollbackReason::Other(reason.to_owned());
        self.store.mutate(Durability::Buffered, |state| {
            state.set_last_rollback_reason(reason.as_str());
        })?;
        Ok(())
    }

    /// One scheduled cycle: check, and when an update exists, download and
    /// activate it. Without a dedicated download URL the check URL serves
    /// the archive too.
    pub fn run_check_cycle(
        &self,
        version_check_url: &str,
        download_url: Option<&str>,
    ) -> Result<CheckCycle, Error> {
        if !self.check_for_update(Some(version_check_url))? {
            debug!("already up to date");
            return Ok(CheckCycle::UpToDate);
        }
        let url = download_url.unwrap_or(version_check_url);
        let content_dir = self.download_and_activate(url, Some(version_check_url), None)?;
        Ok(CheckCycle::Installed(content_dir))
    }

    pub fn current_version(&self) -> Option<String> {
        self.store.version()
    }

    pub fn current_bundle_path(&self) -> Option<PathBuf> {
        self.store.unzipped_path().map(PathBuf::from)
    }

    pub fn previous_version(&self) -> Option<String> {
        self.store.previous_version()
    }

    pub fn blacklisted_versions(&self) -> Vec<String> {
        self.store.blacklisted_versions()
    }

    pub fn rollback_history(&self) -> Vec<RollbackRecord> {
        self.store.rollback_history()
    }

    /// Returns history entries not yet handed out and advances the cursor,
    /// so each rollback is reported to the host exactly once.
    pub fn take_unreported_rollbacks(&self) -> Result<Vec<RollbackRecord>, Error> {
        let history = self.store.rollback_history();
        let notified = self.store.notified_rollback_count();
        if notified >= history.len() {
            return Ok(Vec::new());
        }
        let fresh = history[notified..].to_vec();
        self.store.mutate(Durability::Buffered, |state| {
            state.set_notified_rollback_count(history.len());
        })?;
        Ok(fresh)
    }

    /// Wipes every stored value for this app version. Extracted files are
    /// left for the next retention sweep.
    pub fn clear_all_data(&self) -> Result<(), Error> {
        self.store
            .mutate(Durability::Buffered, |state| state.clear_namespace())?;
        info!("cleared all bundle state");
        Ok(())
    }
}

/// The rollback protocol, shared by the manual entry points and the crash
/// guard. Runs as one atomic mutation:
///
/// 1. blacklist the current version (deduplicated),
/// 2. increment the rollback counter,
/// 3. promote the previous bundle, unless the counter exceeded its budget or
///    no previous bundle exists, in which case current resets to the
///    built-in code and the counter to zero,
/// 4. append a history record (`max_rollbacks_exceeded` overrides the given
///    reason when the budget ran out),
/// 5. clear the pending-validation flag.
pub(crate) fn execute_rollback(
    store: &StateStore,
    reason: RollbackReason,
    durability: Durability,
) -> Result<(), crate::store::Error> {
    store.mutate(durability, |state| {
        let from_version = state.version();
        let previous_path = state.previous_unzipped_path();
        let previous_version = state.previous_version();

        if let Some(version) = &from_version {
            state.push_blacklisted_version(version);
        }
        let count = state.rollback_count() + 1;
        state.set_rollback_count(count);

        let budget_spent = count > MAX_ROLLBACK_COUNT;
        let reason = if budget_spent {
            RollbackReason::MaxRollbacksExceeded
        } else {
            reason
        };

        let target = if budget_spent { None } else { previous_path };
        let to_version = match target {
            None => {
                state.set_unzipped_path("");
                state.set_version("");
                state.set_rollback_count(0);
                ORIGINAL_BUNDLE.to_owned()
            }
            Some(path) => {
                state.set_unzipped_path(&path);
                state.set_version(previous_version.as_deref().unwrap_or(""));
                state.set_previous_unzipped_path("");
                state.set_previous_version("");
                previous_version.unwrap_or_else(|| "unknown".to_owned())
            }
        };

        warn!(
            from = from_version.as_deref().unwrap_or("unknown"),
            to = %to_version,
            reason = %reason,
            "rolling back bundle"
        );
        state.push_rollback_record(RollbackRecord {
            timestamp: crate::now_millis(),
            from_version: from_version.unwrap_or_else(|| "unknown".to_owned()),
            to_version,
            reason: reason.to_string(),
        });
        state.set_pending_validation(false);
    })
}
