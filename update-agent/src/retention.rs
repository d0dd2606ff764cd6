//! Bounded retention of extracted bundle directories.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::fetcher::EXTRACT_DIR_PREFIX;

/// How many extraction directories survive a sweep, newest first.
pub const KEEP_MOST_RECENT: usize = 2;

/// Deletes all but the [`KEEP_MOST_RECENT`] newest `ota_unzipped_<millis>`
/// directories under `root`. Directories containing any of the `referenced`
/// paths are never deleted, whatever their age. Failures are logged and
/// skipped; a sweep must never fail an activation.
pub fn sweep(root: &Path, referenced: &[PathBuf]) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(root = %root.display(), "skipping retention sweep: {err}");
            return;
        }
    };

    let mut dirs: Vec<(u64, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stamp = name.to_str()?.strip_prefix(EXTRACT_DIR_PREFIX)?;
            // Unparseable timestamps sort as oldest.
            let timestamp = stamp.parse().unwrap_or(0);
            Some((timestamp, entry.path()))
        })
        .collect();

    if dirs.len() <= KEEP_MOST_RECENT {
        debug!(count = dirs.len(), "nothing to sweep");
        return;
    }
    dirs.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, dir) in dirs.into_iter().skip(KEEP_MOST_RECENT) {
        if referenced.iter().any(|path| path.starts_with(&dir)) {
            info!(dir = %dir.display(), "keeping old extraction dir, still referenced");
            continue;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!(dir = %dir.display(), "deleted old extraction dir"),
            Err(err) => warn!(dir = %dir.display(), "failed deleting extraction dir: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction_dir(root: &Path, suffix: &str) -> PathBuf {
        let dir = root.join(format!("{EXTRACT_DIR_PREFIX}{suffix}"));
        fs::create_dir(&dir).unwrap();
        dir
    }

    #[test]
    fn keeps_two_newest_and_referenced() {
        let root = tempfile::tempdir().unwrap();
        let d1 = extraction_dir(root.path(), "100");
        let d2 = extraction_dir(root.path(), "200");
        let d3 = extraction_dir(root.path(), "300");
        let d4 = extraction_dir(root.path(), "400");
        let d5 = extraction_dir(root.path(), "500");

        let referenced = vec![d2.join("bundles").join("main.jsbundle")];
        sweep(root.path(), &referenced);

        assert!(!d1.exists());
        assert!(d2.exists(), "referenced dir must survive");
        assert!(!d3.exists());
        assert!(d4.exists());
        assert!(d5.exists());
    }

    #[test]
    fn unparseable_timestamp_is_deleted_first() {
        let root = tempfile::tempdir().unwrap();
        let junk = extraction_dir(root.path(), "not-a-number");
        let d1 = extraction_dir(root.path(), "100");
        let d2 = extraction_dir(root.path(), "200");

        sweep(root.path(), &[]);

        assert!(!junk.exists());
        assert!(d1.exists());
        assert!(d2.exists());
    }

    #[test]
    fn ignores_unrelated_entries() {
        let root = tempfile::tempdir().unwrap();
        let other = root.path().join("downloads");
        fs::create_dir(&other).unwrap();
        fs::write(root.path().join("ota_state.json"), b"{}").unwrap();
        let d1 = extraction_dir(root.path(), "100");
        let d2 = extraction_dir(root.path(), "200");
        let d3 = extraction_dir(root.path(), "300");

        sweep(root.path(), &[]);

        assert!(other.exists());
        assert!(root.path().join("ota_state.json").exists());
        assert!(!d1.exists());
        assert!(d2.exists() && d3.exists());
    }
}
