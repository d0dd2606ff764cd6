//! Durable key-value state backing the bundle lifecycle.
//!
//! All state lives in a single JSON file inside the agent workspace. Every
//! key is suffixed with the installed application version, so a host app
//! upgrade starts from a clean slate while the old app's state stays on disk
//! untouched. Writes go through a temp file followed by an atomic rename;
//! rollback writes additionally fsync before the rename because the process
//! may die right after.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use ota_update_agent_core::RollbackRecord;
use serde_json::{Map, Value};
use tracing::warn;

pub const STATE_FILE_NAME: &str = "ota_state.json";

const KEY_UNZIPPED_PATH: &str = "ota_unzipped_path";
const KEY_VERSION: &str = "ota_version";
const KEY_DOWNLOAD_URL: &str = "ota_update_download_url";
const KEY_VERSION_CHECK_URL: &str = "ota_update_version_check_url";
const KEY_BUNDLE_NAME: &str = "ota_bundle_name";
const KEY_PREVIOUS_UNZIPPED_PATH: &str = "ota_previous_unzipped_path";
const KEY_PREVIOUS_VERSION: &str = "ota_previous_version";
const KEY_ROLLBACK_COUNT: &str = "ota_rollback_count";
const KEY_BLACKLISTED_VERSIONS: &str = "ota_blacklisted_versions";
const KEY_ROLLBACK_HISTORY: &str = "ota_rollback_history";
const KEY_PENDING_VALIDATION: &str = "ota_pending_validation";
const KEY_NOTIFIED_ROLLBACK_COUNT: &str = "ota_notified_rollback_count";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed creating state directory at `{path}`")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed reading state file at `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed writing state file at `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How hard a commit must try to reach the disk before returning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Durability {
    /// Temp file + atomic rename. Fine for ordinary lifecycle writes.
    Buffered,
    /// Additionally fsyncs before the rename. Used on the crash path, where
    /// the process is about to die and the rollback must survive it.
    Synced,
}

/// The durable store, namespaced by installed application version.
///
/// The full entry map is cached in memory behind a mutex; every mutation
/// rewrites the whole file. State is tiny (a handful of strings and two
/// short arrays), so this stays cheap.
pub struct StateStore {
    path: PathBuf,
    namespace: String,
    entries: Mutex<Map<String, Value>>,
}

impl StateStore {
    /// Opens (or creates) the state file under `dir`, scoping every key to
    /// `app_version`. A file that fails to parse is treated as empty; the
    /// next commit overwrites it.
    pub fn open(dir: &Path, app_version: &str) -> Result<Self, Error> {
        fs::create_dir_all(dir).map_err(|source| Error::CreateDir {
            path: dir.to_owned(),
            source,
        })?;
        let path = dir.join(STATE_FILE_NAME);
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(path = %path.display(), "state file is not a JSON object; starting empty");
                    Map::new()
                }
                Err(err) => {
                    warn!(path = %path.display(), "state file is corrupt, starting empty: {err}");
                    Map::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(Error::Read { path, source }),
        };
        Ok(Self {
            path,
            namespace: app_version.to_owned(),
            entries: Mutex::new(entries),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs `f` against a writable view of this namespace and commits the
    /// result in a single atomic rewrite. The lock is held for the whole
    /// mutation, so concurrent callers observe either none or all of it.
    pub fn mutate<R>(
        &self,
        durability: Durability,
        f: impl FnOnce(&mut StateWriter<'_>) -> R,
    ) -> Result<R, Error> {
        let mut entries = self.lock();
        let mut writer = StateWriter {
            entries: &mut entries,
            namespace: &self.namespace,
        };
        let result = f(&mut writer);
        self.commit(&entries, durability)?;
        Ok(result)
    }

    fn commit(&self, entries: &Map<String, Value>, durability: Durability) -> Result<(), Error> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let write_err = |source: io::Error| Error::Write {
            path: self.path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        serde_json::to_writer_pretty(&mut tmp, entries)
            .map_err(|err| write_err(io::Error::from(err)))?;
        if durability == Durability::Synced {
            tmp.as_file().sync_all().map_err(write_err)?;
        }
        tmp.persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Typed accessors. Paths and versions treat the empty string as absent;
    // "no current bundle" is stored as "".

    pub fn unzipped_path(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_UNZIPPED_PATH))
    }

    pub fn version(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_VERSION))
    }

    pub fn bundle_name(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_BUNDLE_NAME))
    }

    pub fn download_url(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_DOWNLOAD_URL))
    }

    pub fn version_check_url(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_VERSION_CHECK_URL))
    }

    pub fn previous_unzipped_path(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_PREVIOUS_UNZIPPED_PATH))
    }

    pub fn previous_version(&self) -> Option<String> {
        get_string(&self.lock(), &self.scoped(KEY_PREVIOUS_VERSION))
    }

    pub fn rollback_count(&self) -> u32 {
        get_u64(&self.lock(), &self.scoped(KEY_ROLLBACK_COUNT)) as u32
    }

    pub fn notified_rollback_count(&self) -> usize {
        get_u64(&self.lock(), &self.scoped(KEY_NOTIFIED_ROLLBACK_COUNT)) as usize
    }

    pub fn pending_validation(&self) -> bool {
        self.lock()
            .get(&self.scoped(KEY_PENDING_VALIDATION))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn blacklisted_versions(&self) -> Vec<String> {
        get_array(&self.lock(), &self.scoped(KEY_BLACKLISTED_VERSIONS))
    }

    pub fn rollback_history(&self) -> Vec<RollbackRecord> {
        get_array(&self.lock(), &self.scoped(KEY_ROLLBACK_HISTORY))
    }

    fn scoped(&self, name: &str) -> String {
        scoped(name, &self.namespace)
    }
}

fn scoped(name: &str, namespace: &str) -> String {
    format!("{name}_{namespace}")
}

fn get_string(entries: &Map<String, Value>, key: &str) -> Option<String> {
    entries
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn get_u64(entries: &Map<String, Value>, key: &str) -> u64 {
    match entries.get(key) {
        None => 0,
        Some(value) => value.as_u64().unwrap_or_else(|| {
            warn!(key, "stored counter is not a number; treating as 0");
            0
        }),
    }
}

/// Reads a JSON array field, falling back to empty when the stored value
/// fails to deserialize. A corrupt list must never block a rollback.
fn get_array<T: serde::de::DeserializeOwned>(
    entries: &Map<String, Value>,
    key: &str,
) -> Vec<T> {
    match entries.get(key) {
        None => Vec::new(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!(key, "stored list is corrupt, treating as empty: {err}");
            Vec::new()
        }),
    }
}

/// Writable view handed to [`StateStore::mutate`] closures. Reads observe
/// writes made earlier in the same closure.
pub struct StateWriter<'a> {
    entries: &'a mut Map<String, Value>,
    namespace: &'a str,
}

impl StateWriter<'_> {
    pub fn unzipped_path(&self) -> Option<String> {
        get_string(self.entries, &self.scoped(KEY_UNZIPPED_PATH))
    }

    pub fn version(&self) -> Option<String> {
        get_string(self.entries, &self.scoped(KEY_VERSION))
    }

    pub fn previous_unzipped_path(&self) -> Option<String> {
        get_string(self.entries, &self.scoped(KEY_PREVIOUS_UNZIPPED_PATH))
    }

    pub fn previous_version(&self) -> Option<String> {
        get_string(self.entries, &self.scoped(KEY_PREVIOUS_VERSION))
    }

    pub fn rollback_count(&self) -> u32 {
        get_u64(self.entries, &self.scoped(KEY_ROLLBACK_COUNT)) as u32
    }

    pub fn set_unzipped_path(&mut self, path: &str) {
        self.set(KEY_UNZIPPED_PATH, Value::from(path));
    }

    pub fn set_version(&mut self, version: &str) {
        self.set(KEY_VERSION, Value::from(version));
    }

    pub fn set_bundle_name(&mut self, name: &str) {
        self.set(KEY_BUNDLE_NAME, Value::from(name));
    }

    pub fn set_download_url(&mut self, url: &str) {
        self.set(KEY_DOWNLOAD_URL, Value::from(url));
    }

    pub fn set_version_check_url(&mut self, url: &str) {
        self.set(KEY_VERSION_CHECK_URL, Value::from(url));
    }

    pub fn set_previous_unzipped_path(&mut self, path: &str) {
        self.set(KEY_PREVIOUS_UNZIPPED_PATH, Value::from(path));
    }

    pub fn set_previous_version(&mut self, version: &str) {
        self.set(KEY_PREVIOUS_VERSION, Value::from(version));
    }

    pub fn set_rollback_count(&mut self, count: u32) {
        self.set(KEY_ROLLBACK_COUNT, Value::from(count));
    }

    pub fn set_notified_rollback_count(&mut self, count: usize) {
        self.set(KEY_NOTIFIED_ROLLBACK_COUNT, Value::from(count));
    }

    pub fn set_pending_validation(&mut self, pending: bool) {
        self.set(KEY_PENDING_VALIDATION, Value::from(pending));
    }

    /// Appends to the blacklist, skipping versions already present.
    pub fn push_blacklisted_version(&mut self, version: &str) {
        let key = self.scoped(KEY_BLACKLISTED_VERSIONS);
        let mut list: Vec<String> = get_array(self.entries, &key);
        if !list.iter().any(|v| v == version) {
            list.push(version.to_owned());
        }
        self.entries.insert(key, Value::from(list));
    }

    pub fn push_rollback_record(&mut self, record: RollbackRecord) {
        let key = self.scoped(KEY_ROLLBACK_HISTORY);
        let mut history: Vec<RollbackRecord> = get_array(self.entries, &key);
        history.push(record);
        // History is append-only and serde can't fail on these fields.
        if let Ok(value) = serde_json::to_value(&history) {
            self.entries.insert(key, value);
        }
    }

    /// Overwrites the reason of the most recent history entry, if any.
    pub fn set_last_rollback_reason(&mut self, reason: &str) {
        let key = self.scoped(KEY_ROLLBACK_HISTORY);
        let mut history: Vec<RollbackRecord> = get_array(self.entries, &key);
        if let Some(last) = history.last_mut() {
            last.reason = reason.to_owned();
        }
        if let Ok(value) = serde_json::to_value(&history) {
            self.entries.insert(key, value);
        }
    }

    /// Removes every entry of this namespace. Other app versions' state is
    /// left untouched.
    pub fn clear_namespace(&mut self) {
        let suffix = format!("_{}", self.namespace);
        self.entries.retain(|key, _| !key.ends_with(&suffix));
    }

    fn set(&mut self, name: &str, value: Value) {
        self.entries.insert(self.scoped(name), value);
    }

    fn scoped(&self, name: &str) -> String {
        scoped(name, self.namespace)
    }
}
