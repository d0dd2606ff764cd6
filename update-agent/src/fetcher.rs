//! Downloading and unpacking bundle archives.
//!
//! Archives are streamed to a temp file in the downloads directory and
//! extracted into a fresh `ota_unzipped_<millis>` directory under the
//! workspace. The temp file is removed when the fetch ends, successfully or
//! not. Extracted directory names are never altered: relative asset paths
//! inside a bundle resolve against the directory layout the archive shipped.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use ota_update_agent_core::VersionDescriptor;
use tracing::{debug, info, warn};
use url::Url;
use zip::ZipArchive;

use crate::client;

/// Prefix of every extraction directory; the suffix is the unix timestamp in
/// milliseconds at extraction time.
pub const EXTRACT_DIR_PREFIX: &str = "ota_unzipped_";

const DESCRIPTOR_JSON: &str = "ota.json";
const DESCRIPTOR_TEXT: &str = "ota.version";

const DOWNLOAD_BUF_SIZE: usize = 64 * 1024;

/// Progress callback: `(bytes received, total if known)`. Called once more
/// after the last byte with `total = Some(received)`.
pub type ProgressFn = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InitClient(#[from] client::Error),
    #[error("invalid URL `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to `{url}` failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{url}` answered with status {status}")]
    ResponseStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed reading response body from `{url}`")]
    ReadResponse {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("failed writing archive to `{path}`")]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed creating file or directory at `{path}`")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed extracting archive into `{path}`")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed scanning extracted files under `{path}`")]
    ScanExtracted {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True for errors caused by the network or the remote host, as opposed
    /// to local filesystem or archive problems.
    pub fn is_download_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::Request { .. }
                | Self::ResponseStatus { .. }
                | Self::ReadResponse { .. }
        )
    }
}

/// A successfully downloaded and extracted bundle.
#[derive(Debug)]
pub struct FetchedBundle {
    /// Directory holding the entry bundle file.
    pub content_dir: PathBuf,
    /// File name of the entry bundle inside `content_dir`.
    pub bundle_file_name: String,
    /// Version resolved from the check URL or a bundled descriptor, if any.
    pub version: Option<String>,
}

/// Fetches archives and lays them out under the agent workspace.
pub struct BundleFetcher {
    workspace: PathBuf,
    downloads: PathBuf,
    bundle_extension: String,
    fallback_bundle_name: String,
}

impl BundleFetcher {
    pub fn new(
        workspace: PathBuf,
        downloads: PathBuf,
        bundle_extension: String,
        fallback_bundle_name: String,
    ) -> Self {
        Self {
            workspace,
            downloads,
            bundle_extension,
            fallback_bundle_name,
        }
    }

    /// Root directory the extraction directories live under.
    pub fn extract_root(&self) -> &Path {
        &self.workspace
    }

    /// Downloads the archive at `download_url`, extracts it, and locates the
    /// entry bundle and its version.
    pub fn fetch_and_extract(
        &self,
        download_url: &str,
        version_check_url: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> Result<FetchedBundle, Error> {
        for dir in [&self.workspace, &self.downloads] {
            fs::create_dir_all(dir).map_err(|source| Error::Create {
                path: dir.clone(),
                source,
            })?;
        }
        let url = parse_url(download_url)?;

        // Dropped at the end of this function, which deletes the file on
        // both the success and every error path.
        let mut archive = tempfile::Builder::new()
            .prefix("ota_update_")
            .suffix(".zip")
            .tempfile_in(&self.downloads)
            .map_err(|source| Error::Create {
                path: self.downloads.clone(),
                source,
            })?;
        self.download_to(&url, archive.as_file_mut(), progress)?;

        // Bump the stamp if a directory from the same millisecond exists.
        let mut stamp = crate::now_millis();
        let extract_dir = loop {
            let candidate = self.workspace.join(format!("{EXTRACT_DIR_PREFIX}{stamp}"));
            if !candidate.exists() {
                break candidate;
            }
            stamp += 1;
        };
        fs::create_dir_all(&extract_dir).map_err(|source| Error::Create {
            path: extract_dir.clone(),
            source,
        })?;

        let file = File::open(archive.path()).map_err(|source| Error::Create {
            path: archive.path().to_owned(),
            source,
        })?;
        let map_zip = |source| Error::Archive {
            path: extract_dir.clone(),
            source,
        };
        ZipArchive::new(file)
            .map_err(map_zip)?
            .extract(&extract_dir)
            .map_err(map_zip)?;
        info!(dir = %extract_dir.display(), "extracted bundle archive");

        let (content_dir, bundle_file_name) = self.locate_bundle(&extract_dir)?;
        let version = self.resolve_version(&content_dir, version_check_url);

        Ok(FetchedBundle {
            content_dir,
            bundle_file_name,
            version,
        })
    }

    /// GETs a small text body, typically a version descriptor.
    pub fn download_text(&self, url: &str) -> Result<String, Error> {
        let url = parse_url(url)?;
        let response = client::normal()?
            .get(url.clone())
            .send()
            .map_err(|source| Error::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ResponseStatus {
                url: url.to_string(),
                status,
            });
        }
        response.text().map_err(|source| Error::Request {
            url: url.to_string(),
            source,
        })
    }

    fn download_to(
        &self,
        url: &Url,
        dst: &mut File,
        progress: Option<&ProgressFn>,
    ) -> Result<(), Error> {
        let mut response = client::normal()?
            .get(url.clone())
            .send()
            .map_err(|source| Error::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ResponseStatus {
                url: url.to_string(),
                status,
            });
        }
        let total = response.content_length();

        let mut received = 0u64;
        let mut buf = [0u8; DOWNLOAD_BUF_SIZE];
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|source| Error::ReadResponse {
                    url: url.to_string(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])
                .map_err(|source| Error::WriteArchive {
                    path: self.downloads.clone(),
                    source,
                })?;
            received += n as u64;
            if let Some(callback) = progress {
                callback(received, total);
            }
        }
        dst.flush().map_err(|source| Error::WriteArchive {
            path: self.downloads.clone(),
            source,
        })?;
        if let Some(callback) = progress {
            callback(received, Some(received));
        }
        debug!(url = %url, received, "download complete");
        Ok(())
    }

    /// Finds the entry bundle: a file with the configured extension at the
    /// extraction root, then one level down. When nothing matches, the
    /// conventional bundle name inside the first subdirectory (or the root)
    /// is assumed.
    fn locate_bundle(&self, root: &Path) -> Result<(PathBuf, String), Error> {
        if let Some(name) = self.find_bundle_file(root)? {
            return Ok((root.to_owned(), name));
        }
        let mut subdirs: Vec<PathBuf> = fs::read_dir(root)
            .map_err(|source| Error::ScanExtracted {
                path: root.to_owned(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();

        for dir in &subdirs {
            if let Some(name) = self.find_bundle_file(dir)? {
                return Ok((dir.clone(), name));
            }
        }
        warn!(
            root = %root.display(),
            extension = %self.bundle_extension,
            "no file matches the bundle extension; assuming the conventional name"
        );
        let content_dir = subdirs.into_iter().next().unwrap_or_else(|| root.to_owned());
        Ok((content_dir, self.fallback_bundle_name.clone()))
    }

    fn find_bundle_file(&self, dir: &Path) -> Result<Option<String>, Error> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map_err(|source| Error::ScanExtracted {
                path: dir.to_owned(),
                source,
            })?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .is_some_and(|ext| ext == self.bundle_extension.as_str())
            })
            .collect();
        names.sort();
        Ok(names.into_iter().next())
    }

    /// Resolves the bundle version: the remote check URL wins, then the
    /// descriptors shipped inside the bundle. `None` keeps whatever version
    /// was stored before.
    fn resolve_version(&self, content_dir: &Path, version_check_url: Option<&str>) -> Option<String> {
        if let Some(url) = version_check_url {
            match self
                .download_text(url)
                .map_err(|err| err.to_string())
                .and_then(|body| {
                    VersionDescriptor::parse(&body).map_err(|err| err.to_string())
                }) {
                Ok(descriptor) => return Some(descriptor.version),
                Err(err) => warn!(
                    url,
                    "version check URL unusable, falling back to bundled descriptor: {err}"
                ),
            }
        }

        let json_path = content_dir.join(DESCRIPTOR_JSON);
        if let Ok(body) = fs::read_to_string(&json_path) {
            match VersionDescriptor::from_json(&body) {
                Ok(descriptor) => return Some(descriptor.version),
                Err(err) => warn!(path = %json_path.display(), "ignoring bad descriptor: {err}"),
            }
        }
        let text_path = content_dir.join(DESCRIPTOR_TEXT);
        if let Ok(body) = fs::read_to_string(&text_path) {
            match VersionDescriptor::from_plain_text(&body) {
                Ok(descriptor) => return Some(descriptor.version),
                Err(err) => warn!(path = %text_path.display(), "ignoring bad descriptor: {err}"),
            }
        }
        warn!(
            dir = %content_dir.display(),
            "bundle carries no version descriptor"
        );
        None
    }
}

fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|source| Error::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}
