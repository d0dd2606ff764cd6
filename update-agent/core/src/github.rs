//! URL construction for bundles hosted in a GitHub repository.
//!
//! A repository URL plus a ref is enough to drive the whole update cycle:
//! GitHub serves a zip archive of any branch or tag, and the raw content
//! endpoint serves the version descriptor committed next to the bundle.
//! Everything here is pure string work; nothing talks to the network.

use url::Url;

pub const DEFAULT_REF: &str = "main";
pub const DEFAULT_VERSION_PATH: &str = "ota.version";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed parsing GitHub URL `{url}`")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("`{url}` is not a GitHub repository URL; expected https://github.com/owner/repo")]
    NotGitHub { url: String },
}

/// Whether a ref names a branch or a tag; GitHub archives them under
/// different path prefixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefType {
    Branch,
    Tag,
}

impl RefType {
    fn refs_segment(self) -> &'static str {
        match self {
            Self::Branch => "heads",
            Self::Tag => "tags",
        }
    }
}

/// An `owner/repo` pair extracted from a GitHub repository URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repo {
    pub owner: String,
    pub repo: String,
}

impl Repo {
    /// Accepts `https://github.com/owner/repo`, with or without a trailing
    /// slash or `.git` suffix. Path segments past the repo name are ignored.
    pub fn parse(github_url: &str) -> Result<Self, Error> {
        let not_github = || Error::NotGitHub {
            url: github_url.to_owned(),
        };
        let trimmed = github_url.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let url = Url::parse(trimmed).map_err(|source| Error::Parse {
            url: github_url.to_owned(),
            source,
        })?;
        if url.host_str() != Some("github.com") {
            return Err(not_github());
        }
        let mut segments = url.path_segments().ok_or_else(not_github)?;
        let owner = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(not_github)?;
        let repo = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(not_github)?;
        Ok(Self {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        })
    }

    /// Zip archive of a branch or tag, e.g.
    /// `https://github.com/owner/repo/archive/refs/heads/main.zip`.
    pub fn archive_url(&self, reference: &str, ref_type: RefType) -> String {
        format!(
            "https://github.com/{}/{}/archive/refs/{}/{reference}.zip",
            self.owner,
            self.repo,
            ref_type.refs_segment(),
        )
    }

    /// Raw content of a file at a ref, e.g.
    /// `https://raw.githubusercontent.com/owner/repo/main/ota.version`.
    pub fn raw_file_url(&self, reference: &str, path: &str) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{reference}/{path}",
            self.owner, self.repo,
        )
    }
}

/// The pair of URLs a GitHub-hosted bundle needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseUrls {
    pub download_url: String,
    pub version_url: String,
}

/// Convenience for the common case: branch archive plus the raw version
/// descriptor. `reference` defaults to [`DEFAULT_REF`], `version_path` to
/// [`DEFAULT_VERSION_PATH`].
pub fn release_urls(
    github_url: &str,
    reference: Option<&str>,
    version_path: Option<&str>,
) -> Result<ReleaseUrls, Error> {
    let repo = Repo::parse(github_url)?;
    let reference = reference.unwrap_or(DEFAULT_REF);
    Ok(ReleaseUrls {
        download_url: repo.archive_url(reference, RefType::Branch),
        version_url: repo
            .raw_file_url(reference, version_path.unwrap_or(DEFAULT_VERSION_PATH)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_git_and_trailing_slash_forms() {
        for url in [
            "https://github.com/acme/bundles",
            "https://github.com/acme/bundles.git",
            "https://github.com/acme/bundles/",
            "https://github.com/acme/bundles.git/",
        ] {
            let repo = Repo::parse(url).unwrap();
            assert_eq!(repo.owner, "acme");
            assert_eq!(repo.repo, "bundles");
        }
    }

    #[test]
    fn rejects_non_github_hosts_and_short_paths() {
        assert!(matches!(
            Repo::parse("https://gitlab.com/acme/bundles"),
            Err(Error::NotGitHub { .. }),
        ));
        assert!(matches!(
            Repo::parse("https://github.com/acme"),
            Err(Error::NotGitHub { .. }),
        ));
        assert!(matches!(
            Repo::parse("not a url"),
            Err(Error::Parse { .. }),
        ));
    }

    #[test]
    fn archive_urls_distinguish_branches_from_tags() {
        let repo = Repo::parse("https://github.com/acme/bundles.git").unwrap();
        assert_eq!(
            repo.archive_url("main", RefType::Branch),
            "https://github.com/acme/bundles/archive/refs/heads/main.zip",
        );
        assert_eq!(
            repo.archive_url("v1.2.0", RefType::Tag),
            "https://github.com/acme/bundles/archive/refs/tags/v1.2.0.zip",
        );
    }

    #[test]
    fn raw_file_url_points_at_raw_githubusercontent() {
        let repo = Repo::parse("https://github.com/acme/bundles").unwrap();
        assert_eq!(
            repo.raw_file_url("release", "nested/ota.json"),
            "https://raw.githubusercontent.com/acme/bundles/release/nested/ota.json",
        );
    }

    #[test]
    fn release_urls_defaults_to_main_and_ota_version() {
        let urls = release_urls("https://github.com/acme/bundles.git", None, None).unwrap();
        assert_eq!(
            urls.download_url,
            "https://github.com/acme/bundles/archive/refs/heads/main.zip",
        );
        assert_eq!(
            urls.version_url,
            "https://raw.githubusercontent.com/acme/bundles/main/ota.version",
        );

        let urls =
            release_urls("https://github.com/acme/bundles", Some("beta"), Some("ota.json"))
                .unwrap();
        assert_eq!(
            urls.download_url,
            "https://github.com/acme/bundles/archive/refs/heads/beta.zip",
        );
        assert_eq!(
            urls.version_url,
            "https://raw.githubusercontent.com/acme/bundles/beta/ota.json",
        );
    }
}
