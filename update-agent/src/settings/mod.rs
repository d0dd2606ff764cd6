use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::providers::Format as _;
use ota_update_agent_core::github;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

mod args;
pub use args::{Args, Command};

#[cfg(test)]
mod tests;

fn default_bundle_extension() -> String {
    "jsbundle".to_owned()
}

fn default_bundle_name() -> String {
    "main.jsbundle".to_owned()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(1800)
}

/// `Settings` are the configurable options for running the update agent.
///
/// The only entry point to construct `Settings` is `Settings::get`.
#[serde_as]
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Directory holding the state file and extracted bundles.
    pub workspace: PathBuf,
    /// Directory for in-flight archive downloads.
    pub downloads: PathBuf,
    /// Installed application version; all bundle state is scoped to it.
    pub app_version: String,
    #[serde(default = "default_bundle_extension")]
    pub bundle_extension: String,
    #[serde(default = "default_bundle_name")]
    pub bundle_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_check_url: Option<String>,
    /// GitHub repository hosting the bundle; download and version check URLs
    /// are derived from it when not set explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    /// Branch of `github_url` to pull archives from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_ref: Option<String>,
    /// Wait between cycles of the `watch` command, in seconds.
    #[serde_as(as = "DurationSeconds")]
    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,
}

impl Settings {
    /// Constructs `Settings` from a config file, environment variables, and command line
    /// arguments. Command line arguments always take precedence over environment variables, which
    /// in turn take precedence over the config file.
    pub fn get<P: AsRef<Path>>(
        args: &Args,
        config: P,
        env_prefix: &str,
    ) -> figment::error::Result<Settings> {
        figment::Figment::new()
            .merge(figment::providers::Toml::file(config))
            .merge(figment::providers::Env::prefixed(env_prefix))
            .merge(figment::providers::Serialized::defaults(args))
            .extract()
    }

    /// The download and version check URLs the agent should use: explicit
    /// settings win; otherwise both are derived from `github_url` (branch
    /// archive plus the raw version descriptor).
    pub fn effective_urls(&self) -> Result<(Option<String>, Option<String>), github::Error> {
        let derived = match &self.github_url {
            Some(repo) => Some(github::release_urls(
                repo,
                self.github_ref.as_deref(),
                None,
            )?),
            None => None,
        };
        let download = self
            .download_url
            .clone()
            .or_else(|| derived.as_ref().map(|urls| urls.download_url.clone()));
        let check = self
            .version_check_url
            .clone()
            .or_else(|| derived.map(|urls| urls.version_url));
        Ok((download, check))
    }
}
