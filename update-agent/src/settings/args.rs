use clap::{Parser, Subcommand};
use serde::Serialize;

/// An agent performing over-the-air updates of a host application's code
/// bundle.
///
/// Downloads bundle archives, activates them for the next launch, and rolls
/// back automatically when a freshly activated bundle crashes before the
/// host confirms it.
#[derive(Debug, Parser, Serialize)]
#[command(author, version)]
pub struct Args {
    /// The path to the config file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Directory holding the state file and extracted bundles.
    #[arg(long, alias = "wd")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Directory for in-flight archive downloads.
    #[arg(long, alias = "dir")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<String>,
    /// Installed application version; all bundle state is scoped to it.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// File extension identifying the entry bundle inside an archive.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_extension: Option<String>,
    /// Bundle file name assumed when no file matches the extension.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_name: Option<String>,
    /// URL serving the bundle archive.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// URL serving the version descriptor.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_check_url: Option<String>,
    /// GitHub repository URL to derive the download and version check URLs
    /// from, e.g. https://github.com/owner/repo.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    /// Branch of --github-url to pull archives from.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_ref: Option<String>,
    /// Seconds between cycles of the `watch` command.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u64>,
    #[command(subcommand)]
    #[serde(skip)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print the stored bundle state.
    Status,
    /// Ask the version check URL whether a new bundle exists.
    Check,
    /// Download, extract, and activate a bundle.
    Download,
    /// Mark the active bundle as good, disarming crash rollback.
    Confirm,
    /// Print the bundle path the host should load, arming the crash guard.
    Resolve,
    /// Roll back to the previous bundle.
    Rollback,
    /// Roll back and label the history entry with a custom reason.
    MarkBad {
        /// Reason recorded in the rollback history.
        reason: String,
    },
    /// Print the rollback history as JSON.
    History {
        /// Only entries not reported before; advances the cursor.
        #[arg(long)]
        unreported: bool,
    },
    /// Wipe all bundle state for this app version.
    Clear,
    /// Run check-and-download cycles at the configured interval.
    Watch,
}
