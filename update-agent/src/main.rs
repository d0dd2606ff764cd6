//! Command line front end for the OTA bundle agent.
//!
//! Each subcommand maps to one lifecycle operation: check the version URL,
//! download and activate an archive, confirm the running bundle, roll back,
//! or resolve the bundle path a host should load at startup. `watch` runs
//! check-and-download cycles on an interval.

use std::{
    borrow::Cow,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use clap::Parser as _;
use eyre::WrapErr;
use ota_update_agent::{
    bootstrap,
    fetcher::{BundleFetcher, ProgressFn},
    logging,
    store::StateStore,
    Args, CheckCycle, Command, Settings, UpdateManager,
};
use tracing::{debug, error, info, warn};

mod agent_result;
use agent_result::AgentResult;

const CFG_DEFAULT_PATH: &str = "/etc/ota_update_agent.conf";
const ENV_VAR_PREFIX: &str = "OTA_AGENT_";
// ENV_VAR_PREFIX + "CONFIG"
const CFG_ENV_VAR: &str = "OTA_AGENT_CONFIG";

fn main() -> AgentResult {
    logging::init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => AgentResult::Success,
        Err(err) => {
            error!("{err:?}");
            err.into()
        }
    }
}

fn get_config_source(args: &Args) -> Cow<'_, Path> {
    if let Some(config) = &args.config {
        info!("using config provided by command line argument: `{config}`");
        Cow::Borrowed(config.as_ref())
    } else if let Some(config) = figment::providers::Env::var(CFG_ENV_VAR) {
        info!("using config set in environment variable `{CFG_ENV_VAR}={config}`");
        Cow::Owned(std::path::PathBuf::from(config))
    } else {
        debug!("using default config at `{CFG_DEFAULT_PATH}`");
        Cow::Borrowed(CFG_DEFAULT_PATH.as_ref())
    }
}

fn run(args: &Args) -> eyre::Result<()> {
    let config = get_config_source(args);
    let settings = Settings::get(args, &config, ENV_VAR_PREFIX)
        .wrap_err("failed reading settings")?;
    debug!(?settings, "running with settings");

    let store = Arc::new(
        StateStore::open(&settings.workspace, &settings.app_version)
            .wrap_err("failed opening state store")?,
    );
    let fetcher = BundleFetcher::new(
        settings.workspace.clone(),
        settings.downloads.clone(),
        settings.bundle_extension.clone(),
        settings.bundle_name.clone(),
    );
    let manager = UpdateManager::new(Arc::clone(&store), fetcher);
    let (download_url, version_check_url) = settings
        .effective_urls()
        .wrap_err("failed deriving URLs from the GitHub settings")?;

    match &args.command {
        Command::Status => print_status(&manager),
        Command::Check => {
            let has_update = manager
                .check_for_update(version_check_url.as_deref())
                .wrap_err("version check failed")?;
            println!("{has_update}");
        }
        Command::Download => {
            let url = download_url
                .clone()
                .or_else(|| store.download_url())
                .ok_or_else(|| eyre::eyre!("no download URL configured or stored"))?;
            let content_dir = manager
                .download_and_activate(
                    &url,
                    version_check_url.as_deref(),
                    Some(&log_progress()),
                )
                .wrap_err("failed downloading and activating bundle")?;
            println!("{}", content_dir.display());
        }
        Command::Confirm => manager.confirm_bundle().wrap_err("failed confirming bundle")?,
        Command::Resolve => {
            if let Some(path) = bootstrap::resolve_bundle_path(&store) {
                println!("{}", path.display());
            }
        }
        Command::Rollback => {
            manager
                .rollback_to_previous_bundle()
                .wrap_err("rollback failed")?;
            print_status(&manager);
        }
        Command::MarkBad { reason } => manager
            .mark_current_bundle_as_bad(reason)
            .wrap_err("failed marking bundle as bad")?,
        Command::History { unreported } => {
            let records = if *unreported {
                manager
                    .take_unreported_rollbacks()
                    .wrap_err("failed reading rollback history")?
            } else {
                manager.rollback_history()
            };
            let json = serde_json::to_string_pretty(&records)
                .wrap_err("failed serializing rollback history")?;
            println!("{json}");
        }
        Command::Clear => manager.clear_all_data().wrap_err("failed clearing state")?,
        Command::Watch => watch(
            &manager,
            settings.check_interval,
            version_check_url.as_deref(),
            download_url.as_deref(),
        )?,
    }
    Ok(())
}

fn watch(
    manager: &UpdateManager,
    interval: std::time::Duration,
    version_check_url: Option<&str>,
    download_url: Option<&str>,
) -> eyre::Result<()> {
    let check_url = version_check_url
        .ok_or_else(|| eyre::eyre!("`watch` needs a version check URL"))?;
    info!(?interval, "watching for updates");
    loop {
        match manager.run_check_cycle(check_url, download_url) {
            Ok(CheckCycle::UpToDate) => debug!("up to date"),
            Ok(CheckCycle::Installed(dir)) => {
                info!(dir = %dir.display(), "installed new bundle")
            }
            // Transient failures are retried on the next tick.
            Err(err) => warn!("check cycle failed: {err:?}"),
        }
        std::thread::sleep(interval);
    }
}

fn print_status(manager: &UpdateManager) {
    let store = manager.store();
    println!(
        "version:   {}",
        manager.current_version().as_deref().unwrap_or("(built-in)"),
    );
    println!(
        "bundle:    {}",
        store.unzipped_path().as_deref().unwrap_or("(built-in)"),
    );
    println!(
        "previous:  {}",
        manager.previous_version().as_deref().unwrap_or("(none)"),
    );
    println!("pending:   {}", store.pending_validation());
    println!("rollbacks: {}", store.rollback_count());
    println!("blacklist: {:?}", manager.blacklisted_versions());
}

/// Logs download progress every 10%, or every 8 MiB when the size is
/// unknown.
fn log_progress() -> ProgressFn {
    let last = AtomicU64::new(0);
    Box::new(move |received, total| {
        let milestone = match total {
            Some(total) if total > 0 => (received * 100 / total) / 10,
            // total == Some(0) only happens for empty bodies.
            _ => received / (8 * 1024 * 1024),
        };
        if milestone > last.swap(milestone, Ordering::Relaxed) {
            match total {
                Some(total) if total > 0 => {
                    info!("downloaded {}% of {total} bytes", received * 100 / total)
                }
                _ => info!("downloaded {received} bytes"),
            }
        }
    })
}
