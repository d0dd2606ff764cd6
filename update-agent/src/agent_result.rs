use std::process::{ExitCode, Termination};

use ota_update_agent::manager;

/// Exit codes returned by the update agent. Custom exit codes are taken in accordance with the
/// Linux Standard Base Core Specification and are in the range 150-199.
#[repr(u8)]
pub(crate) enum AgentResult {
    Success = 0,
    Failure = 1,
    DownloadFailed = 150,
}

impl Termination for AgentResult {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl From<eyre::Report> for AgentResult {
    fn from(err: eyre::Report) -> Self {
        match err.downcast_ref::<manager::Error>() {
            Some(manager::Error::Fetch(fetch)) if fetch.is_download_failure() => {
                Self::DownloadFailed
            }
            _ => Self::Failure,
        }
    }
}
