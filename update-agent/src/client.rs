//! Lazily initialized, process-wide blocking HTTP client.

use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

static INSTANCE: OnceCell<Client> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed initializing HTTP client")]
    BuildClient(#[source] reqwest::Error),
}

/// Returns the shared client, building it on first use.
///
/// Redirects stay enabled since bundle hosts routinely hand out signed CDN
/// URLs via 302. Certificate pinning is deliberately not configured: an app
/// that has not updated in a long time must still be able to reach the host.
pub fn normal() -> Result<&'static Client, Error> {
    INSTANCE.get_or_try_init(initialize)
}

fn initialize() -> Result<Client, Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(Error::BuildClient)
}
