//! Network reachability.

use crate::SyncResult;
use ledger_config_and_utils::OfflineConfig;
use reqwest::blocking::Client;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Answers whether the remote store can currently be reached.
pub trait Reachability: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Online when a GET to the probe URL returns a 2xx status within the timeout.
pub struct HttpReachability {
    client: Client,
    url: Url,
}

impl HttpReachability {
    pub fn new(url: Url, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn from_config(config: &OfflineConfig) -> SyncResult<Self> {
        Self::new(config.probe_url()?, config.probe_timeout())
    }
}

impl Reachability for HttpReachability {
    fn is_online(&self) -> bool {
        match self.client.get(self.url.clone()).send() {
            Ok(response) => {
                let online = response.status().is_success();
                debug!(url = %self.url, status = %response.status(), online, "Network probe");
                online
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Network probe failed");
                false
            }
        }
    }
}

/// Fixed answer that callers can flip, for tests and manual overrides.
#[derive(Debug)]
pub struct StaticReachability {
    online: AtomicBool,
}

impl StaticReachability {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Reachability for StaticReachability {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
