//! Global configuration model for the berth runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration shared by the executor and every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BerthConfig {
    /// Base directory for berth state and data.
    pub home_dir: PathBuf,
    /// Directory holding per-cluster connection configuration.
    pub cache_dir: PathBuf,
    /// Network every container joins after its own networks, if any.
    pub wan_network: Option<String>,
    /// Subnet used when the WAN network is created.
    pub wan_subnet: String,
    /// Pull images even when a local copy exists.
    pub force_pull: bool,
    /// Budget for cluster readiness and pod health checks.
    pub start_timeout: Duration,
    /// Interval between readiness checks.
    pub poll_interval: Duration,
    /// Remote container engine address (`DOCKER_HOST`), if set.
    pub docker_host: Option<String>,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self::with_home(constants::default_home_dir())
    }
}

impl BerthConfig {
    /// Creates a default configuration rooted at `home_dir`.
    #[must_use]
    pub fn with_home(home_dir: PathBuf) -> Self {
        Self {
            cache_dir: home_dir.join("config"),
            home_dir,
            wan_network: Some(constants::DEFAULT_WAN_NETWORK.to_string()),
            wan_subnet: constants::DEFAULT_WAN_SUBNET.to_string(),
            force_pull: false,
            start_timeout: constants::DEFAULT_START_TIMEOUT,
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            docker_host: None,
        }
    }

    /// Moves the home and cache directories under `home_dir`, keeping every
    /// other setting.
    #[must_use]
    pub fn rehomed(mut self, home_dir: PathBuf) -> Self {
        self.cache_dir = home_dir.join("config");
        self.home_dir = home_dir;
        self
    }

    /// Builds the configuration from the process environment.
    ///
    /// Reads `BERTH_HOME`, `DOCKER_HOST`, `BERTH_START_TIMEOUT` (seconds) and
    /// `BERTH_FORCE_PULL`; unset or unparsable values keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = std::env::var_os(constants::HOME_ENV)
            .map_or_else(Self::default, |home| Self::with_home(PathBuf::from(home)));

        config.docker_host = std::env::var(constants::DOCKER_HOST_ENV)
            .ok()
            .filter(|v| !v.is_empty());

        if let Some(secs) = std::env::var(constants::START_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.start_timeout = Duration::from_secs(secs);
        }

        config.force_pull = std::env::var(constants::FORCE_PULL_ENV)
            .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        config
    }

    /// Returns the host of a remote container engine.
    ///
    /// Only TCP engines count as remote; a unix socket `DOCKER_HOST` is local.
    ///
    /// ```
    /// let mut config = berth_common::config::BerthConfig::default();
    /// config.docker_host = Some("tcp://10.0.0.4:2376".into());
    /// assert_eq!(config.remote_engine_host().as_deref(), Some("10.0.0.4"));
    /// ```
    #[must_use]
    pub fn remote_engine_host(&self) -> Option<String> {
        let rest = self.docker_host.as_deref()?.strip_prefix("tcp://")?;
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => authority,
        };
        (!host.is_empty()).then(|| host.to_string())
    }
}
