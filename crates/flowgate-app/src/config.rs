//! Settings file and command-line overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use flowgate_proxy::{DisabledAddresses, SkipSet, DEFAULT_SLOW_THRESHOLD};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for these settings.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// `listen_host` is neither `auto` nor an IP address.
    #[error("invalid listen host: {0}")]
    ListenHost(String),

    /// The slow-request threshold is negative or not finite.
    #[error("invalid slow request threshold: {0}")]
    SlowThreshold(f64),
}

/// Where the proxy listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenHost {
    /// Use the address on the default route's subnet.
    Auto,
    Ip(IpAddr),
}

impl std::str::FromStr for ListenHost {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ListenHost::Auto);
        }
        s.parse()
            .map(ListenHost::Ip)
            .map_err(|_| ConfigError::ListenHost(s.to_string()))
    }
}

/// `[proxy]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxySection {
    pub listen_host: String,
    /// 0 picks a free port at startup.
    pub port: u16,
    pub session_id: Option<String>,
    pub slow_request_secs: f64,
    pub ca_dir: Option<PathBuf>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            port: flowgate_proxy::DEFAULT_PROXY_PORT,
            session_id: None,
            slow_request_secs: DEFAULT_SLOW_THRESHOLD.as_secs_f64(),
            ca_dir: None,
        }
    }
}

/// `[hosts]` table.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostsSection {
    pub allowed: Vec<String>,
    pub skipped: Vec<String>,
}

/// `[connections]` table.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionsSection {
    pub disabled_addresses: Vec<IpAddr>,
}

/// Full settings file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub proxy: ProxySection,
    pub hosts: HostsSection,
    pub connections: ConnectionsSection,
}

/// Values given on the command line; `None`/empty leaves the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen_host: Option<String>,
    pub port: Option<u16>,
    pub session_id: Option<String>,
    pub slow_request_secs: Option<f64>,
    pub ca_dir: Option<PathBuf>,
    pub allow_hosts: Vec<String>,
    pub skip_hosts: Vec<String>,
    pub disable_addresses: Vec<IpAddr>,
}

impl Settings {
    /// Parses settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads settings from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Applies command-line overrides. Host and address lists are extended.
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(listen_host) = overrides.listen_host {
            self.proxy.listen_host = listen_host;
        }
        if let Some(port) = overrides.port {
            self.proxy.port = port;
        }
        if overrides.session_id.is_some() {
            self.proxy.session_id = overrides.session_id;
        }
        if let Some(secs) = overrides.slow_request_secs {
            self.proxy.slow_request_secs = secs;
        }
        if overrides.ca_dir.is_some() {
            self.proxy.ca_dir = overrides.ca_dir;
        }
        self.hosts.allowed.extend(overrides.allow_hosts);
        self.hosts.skipped.extend(overrides.skip_hosts);
        self.connections
            .disabled_addresses
            .extend(overrides.disable_addresses);
        self
    }

    pub fn listen_host(&self) -> Result<ListenHost, ConfigError> {
        self.proxy.listen_host.parse()
    }

    pub fn slow_threshold(&self) -> Result<Duration, ConfigError> {
        let secs = self.proxy.slow_request_secs;
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::SlowThreshold(secs))
    }

    pub fn skip_set(&self) -> SkipSet {
        SkipSet::build(self.hosts.allowed.iter().cloned(), self.hosts.skipped.iter().cloned())
    }

    pub fn disabled_addresses(&self) -> DisabledAddresses {
        DisabledAddresses::new(self.connections.disabled_addresses.iter().copied())
    }
}
