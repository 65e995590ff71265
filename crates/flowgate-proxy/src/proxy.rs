//! MITM proxy server.
//!
//! Wires the addon chain, the connection policy and the CA into a hudsucker
//! proxy and manages its lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use crate::addon::AddonChain;
use crate::audit::{ResponseAuditor, DEFAULT_SLOW_THRESHOLD};
use crate::ca::CaManager;
use crate::connection::{DisabledAddresses, ServerOverride};
use crate::cookie::CookieInjector;
use crate::error::{ProxyError, Result};
use crate::gate::RequestGate;
use crate::handler::{FlowHandler, HandlerConfig};
use crate::hosts::SkipSet;
use crate::timer::FlowTimer;
use crate::DEFAULT_PROXY_PORT;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// The CA manager for certificate generation.
    pub ca_manager: CaManager,
    /// Hosts answered by the proxy itself.
    pub skip_set: SkipSet,
    /// Value of the `xrequestid` cookie added to every request.
    pub session_id: String,
    /// Clients whose traffic is passed through untouched.
    pub disabled_addresses: DisabledAddresses,
    /// Responses slower than this are reported.
    pub slow_threshold: Duration,
}

impl ProxyConfig {
    /// Creates a configuration using the default CA directory.
    pub fn new(session_id: impl Into<String>) -> Result<Self> {
        let ca_manager = CaManager::with_default_dir()?;
        Ok(Self::with_ca_manager(ca_manager, session_id))
    }

    /// Creates a configuration with an explicit CA manager.
    pub fn with_ca_manager(ca_manager: CaManager, session_id: impl Into<String>) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_manager,
            skip_set: SkipSet::empty(),
            session_id: session_id.into(),
            disabled_addresses: DisabledAddresses::default(),
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the skip-list.
    pub fn with_skip_set(mut self, skip_set: SkipSet) -> Self {
        self.skip_set = skip_set;
        self
    }

    /// Sets the clients that bypass interception.
    pub fn with_disabled_addresses(mut self, disabled_addresses: DisabledAddresses) -> Self {
        self.disabled_addresses = disabled_addresses;
        self
    }

    /// Sets the slow-request threshold.
    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

/// MITM proxy server running the Flowgate addons.
pub struct ProxyServer {
    config: ProxyConfig,
    timer: Arc<FlowTimer>,
    connections: Arc<ServerOverride>,
}

impl ProxyServer {
    /// Creates a new proxy server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        // Ensure CA exists (will generate if missing)
        config.ca_manager.ensure_ca()?;

        let connections = Arc::new(ServerOverride::new(config.disabled_addresses.clone()));
        Ok(Self {
            config,
            timer: Arc::new(FlowTimer::new()),
            connections,
        })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for user installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Timer shared by every flow of this server.
    pub fn timer(&self) -> Arc<FlowTimer> {
        Arc::clone(&self.timer)
    }

    /// Builds the addon chain: timing first, then gate, then cookie.
    pub fn addons(&self) -> AddonChain {
        AddonChain::new()
            .with(
                ResponseAuditor::new(Arc::clone(&self.timer))
                    .with_slow_threshold(self.config.slow_threshold),
            )
            .with(RequestGate::new(self.config.skip_set.clone()))
            .with(CookieInjector::new(&self.config.session_id))
    }

    fn handler(&self) -> FlowHandler {
        FlowHandler::new(HandlerConfig {
            addons: self.addons(),
            timer: Arc::clone(&self.timer),
            connections: self.connections.clone(),
        })
    }

    /// Starts the proxy server in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_tx_clone = shutdown_tx.clone();
        let addr = self.config.addr;

        // Load CA authority before spawning
        let authority = self.config.ca_manager.ensure_ca()?;
        let handler = self.handler();
        let timer = self.timer();
        let ca_cert_path = self.ca_cert_path();
        let skipped = self.config.skip_set.len();
        let passthrough = self.config.disabled_addresses.len();

        // Subscribe before spawning so an early shutdown is not missed.
        let mut shutdown_rx = shutdown_tx.subscribe();

        let proxy = Proxy::builder()
            .with_addr(addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        let handle = tokio::spawn(async move {
            tracing::info!("Starting MITM proxy on {}", addr);
            tracing::info!("CA certificate: {:?}", ca_cert_path);
            tracing::info!(
                "Skipping {} hosts, passing through {} clients",
                skipped,
                passthrough
            );

            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx: shutdown_tx_clone,
            addr,
            timer,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    timer: Arc<FlowTimer>,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of flows currently in flight.
    pub fn in_flight(&self) -> usize {
        self.timer.len()
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
