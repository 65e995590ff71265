//! Per-connection policy.
//!
//! hudsucker owns the accept loop, so the policy is applied by composition:
//! the proxy handler asks a [`ConnectionFactory`] for a
//! [`ConnectionOverride`] describing each client connection before any
//! addon runs. [`ServerOverride`] is the factory the server uses; it threads
//! the disabled address set through to every connection it describes.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Client addresses whose traffic is passed through untouched.
///
/// Compared by IP only; IPv4-mapped IPv6 addresses match their IPv4 form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisabledAddresses {
    addrs: HashSet<IpAddr>,
}

impl DisabledAddresses {
    pub fn new<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        Self {
            addrs: addrs.into_iter().map(|ip| ip.to_canonical()).collect(),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.addrs.contains(&ip.to_canonical())
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// How a client connection is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// TLS is intercepted and flows run through the addon chain.
    Intercept,
    /// Tunnels are relayed as-is and the addon chain is bypassed.
    Passthrough,
}

impl ConnectionMode {
    pub fn intercepts(self) -> bool {
        matches!(self, ConnectionMode::Intercept)
    }
}

/// Policy for one accepted client connection.
#[derive(Debug, Clone)]
pub struct ConnectionOverride {
    client_addr: SocketAddr,
    disabled_addresses: Arc<DisabledAddresses>,
}

impl ConnectionOverride {
    pub fn new(client_addr: SocketAddr, disabled_addresses: Arc<DisabledAddresses>) -> Self {
        Self {
            client_addr,
            disabled_addresses,
        }
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn disabled_addresses(&self) -> &DisabledAddresses {
        &self.disabled_addresses
    }

    /// Decides how the connection is handled.
    pub fn handle(&self) -> ConnectionMode {
        if self.disabled_addresses.contains(self.client_addr.ip()) {
            ConnectionMode::Passthrough
        } else {
            ConnectionMode::Intercept
        }
    }
}

/// Builds the policy for each client connection.
pub trait ConnectionFactory: Send + Sync {
    fn handle_client_connection(&self, client_addr: SocketAddr) -> ConnectionOverride;
}

/// Connection factory used by the proxy server.
#[derive(Debug, Clone, Default)]
pub struct ServerOverride {
    disabled_addresses: Arc<DisabledAddresses>,
}

impl ServerOverride {
    pub fn new(disabled_addresses: DisabledAddresses) -> Self {
        Self {
            disabled_addresses: Arc::new(disabled_addresses),
        }
    }

    pub fn disabled_addresses(&self) -> &DisabledAddresses {
        &self.disabled_addresses
    }
}

impl ConnectionFactory for ServerOverride {
    fn handle_client_connection(&self, client_addr: SocketAddr) -> ConnectionOverride {
        let connection = ConnectionOverride::new(client_addr, Arc::clone(&self.disabled_addresses));
        if !connection.handle().intercepts() {
            tracing::debug!("Passing through connection from {}", client_addr);
        }
        connection
    }
}
