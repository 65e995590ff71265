//! Discovery of the local IPv4 address used to reach the default route.
//!
//! The routing table and interface list come from the `ip` tool. Parsing is
//! kept separate from running the commands so the matching logic is a pure
//! function of the two outputs.

use std::net::Ipv4Addr;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ResolveError;

/// Kernel-installed link route for a /22 or /24 network.
static LINK_ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d{1,3}(?:\.\d{1,3}){3})/(?:22|24) dev \S+ proto kernel scope link src \d{1,3}(?:\.\d{1,3}){3}",
    )
    .expect("link route pattern is valid")
});

static DEFAULT_ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"default via (\d{1,3}(?:\.\d{1,3}){3})").expect("default route pattern is valid")
});

static INET_ADDR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"inet (\d{1,3}(?:\.\d{1,3}){3})/(\d{1,2})").expect("inet pattern is valid")
});

/// An external command and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Runs the command and returns its stdout.
    fn run(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| ResolveError::Command {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ResolveError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Finds the local address on the default route's subnet.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    routes: ToolCommand,
    interfaces: ToolCommand,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self {
            routes: ToolCommand::new("ip", &["route"]),
            interfaces: ToolCommand::new("ip", &["addr"]),
        }
    }
}

impl AddressResolver {
    /// Creates a resolver that runs the given commands.
    pub fn with_commands(routes: ToolCommand, interfaces: ToolCommand) -> Self {
        Self { routes, interfaces }
    }

    /// Queries the OS and resolves the local address.
    pub fn resolve(&self) -> Result<Ipv4Addr, ResolveError> {
        let result = self.query();
        match &result {
            Ok(ip) => tracing::info!("Resolved local address {}", ip),
            Err(e) => tracing::info!("Failed to resolve local address: {}", e),
        }
        result
    }

    fn query(&self) -> Result<Ipv4Addr, ResolveError> {
        let routes = self.routes.run()?;
        let interfaces = self.interfaces.run()?;
        resolve_from(&routes, &interfaces)
    }
}

/// Resolves the local address from `ip route` and `ip addr` output.
///
/// When several interfaces share the route's subnet, the first listed wins.
pub fn resolve_from(routes: &str, interfaces: &str) -> Result<Ipv4Addr, ResolveError> {
    let route_ip = ip_to_int(&route_address(routes).ok_or(ResolveError::NoDefaultRoute)?)?;

    for (local, cidr) in interface_addresses(interfaces) {
        let Ok(local_ip) = ip_to_int(&local) else {
            tracing::debug!("Skipping malformed interface address {}", local);
            continue;
        };
        let mask = cidr_mask(cidr);
        if local_ip & mask == route_ip & mask {
            return Ok(Ipv4Addr::from(local_ip));
        }
    }

    Err(ResolveError::NoMatchingAddress)
}

/// Picks the route address: a /22 or /24 kernel link route first, the
/// default gateway otherwise.
pub fn route_address(routes: &str) -> Option<String> {
    if let Some(caps) = LINK_ROUTE.captures(routes) {
        return Some(caps[1].to_string());
    }

    routes
        .lines()
        .find_map(|line| DEFAULT_ROUTE.captures(line))
        .map(|caps| caps[1].to_string())
}

/// Lists every `inet <ip>/<cidr>` entry in order of appearance.
pub fn interface_addresses(interfaces: &str) -> Vec<(String, u8)> {
    INET_ADDR
        .captures_iter(interfaces)
        .filter_map(|caps| {
            let cidr = caps[2].parse::<u8>().ok().filter(|c| *c <= 32)?;
            Some((caps[1].to_string(), cidr))
        })
        .collect()
}

/// Packs a dotted-quad address into a big-endian integer.
pub fn ip_to_int(ip: &str) -> Result<u32, ResolveError> {
    ip.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| ResolveError::InvalidAddress(ip.to_string()))
}

/// Network mask for a prefix length; prefixes past 32 saturate.
pub fn cidr_mask(cidr: u8) -> u32 {
    match u32::from(cidr.min(32)) {
        0 => 0,
        bits => u32::MAX << (32 - bits),
    }
}
