//! Error types for the proxy.

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaManagerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listen address discovery failed.
    #[error("address resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// CA manager error type.
#[derive(Debug, Error)]
pub enum CaManagerError {
    /// Failed to generate CA certificate.
    #[error("Failed to generate CA: {0}")]
    Generation(String),

    /// Failed to read CA certificate.
    #[error("Failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse CA certificate.
    #[error("Failed to parse CA: {0}")]
    Parse(String),

    /// Failed to write CA certificate.
    #[error("Failed to write CA: {0}")]
    Write(String),
}

/// Errors raised by an addon while it inspects or mutates a flow.
///
/// These never leave the addon chain: the chain logs them and moves on.
#[derive(Debug, Error)]
pub enum HookError {
    /// The request half of the flow is not available in this phase.
    #[error("request is not available in this phase")]
    MissingRequest,

    /// The flow carries no response.
    #[error("flow has no response")]
    MissingResponse,

    /// A header value could not be built.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] hyper::header::InvalidHeaderValue),

    /// An existing header value is not visible ASCII.
    #[error("unreadable header value: {0}")]
    HeaderEncoding(#[from] hyper::header::ToStrError),

    /// A synthetic response could not be built.
    #[error("failed to build response: {0}")]
    Response(#[from] hyper::http::Error),
}

/// Errors from discovering the local address bound to the default route.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No usable route line was found.
    #[error("can't find default route")]
    NoDefaultRoute,

    /// No local interface shares a subnet with the route.
    #[error("can't find ip address")]
    NoMatchingAddress,

    /// A dotted-quad string did not parse.
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// The routing tool could not be started.
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The routing tool exited unsuccessfully.
    #[error("{program} exited with {status}")]
    CommandFailed { program: String, status: String },
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
