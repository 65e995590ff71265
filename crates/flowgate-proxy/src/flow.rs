//! Typed view of one intercepted request/response exchange.
//!
//! A [`Flow`] wraps the engine's hyper request or response so addons work
//! against explicit accessors instead of raw engine types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hudsucker::{
    hyper::{header::HeaderMap, Method, Request, Response, Uri},
    Body,
};

/// Opaque identity of one flow, stable from request to response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

impl FlowId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Source of fresh flow ids, shared by every handler clone.
#[derive(Debug, Default)]
pub struct FlowIds {
    next: AtomicU64,
}

impl FlowIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an id never handed out before by this source.
    pub fn next_id(&self) -> FlowId {
        FlowId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the proxy remembers about a request after it has been forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    method: Method,
    uri: Uri,
    host: Option<String>,
}

impl RequestSummary {
    /// Captures method, URI and host from a request.
    pub fn of<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            host: extract_host(req),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Full request URL, rebuilt from the host when the URI is origin-form.
    pub fn url(&self) -> String {
        match (&self.host, self.uri.scheme()) {
            (Some(host), None) => format!("http://{}{}", host, self.uri),
            _ => self.uri.to_string(),
        }
    }
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url())
    }
}

/// Extracts host from request URI or Host header.
fn extract_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }

    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|s| strip_port(s).to_string())
}

/// Drops a trailing `:port`, keeping bracketed IPv6 literals intact.
fn strip_port(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port))
            if port.bytes().all(|b| b.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']')) =>
        {
            host
        }
        _ => authority,
    }
}

/// How the request phase of a flow ended.
pub enum FlowOutcome {
    /// Send the (possibly modified) request upstream.
    Forward(Request<Body>),
    /// An addon answered the request; nothing goes upstream.
    ShortCircuit {
        summary: RequestSummary,
        response: Response<Body>,
    },
}

/// One intercepted exchange as seen by the addons.
///
/// During the request phase the flow owns the request and may gain a
/// synthetic response. During the response phase it owns only the response
/// plus the summary captured at request time.
pub struct Flow {
    id: FlowId,
    summary: RequestSummary,
    request: Option<Request<Body>>,
    response: Option<Response<Body>>,
}

impl Flow {
    /// Starts the request phase.
    pub fn from_request(id: FlowId, request: Request<Body>) -> Self {
        Self {
            id,
            summary: RequestSummary::of(&request),
            request: Some(request),
            response: None,
        }
    }

    /// Starts the response phase.
    pub fn from_response(id: FlowId, summary: RequestSummary, response: Response<Body>) -> Self {
        Self {
            id,
            summary,
            request: None,
            response: Some(response),
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn summary(&self) -> &RequestSummary {
        &self.summary
    }

    pub fn host(&self) -> Option<&str> {
        self.summary.host()
    }

    pub fn method(&self) -> &Method {
        self.summary.method()
    }

    pub fn url(&self) -> String {
        self.summary.url()
    }

    /// Request headers, available during the request phase only.
    pub fn request_headers(&self) -> Option<&HeaderMap> {
        self.request.as_ref().map(Request::headers)
    }

    pub fn request_headers_mut(&mut self) -> Option<&mut HeaderMap> {
        self.request.as_mut().map(Request::headers_mut)
    }

    pub fn response(&self) -> Option<&Response<Body>> {
        self.response.as_ref()
    }

    /// Response status code, if a response is attached.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|res| res.status().as_u16())
    }

    /// Attaches a response. During the request phase this stops the
    /// request from being forwarded.
    pub fn set_response(&mut self, response: Response<Body>) {
        self.response = Some(response);
    }

    /// True when the request phase produced its own response.
    pub fn is_short_circuited(&self) -> bool {
        self.request.is_some() && self.response.is_some()
    }

    /// Ends the request phase.
    ///
    /// Returns `None` only for a flow built with [`Flow::from_response`].
    pub fn into_outcome(self) -> Option<FlowOutcome> {
        match (self.request, self.response) {
            (Some(_), Some(response)) => Some(FlowOutcome::ShortCircuit {
                summary: self.summary,
                response,
            }),
            (Some(request), None) => Some(FlowOutcome::Forward(request)),
            (None, _) => None,
        }
    }

    /// Ends the response phase.
    pub fn into_response(self) -> Option<Response<Body>> {
        self.response
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("summary", &self.summary)
            .field("has_request", &self.request.is_some())
            .field("status", &self.status())
            .finish()
    }
}
