//! Flowgate Proxy - interception layer for an HTTP/HTTPS MITM proxy.
//!
//! hudsucker terminates TLS and speaks HTTP; this crate decides what happens
//! to each intercepted flow.
//!
//! ## Features
//!
//! - Answers requests for skip-listed hosts with an empty synthetic page
//! - Tags every forwarded request with an `xrequestid` session cookie
//! - Times every flow and warns about error statuses and slow responses
//! - Passes selected client addresses through without interception
//! - Discovers the default-route address and a free port for listening
//!
//! ## Architecture
//!
//! ```text
//! Client → hudsucker → FlowHandler → Connection policy → Passthrough?
//!                                            │
//!                          ┌─────────────────┴──────────────┐
//!                          │ No                             │ Yes
//!                          ▼                                ▼
//!                     AddonChain (request)              Forward as-is
//!              auditor → gate → cookie injector
//!                          │
//!           ┌──────────────┴───────────────┐
//!           │ Forward                      │ Short-circuit
//!           ▼                              ▼
//!        Upstream ──► AddonChain (response) ◄── Synthetic 200
//!                         auditor
//! ```
//!
//! Addon failures are contained by [`AddonChain`]: they are logged and the
//! flow continues. Startup failures ([`AddressResolver`], [`free_port`])
//! are returned to the caller.

mod addon;
mod audit;
mod ca;
mod connection;
mod cookie;
mod error;
mod flow;
mod gate;
mod handler;
mod hosts;
mod port;
mod proxy;
pub mod resolver;
mod timer;

pub use addon::{Addon, AddonChain};
pub use audit::{assess, Anomaly, ResponseAuditor, DEFAULT_SLOW_THRESHOLD, ERROR_STATUS};
pub use ca::{CaManager, CaManagerError};
pub use connection::{
    ConnectionFactory, ConnectionMode, ConnectionOverride, DisabledAddresses, ServerOverride,
};
pub use cookie::{CookieInjector, REQUEST_ID_COOKIE};
pub use error::{HookError, ProxyError, ResolveError, Result};
pub use flow::{Flow, FlowId, FlowIds, FlowOutcome, RequestSummary};
pub use gate::{synthetic_response, RequestGate, SYNTHETIC_HEADER};
pub use handler::{FlowHandler, HandlerConfig};
pub use hosts::SkipSet;
pub use port::free_port;
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use resolver::AddressResolver;
pub use timer::FlowTimer;

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8766;

#[cfg(test)]
mod tests {
    use super::*;
    use hudsucker::{
        hyper::{Request, Response},
        Body, RequestOrResponse,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn handler(skipped: &[&str], timer: Arc<FlowTimer>) -> FlowHandler {
        let addons = AddonChain::new()
            .with(ResponseAuditor::new(Arc::clone(&timer)))
            .with(RequestGate::new(SkipSet::build(
                Vec::<String>::new(),
                skipped.iter().copied(),
            )))
            .with(CookieInjector::new("run-42"));

        FlowHandler::new(HandlerConfig {
            addons,
            timer,
            connections: Arc::new(ServerOverride::default()),
        })
    }

    fn client() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], 40000))
    }

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8766);
    }

    #[test]
    fn skipped_host_never_reaches_upstream() {
        let timer = Arc::new(FlowTimer::new());
        let mut handler = handler(&["ads.example.com"], Arc::clone(&timer));

        let ads = Request::builder()
            .uri("https://ads.example.com/track")
            .body(Body::empty())
            .unwrap();
        match handler.begin(client(), ads) {
            RequestOrResponse::Response(res) => assert_eq!(res.status(), 200),
            RequestOrResponse::Request(_) => panic!("skipped host was forwarded"),
        }

        let api = Request::builder()
            .uri("https://api.example.com/v1")
            .body(Body::empty())
            .unwrap();
        let mut upstream = handler.clone();
        match upstream.begin(client(), api) {
            RequestOrResponse::Request(req) => {
                assert_eq!(req.uri().host(), Some("api.example.com"));
            }
            RequestOrResponse::Response(_) => panic!("allowed host was short-circuited"),
        }

        let res = upstream.finish(Response::builder().status(500).body(Body::empty()).unwrap());
        assert_eq!(res.status(), 500);
        assert!(timer.is_empty());
    }

    #[test]
    fn many_flows_leave_timer_empty() {
        let timer = Arc::new(FlowTimer::new());
        let base = handler(&["ads.example.com"], Arc::clone(&timer));

        let mut handlers: Vec<FlowHandler> = (0..20)
            .map(|i| {
                let host = if i % 4 == 0 { "ads.example.com" } else { "api.example.com" };
                let req = Request::builder()
                    .uri(format!("https://{}/{}", host, i))
                    .body(Body::empty())
                    .unwrap();
                let mut h = base.clone();
                let _ = h.begin(client(), req);
                h
            })
            .collect();

        assert_eq!(timer.len(), 15);
        for (i, h) in handlers.iter_mut().enumerate() {
            let status = if i % 3 == 0 { 404 } else { 200 };
            let _ = h.finish(Response::builder().status(status).body(Body::empty()).unwrap());
        }
        assert!(timer.is_empty());
    }
}
