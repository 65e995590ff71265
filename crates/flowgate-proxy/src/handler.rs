//! HTTP handler connecting hudsucker to the addon chain.
//!
//! hudsucker clones the handler for every request and drives both phases of
//! that request on the same clone, so the clone carries the flow id and
//! request summary from `handle_request` to `handle_response`.

use std::net::SocketAddr;
use std::sync::Arc;

use hudsucker::{
    hyper::{Method, Request, Response, StatusCode},
    hyper_util, Body, HttpContext, HttpHandler, RequestOrResponse,
};

use crate::addon::AddonChain;
use crate::connection::ConnectionFactory;
use crate::flow::{Flow, FlowId, FlowIds, FlowOutcome, RequestSummary};
use crate::timer::FlowTimer;

/// Shared state behind every handler clone.
#[derive(Clone)]
pub struct HandlerConfig {
    /// Addons run for each flow.
    pub addons: AddonChain,
    /// Timer shared with the response auditor.
    pub timer: Arc<FlowTimer>,
    /// Per-connection policy.
    pub connections: Arc<dyn ConnectionFactory>,
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("addons", &self.addons)
            .field("in_flight", &self.timer.len())
            .field("connections", &"ConnectionFactory")
            .finish()
    }
}

/// Flow forwarded upstream and waiting for its response.
#[derive(Debug)]
struct PendingFlow {
    id: FlowId,
    summary: RequestSummary,
}

/// HTTP handler for the MITM proxy.
#[derive(Debug)]
pub struct FlowHandler {
    config: HandlerConfig,
    ids: Arc<FlowIds>,
    pending: Option<PendingFlow>,
}

impl FlowHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            config,
            ids: Arc::new(FlowIds::new()),
            pending: None,
        }
    }

    /// Runs the request phase for a request from `client_addr`.
    pub fn begin(&mut self, client_addr: SocketAddr, req: Request<Body>) -> RequestOrResponse {
        // CONNECT only opens the tunnel; the requests inside it are flows.
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        if !self.intercepts(client_addr) {
            return RequestOrResponse::Request(req);
        }

        // A clone is used for exactly one request.
        self.release();

        let id = self.ids.next_id();
        let mut flow = Flow::from_request(id, req);
        self.config.addons.run_request(&mut flow);

        match flow.into_outcome() {
            Some(FlowOutcome::Forward(req)) => {
                self.pending = Some(PendingFlow {
                    id,
                    summary: RequestSummary::of(&req),
                });
                RequestOrResponse::Request(req)
            }
            Some(FlowOutcome::ShortCircuit { summary, response }) => {
                // The engine skips the response hook for answered requests.
                RequestOrResponse::Response(self.respond(id, summary, response))
            }
            None => RequestOrResponse::Response(Self::fallback()),
        }
    }

    /// Runs the response phase for the pending flow.
    ///
    /// Responses with no pending flow (passthrough traffic) are returned
    /// unchanged.
    pub fn finish(&mut self, res: Response<Body>) -> Response<Body> {
        match self.pending.take() {
            Some(pending) => self.respond(pending.id, pending.summary, res),
            None => res,
        }
    }

    /// Answers a failed upstream request with a 502.
    ///
    /// The engine sends this response straight to the client, so the
    /// response phase runs here.
    pub fn upstream_failed(&mut self, err: &dyn std::fmt::Display) -> Response<Body> {
        match &self.pending {
            Some(pending) => tracing::warn!(
                "Upstream request failed for {}: {}",
                pending.summary,
                err
            ),
            None => tracing::warn!("Upstream request failed: {}", err),
        }
        self.finish(Self::fallback())
    }

    /// Whether traffic from `client_addr` goes through the addons.
    pub fn intercepts(&self, client_addr: SocketAddr) -> bool {
        self.config
            .connections
            .handle_client_connection(client_addr)
            .handle()
            .intercepts()
    }

    /// Number of flows this handler's timer still tracks.
    pub fn in_flight(&self) -> usize {
        self.config.timer.len()
    }

    fn respond(&self, id: FlowId, summary: RequestSummary, res: Response<Body>) -> Response<Body> {
        let mut flow = Flow::from_response(id, summary, res);
        self.config.addons.run_response(&mut flow);
        flow.into_response().unwrap_or_else(Self::fallback)
    }

    fn fallback() -> Response<Body> {
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::BAD_GATEWAY;
        res
    }

    /// Forgets the pending flow, evicting its timer entry.
    fn release(&mut self) {
        if let Some(pending) = self.pending.take() {
            if self.config.timer.evict(pending.id) {
                tracing::debug!("Evicted unfinished {}", pending.id);
            }
        }
    }
}

impl Clone for FlowHandler {
    fn clone(&self) -> Self {
        // Pending flows belong to the clone that started them.
        Self {
            config: self.config.clone(),
            ids: Arc::clone(&self.ids),
            pending: None,
        }
    }
}

impl Drop for FlowHandler {
    fn drop(&mut self) {
        // Aborted exchanges never reach handle_response.
        self.release();
    }
}

impl HttpHandler for FlowHandler {
    async fn handle_request(&mut self, ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.begin(ctx.client_addr, req)
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.finish(res)
    }

    async fn handle_error(
        &mut self,
        _ctx: &HttpContext,
        err: hyper_util::client::legacy::Error,
    ) -> Response<Body> {
        self.upstream_failed(&err)
    }

    async fn should_intercept(&mut self, ctx: &HttpContext, _req: &Request<Body>) -> bool {
        self.intercepts(ctx.client_addr)
    }
}
