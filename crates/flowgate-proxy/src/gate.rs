//! Short-circuits requests to skip-listed hosts.

use hudsucker::{
    hyper::{header::CONTENT_TYPE, Response},
    Body,
};

use crate::addon::Addon;
use crate::error::HookError;
use crate::flow::Flow;
use crate::hosts::SkipSet;

/// Header marking a response as produced by the proxy itself.
pub const SYNTHETIC_HEADER: &str = "X-Flowgate-Synthetic";

/// Builds the empty 200 response served in place of a skipped request.
pub fn synthetic_response() -> Result<Response<Body>, HookError> {
    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, "text/html")
        .header(SYNTHETIC_HEADER, "true")
        .body(Body::empty())?;
    Ok(response)
}

/// Answers requests for skip-listed hosts without contacting them.
#[derive(Debug, Clone)]
pub struct RequestGate {
    skip: SkipSet,
}

impl RequestGate {
    pub fn new(skip: SkipSet) -> Self {
        Self { skip }
    }

    pub fn skip_set(&self) -> &SkipSet {
        &self.skip
    }
}

impl Addon for RequestGate {
    fn name(&self) -> &'static str {
        "request-gate"
    }

    fn request(&self, flow: &mut Flow) -> Result<(), HookError> {
        let Some(host) = flow.host() else {
            return Ok(());
        };

        if self.skip.contains(host) {
            tracing::debug!("Short-circuiting request to skipped host {}", host);
            flow.set_response(synthetic_response()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowIds;
    use http_body_util::BodyExt;
    use hudsucker::hyper::Request;

    fn gate() -> RequestGate {
        RequestGate::new(SkipSet::build(Vec::<String>::new(), ["ads.example.com"]))
    }

    fn flow(uri: &str) -> Flow {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        Flow::from_request(FlowIds::new().next_id(), req)
    }

    #[tokio::test]
    async fn skipped_host_gets_synthetic_response() {
        let mut flow = flow("https://ads.example.com/banner.js");
        gate().request(&mut flow).unwrap();

        assert!(flow.is_short_circuited());
        assert_eq!(flow.status(), Some(200));

        let response = flow.into_response().unwrap();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(response.headers().get(SYNTHETIC_HEADER).unwrap(), "true");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[test]
    fn other_host_is_left_alone() {
        let mut flow = flow("https://api.example.com/v1/items");
        gate().request(&mut flow).unwrap();

        assert!(flow.response().is_none());
        assert!(!flow.is_short_circuited());
    }

    #[test]
    fn request_without_host_is_left_alone() {
        let mut flow = flow("/relative");
        gate().request(&mut flow).unwrap();
        assert!(flow.response().is_none());
    }

    #[test]
    fn allowed_host_is_never_gated() {
        let gate = RequestGate::new(SkipSet::build(["ads.example.com"], ["ads.example.com"]));
        assert!(gate.skip_set().is_empty());

        let mut flow = flow("https://ads.example.com/");
        gate.request(&mut flow).unwrap();
        assert!(flow.response().is_none());
    }
}
