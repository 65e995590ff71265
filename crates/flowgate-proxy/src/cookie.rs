//! Tags every outgoing request with the session's request id cookie.

use hudsucker::hyper::header::{HeaderValue, COOKIE};

use crate::addon::Addon;
use crate::error::HookError;
use crate::flow::Flow;

/// Cookie name carrying the session id.
pub const REQUEST_ID_COOKIE: &str = "xrequestid";

/// Appends `xrequestid=<id>` to the request's `Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieInjector {
    pair: String,
}

impl CookieInjector {
    pub fn new(session_id: impl AsRef<str>) -> Self {
        Self {
            pair: format!("{}={}", REQUEST_ID_COOKIE, session_id.as_ref()),
        }
    }

    /// The `name=value` pair appended to each request.
    pub fn cookie_pair(&self) -> &str {
        &self.pair
    }
}

impl Addon for CookieInjector {
    fn name(&self) -> &'static str {
        "cookie-injector"
    }

    fn request(&self, flow: &mut Flow) -> Result<(), HookError> {
        let headers = flow.request_headers_mut().ok_or(HookError::MissingRequest)?;

        // HTTP/2 clients may split cookies over several headers; fold them
        // into a single one.
        let mut existing = Vec::new();
        for value in headers.get_all(COOKIE) {
            let value = value.to_str()?;
            if !value.is_empty() {
                existing.push(value);
            }
        }

        let cookie = if existing.is_empty() {
            self.pair.clone()
        } else {
            format!("{}; {}", existing.join("; "), self.pair)
        };

        headers.insert(COOKIE, HeaderValue::from_str(&cookie)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowIds, RequestSummary};
    use hudsucker::{
        hyper::{Request, Response},
        Body,
    };

    fn flow_with(cookies: &[&str]) -> Flow {
        let mut builder = Request::builder().uri("http://example.com/");
        for cookie in cookies {
            builder = builder.header("cookie", *cookie);
        }
        Flow::from_request(FlowIds::new().next_id(), builder.body(Body::empty()).unwrap())
    }

    fn cookies(flow: &Flow) -> Vec<String> {
        flow.request_headers()
            .unwrap()
            .get_all(COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn sets_cookie_when_absent() {
        let injector = CookieInjector::new("abc123");
        let mut flow = flow_with(&[]);
        injector.request(&mut flow).unwrap();
        assert_eq!(cookies(&flow), vec![injector.cookie_pair()]);
        assert_eq!(injector.cookie_pair(), "xrequestid=abc123");
    }

    #[test]
    fn appends_to_existing_cookie() {
        let mut flow = flow_with(&["session=xyz"]);
        CookieInjector::new("abc123").request(&mut flow).unwrap();
        assert_eq!(cookies(&flow), vec!["session=xyz; xrequestid=abc123"]);
    }

    #[test]
    fn merges_split_cookie_headers() {
        let mut flow = flow_with(&["a=1", "b=2"]);
        CookieInjector::new("id").request(&mut flow).unwrap();

        let values = cookies(&flow);
        assert_eq!(values.len(), 1);
        assert!(values[0].starts_with("a=1; b=2; "));
        assert!(values[0].ends_with("xrequestid=id"));
    }

    #[test]
    fn empty_cookie_is_treated_as_absent() {
        let mut flow = flow_with(&[""]);
        CookieInjector::new("id").request(&mut flow).unwrap();
        assert_eq!(cookies(&flow), vec!["xrequestid=id"]);
    }

    #[test]
    fn response_phase_flow_reports_missing_request() {
        let req = Request::builder().uri("http://example.com/").body(Body::empty()).unwrap();
        let summary = RequestSummary::of(&req);
        let res = Response::builder().body(Body::empty()).unwrap();
        let mut flow = Flow::from_response(FlowIds::new().next_id(), summary, res);

        let err = CookieInjector::new("id").request(&mut flow).unwrap_err();
        assert!(matches!(err, HookError::MissingRequest));
    }

    #[test]
    fn invalid_session_id_is_an_error() {
        let mut flow = flow_with(&[]);
        let err = CookieInjector::new("bad\nid").request(&mut flow).unwrap_err();
        assert!(matches!(err, HookError::InvalidHeader(_)));
    }
}
