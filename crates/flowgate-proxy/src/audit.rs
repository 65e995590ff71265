//! Warns about failing or slow upstream responses.
//!
//! The auditor never touches the response. It owns the request-start half
//! of the timing as well, so every flow it sees on the way in is reclaimed
//! on the way out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::addon::Addon;
use crate::error::HookError;
use crate::flow::Flow;
use crate::timer::FlowTimer;

/// Responses taking longer than this are reported as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(10);

/// Lowest status code reported as an error.
pub const ERROR_STATUS: u16 = 400;

/// Something worth a warning about a completed flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// The upstream answered with a 4xx or 5xx status.
    ErrorStatus { status: u16 },
    /// The exchange took longer than the slow threshold.
    Slow {
        duration: Duration,
        status: Option<u16>,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ErrorStatus { status } => write!(f, "status code {}", status),
            Anomaly::Slow { duration, status } => {
                write!(f, "slow request took {:.2}s", duration.as_secs_f64())?;
                match status {
                    Some(status) => write!(f, " (status {})", status),
                    None => write!(f, " (status unknown)"),
                }
            }
        }
    }
}

/// Decides whether a completed flow deserves a warning.
///
/// An error status wins over slowness: the slow check only runs for
/// responses below 400. Unknown values skip their check.
pub fn assess(
    status: Option<u16>,
    duration: Option<Duration>,
    slow_threshold: Duration,
) -> Option<Anomaly> {
    match (status, duration) {
        (Some(status), _) if status >= ERROR_STATUS => Some(Anomaly::ErrorStatus { status }),
        (status, Some(duration)) if duration > slow_threshold => {
            Some(Anomaly::Slow { duration, status })
        }
        _ => None,
    }
}

/// Times every flow and logs anomalous responses.
#[derive(Debug, Clone)]
pub struct ResponseAuditor {
    timer: Arc<FlowTimer>,
    slow_threshold: Duration,
}

impl ResponseAuditor {
    pub fn new(timer: Arc<FlowTimer>) -> Self {
        Self {
            timer,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Sets the slow-request threshold.
    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }

    pub fn timer(&self) -> &Arc<FlowTimer> {
        &self.timer
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Reclaims the flow's timer entry and reports any anomaly.
    pub fn audit(&self, flow: &Flow) -> Option<Anomaly> {
        // Always pop first, even for error statuses, so the entry is freed.
        let duration = self.timer.on_response(flow.id());
        if duration.is_none() {
            tracing::trace!("No start time recorded for {}", flow.id());
        }

        let anomaly = assess(flow.status(), duration, self.slow_threshold);
        match &anomaly {
            Some(Anomaly::ErrorStatus { status }) => {
                tracing::warn!(
                    "{} {} returned status code {}",
                    flow.method(),
                    flow.url(),
                    status
                );
            }
            Some(anomaly @ Anomaly::Slow { .. }) => {
                tracing::warn!("{}: {}", anomaly, flow.summary());
            }
            None => {}
        }
        anomaly
    }
}

impl Addon for ResponseAuditor {
    fn name(&self) -> &'static str {
        "response-auditor"
    }

    fn request(&self, flow: &mut Flow) -> Result<(), HookError> {
        self.timer.on_request(flow.id());
        Ok(())
    }

    fn response(&self, flow: &mut Flow) -> Result<(), HookError> {
        self.audit(flow);
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
    use std::time::Instant;

    fn summary() -> RequestSummary {
        let req = Request::builder()
            .uri("https://api.example.com/items")
            .body(Body::empty())
            .unwrap();
        RequestSummary::of(&req)
    }

    fn response_flow(ids: &FlowIds, status: u16) -> Flow {
        let res = Response::builder().status(status).body(Body::empty()).unwrap();
        Flow::from_response(ids.next_id(), summary(), res)
    }

    #[test]
    fn slow_success_is_one_slow_warning() {
        let anomaly = assess(Some(200), Some(Duration::from_millis(12_500)), DEFAULT_SLOW_THRESHOLD);
        let anomaly = anomaly.unwrap();

        assert!(matches!(anomaly, Anomaly::Slow { .. }));
        assert!(anomaly.to_string().contains("12.50"));
        assert!(anomaly.to_string().contains("status 200"));
    }

    #[test]
    fn fast_error_is_one_status_warning() {
        let anomaly = assess(Some(500), Some(Duration::from_millis(500)), DEFAULT_SLOW_THRESHOLD);
        assert_eq!(anomaly, Some(Anomaly::ErrorStatus { status: 500 }));
        assert!(!anomaly.unwrap().to_string().contains("slow"));
    }

    #[test]
    fn slow_error_reports_status_only() {
        let anomaly = assess(Some(503), Some(Duration::from_secs(30)), DEFAULT_SLOW_THRESHOLD);
        assert_eq!(anomaly, Some(Anomaly::ErrorStatus { status: 503 }));
    }

    #[test]
    fn status_boundary() {
        assert_eq!(assess(Some(399), None, DEFAULT_SLOW_THRESHOLD), None);
        assert_eq!(
            assess(Some(400), None, DEFAULT_SLOW_THRESHOLD),
            Some(Anomaly::ErrorStatus { status: 400 })
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(assess(Some(200), Some(DEFAULT_SLOW_THRESHOLD), DEFAULT_SLOW_THRESHOLD), None);
    }

    #[test]
    fn unknown_values_skip_checks() {
        assert_eq!(assess(None, None, DEFAULT_SLOW_THRESHOLD), None);
        assert_eq!(assess(Some(200), None, DEFAULT_SLOW_THRESHOLD), None);

        let anomaly = assess(None, Some(Duration::from_secs(11)), DEFAULT_SLOW_THRESHOLD).unwrap();
        assert!(anomaly.to_string().contains("status unknown"));
    }

    #[test]
    fn audit_detects_slow_flow_from_timer() {
        let ids = FlowIds::new();
        let timer = Arc::new(FlowTimer::new());
        let auditor = ResponseAuditor::new(Arc::clone(&timer));
        let flow = response_flow(&ids, 200);

        timer.on_request_at(flow.id(), Instant::now() - Duration::from_secs(11));
        let anomaly = auditor.audit(&flow);

        assert!(matches!(anomaly, Some(Anomaly::Slow { status: Some(200), .. })));
        assert!(timer.is_empty());
    }

    #[test]
    fn audit_without_request_is_silent() {
        let ids = FlowIds::new();
        let auditor = ResponseAuditor::new(Arc::new(FlowTimer::new()));
        assert_eq!(auditor.audit(&response_flow(&ids, 200)), None);
    }

    #[test]
    fn audit_reclaims_every_entry() {
        let ids = FlowIds::new();
        let timer = Arc::new(FlowTimer::new());
        let auditor = ResponseAuditor::new(Arc::clone(&timer));

        let mut flows: Vec<Flow> = [200, 204, 301, 404, 500, 502]
            .into_iter()
            .cycle()
            .take(60)
            .map(|status| response_flow(&ids, status))
            .collect();

        for flow in &mut flows {
            timer.on_request(flow.id());
        }
        assert_eq!(timer.len(), 60);

        for flow in &mut flows {
            auditor.response(flow).unwrap();
        }
        assert_eq!(timer.len(), 0);
    }

    #[test]
    fn custom_threshold() {
        let ids = FlowIds::new();
        let timer = Arc::new(FlowTimer::new());
        let auditor =
            ResponseAuditor::new(Arc::clone(&timer)).with_slow_threshold(Duration::from_secs(1));
        let flow = response_flow(&ids, 200);

        timer.on_request_at(flow.id(), Instant::now() - Duration::from_secs(2));
        assert!(matches!(auditor.audit(&flow), Some(Anomaly::Slow { .. })));
        assert_eq!(auditor.slow_threshold(), Duration::from_secs(1));
    }
}
