//! Addon hooks and the chain that dispatches them.
//!
//! Every addon returns a [`HookError`] instead of failing the exchange.
//! [`AddonChain`] is the one place those errors are caught: it logs them
//! with the flow's method and URL and carries on with the next addon.

use std::fmt;
use std::sync::Arc;

use crate::error::HookError;
use crate::flow::Flow;

/// A hook invoked by the proxy at each phase of a flow.
pub trait Addon: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Called once per request, before it is forwarded upstream.
    ///
    /// Setting a response on the flow stops it from being forwarded.
    fn request(&self, _flow: &mut Flow) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once per completed response.
    fn response(&self, _flow: &mut Flow) -> Result<(), HookError> {
        Ok(())
    }
}

/// Ordered list of addons run for every flow.
#[derive(Clone, Default)]
pub struct AddonChain {
    addons: Vec<Arc<dyn Addon>>,
}

impl AddonChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an addon; addons run in registration order.
    pub fn with<A: Addon + 'static>(mut self, addon: A) -> Self {
        self.addons.push(Arc::new(addon));
        self
    }

    /// Appends a shared addon.
    pub fn push(&mut self, addon: Arc<dyn Addon>) {
        self.addons.push(addon);
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// Runs every addon's request hook. Returns the number that failed.
    pub fn run_request(&self, flow: &mut Flow) -> usize {
        self.dispatch("request", flow, |addon, flow| addon.request(flow))
    }

    /// Runs every addon's response hook. Returns the number that failed.
    pub fn run_response(&self, flow: &mut Flow) -> usize {
        self.dispatch("response", flow, |addon, flow| addon.response(flow))
    }

    fn dispatch<F>(&self, phase: &'static str, flow: &mut Flow, hook: F) -> usize
    where
        F: Fn(&dyn Addon, &mut Flow) -> Result<(), HookError>,
    {
        let mut failures = 0;
        for addon in &self.addons {
            if let Err(e) = hook(addon.as_ref(), flow) {
                failures += 1;
                tracing::warn!(
                    addon = addon.name(),
                    phase,
                    flow = %flow.id(),
                    "{} hook failed for {} {}: {}",
                    addon.name(),
                    flow.method(),
                    flow.url(),
                    e
                );
            }
        }
        failures
    }
}

impl fmt::Debug for AddonChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.addons.iter().map(|addon| addon.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowIds;
    use hudsucker::{hyper::Request, Body};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    impl Addon for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn request(&self, _flow: &mut Flow) -> Result<(), HookError> {
            Err(HookError::MissingResponse)
        }

        fn response(&self, _flow: &mut Flow) -> Result<(), HookError> {
            Err(HookError::MissingRequest)
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Addon for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn request(&self, _flow: &mut Flow) -> Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn flow() -> Flow {
        let req = Request::builder()
            .uri("http://example.com/")
            .body(Body::empty())
            .unwrap();
        Flow::from_request(FlowIds::new().next_id(), req)
    }

    #[test]
    fn failure_does_not_stop_later_addons() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = AddonChain::new()
            .with(Failing)
            .with(Counting(Arc::clone(&calls)));

        let failures = chain.run_request(&mut flow());

        assert_eq!(failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_hooks_are_noops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = AddonChain::new().with(Counting(Arc::clone(&calls)));

        assert_eq!(chain.run_response(&mut flow()), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pushed_addon_is_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting: Arc<dyn Addon> = Arc::new(Counting(Arc::clone(&calls)));

        let mut first = AddonChain::new();
        first.push(Arc::clone(&counting));
        let mut second = AddonChain::new().with(Failing);
        second.push(counting);

        first.run_request(&mut flow());
        assert_eq!(second.run_request(&mut flow()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn debug_lists_addon_names() {
        let chain = AddonChain::new().with(Failing);
        assert_eq!(format!("{:?}", chain), r#"["failing"]"#);
        assert_eq!(chain.len(), 1);
    }
}
