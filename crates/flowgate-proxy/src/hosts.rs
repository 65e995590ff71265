//! Host skip-list.
//!
//! Decides which hosts are answered by the proxy itself instead of being
//! forwarded upstream.

use std::collections::HashSet;

/// Immutable set of hostnames to short-circuit.
///
/// Built once as `skipped - allowed`, so an allowed host is never skipped
/// even when it is listed in both. Hostnames are compared verbatim: no case
/// folding, no port stripping.
///
/// # Examples
///
/// ```
/// use flowgate_proxy::SkipSet;
///
/// let skip = SkipSet::build(["cdn.example.com"], ["ads.example.com", "cdn.example.com"]);
/// assert!(skip.contains("ads.example.com"));
/// assert!(!skip.contains("cdn.example.com"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSet {
    hosts: HashSet<String>,
}

impl SkipSet {
    /// Builds the skip-list from the allowed and skipped host lists.
    pub fn build<A, S>(allowed: A, skipped: S) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let allowed: HashSet<String> = allowed.into_iter().map(Into::into).collect();
        let hosts = skipped
            .into_iter()
            .map(Into::into)
            .filter(|host| !allowed.contains(host))
            .collect();

        Self { hosts }
    }

    /// Returns an empty skip-list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks whether the host should be short-circuited.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Iterates over the skipped hosts in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}
