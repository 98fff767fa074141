use crate::browser::{InterceptedRequest, RequestDecision, RequestInterceptor};
use crate::error::Result;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const BLOCKED_STATUS: u16 = 403;
pub const BLOCKED_BODY: &str =
    "<html><head><title>Out of scope</title></head><body>Blocked by skitter</body></html>";

/// Include/exclude policy over URLs.
///
/// A URL is in scope iff it matches no exclude pattern and at least one
/// include pattern.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ScopePolicy {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        let compile = |patterns: &[S]| {
            patterns
                .iter()
                .map(|p| Regex::new(p.as_ref()))
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn is_in_scope(&self, url: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        self.include.iter().any(|re| re.is_match(url))
    }

    /// Admits everything under `origin`, e.g. an authentication host the
    /// crawl must pass through.
    pub fn widen(&mut self, origin: &Url) -> Result<()> {
        let origin = origin.origin().ascii_serialization();
        let pattern = format!("^{}(/.*)?$", regex::escape(&origin));
        if self.include.iter().any(|re| re.as_str() == pattern) {
            return Ok(());
        }
        debug!("Widening scope to {}", origin);
        self.include.push(Regex::new(&pattern)?);
        Ok(())
    }

    pub fn include_patterns(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(Regex::as_str)
    }

    /// Request hook for the browser: out-of-scope requests are answered with
    /// a synthetic page and never reach the network.
    pub fn interceptor(&self) -> RequestInterceptor {
        let policy = self.clone();
        Arc::new(move |request: &InterceptedRequest| {
            if policy.is_in_scope(&request.url) {
                RequestDecision::Continue
            } else {
                debug!("Blocked out-of-scope request {} {}", request.method, request.url);
                RequestDecision::Fulfill {
                    status: BLOCKED_STATUS,
                    body: BLOCKED_BODY.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScopePolicy {
        ScopePolicy::new(&[r"https?://example\.com/.*"], &["/logout"]).unwrap()
    }

    #[test]
    fn test_in_scope() {
        let policy = policy();
        assert!(policy.is_in_scope("https://example.com/page"));
        assert!(!policy.is_in_scope("https://example.com/logout"));
        assert!(!policy.is_in_scope("https://other.com/"));
    }

    #[test]
    fn test_no_include_means_nothing_in_scope() {
        let empty: [&str; 0] = [];
        let policy = ScopePolicy::new(&empty, &empty).unwrap();
        assert!(!policy.is_in_scope("https://example.com/"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ScopePolicy::new(&["("], &[]).is_err());
    }

    #[test]
    fn test_widen_admits_origin_once() {
        let mut policy = policy();
        let login = Url::parse("https://login.example.net/sso?next=/").unwrap();
        policy.widen(&login).unwrap();
        policy.widen(&login).unwrap();
        assert!(policy.is_in_scope("https://login.example.net/callback"));
        assert!(!policy.is_in_scope("https://login.example.net.evil.com/"));
        assert_eq!(policy.include_patterns().count(), 2);
    }

    #[test]
    fn test_interceptor_decisions() {
        let interceptor = policy().interceptor();
        let request = |url: &str| InterceptedRequest {
            url: url.to_string(),
            method: "GET".to_string(),
            is_navigation: true,
        };
        assert_eq!(
            interceptor(&request("https://example.com/a")),
            RequestDecision::Continue
        );
        assert!(matches!(
            interceptor(&request("https://tracker.io/pixel")),
            RequestDecision::Fulfill { status: 403, .. }
        ));
    }
}
