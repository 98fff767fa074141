//! The browser boundary.
//!
//! The engine only ever talks to a page through [`Browser`]. Elements are
//! addressed by the CSS paths produced by
//! [`LocatorSynthesizer`](crate::locator::LocatorSynthesizer), so backends
//! never hand element handles across the trait.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::{Origin, Url};

/// How long `navigate` waits before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// The `load` event fired.
    Load,
    /// No network activity for a short while.
    NetworkIdle,
}

/// A request seen by the interception hook.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    /// True for top-level document requests.
    pub is_navigation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestDecision {
    Continue,
    /// Answer locally without touching the network.
    Fulfill { status: u16, body: String },
}

/// HTTP basic credentials, only ever presented to one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub origin: Origin,
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(site: &Url, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            origin: site.origin(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn applies_to(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| u.origin() == self.origin)
    }
}

pub type RequestInterceptor = Arc<dyn Fn(&InterceptedRequest) -> RequestDecision + Send + Sync>;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Element is not clickable: {0}")]
    NotClickable(String),

    #[error("No element matches locator: {0}")]
    ElementNotFound(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Execution context was destroyed")]
    ContextDestroyed,

    #[error("Timed out after {duration:?} waiting for {what}")]
    Timeout { what: String, duration: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No page is open")]
    NoPage,
}

impl BrowserError {
    /// Maps a bare error message from an automation layer onto a structured
    /// kind. Only used where the layer reports nothing better than text.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("not clickable") || lower.contains("not an element") {
            BrowserError::NotClickable(message.to_string())
        } else if lower.contains("execution context was destroyed")
            || lower.contains("cannot find context")
        {
            BrowserError::ContextDestroyed
        } else if lower.contains("navigation") && lower.contains("timeout") {
            BrowserError::NavigationTimeout(message.to_string())
        } else if lower.contains("no node") || lower.contains("could not find node") {
            BrowserError::ElementNotFound(message.to_string())
        } else {
            BrowserError::Protocol(message.to_string())
        }
    }

    /// Click failures the engine recovers from locally instead of pruning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BrowserError::NotClickable(_)
                | BrowserError::NavigationTimeout(_)
                | BrowserError::Timeout { .. }
                | BrowserError::ContextDestroyed
        )
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// One page of a browser session, driven sequentially.
#[async_trait]
pub trait Browser: Send {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> BrowserResult<()>;

    async fn current_url(&mut self) -> BrowserResult<String>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> BrowserResult<String>;

    async fn wait_for_load(&mut self, timeout: Duration) -> BrowserResult<()>;

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> BrowserResult<()>;

    async fn wait_for_selector(&mut self, locator: &str, timeout: Duration) -> BrowserResult<()>;

    async fn click(&mut self, locator: &str) -> BrowserResult<()>;

    /// Dispatches `click()` on the node itself, bypassing hit testing.
    async fn programmatic_click(&mut self, locator: &str) -> BrowserResult<()>;

    async fn type_text(&mut self, locator: &str, text: &str) -> BrowserResult<()>;

    async fn set_checked(&mut self, locator: &str) -> BrowserResult<()>;

    async fn select_option(&mut self, locator: &str, value: &str) -> BrowserResult<()>;

    async fn upload_file(&mut self, locator: &str, path: &Path) -> BrowserResult<()>;

    async fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) -> BrowserResult<()>;

    async fn set_basic_auth(&mut self, credentials: BasicAuth) -> BrowserResult<()>;

    /// Arranges for `alert`/`confirm`/`prompt` dialogs to be dismissed.
    async fn dismiss_dialogs(&mut self) -> BrowserResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()>;
}
