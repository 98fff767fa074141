//! Session authentication before a crawl.
//!
//! Two mechanisms, usable together: HTTP basic credentials handed to the
//! browser for the entry point's origin, and playback of a Chrome DevTools Recorder export that logs in
//! through the application's own forms. Playback happens before the scope
//! interceptor is installed, so the login flow may leave the crawl scope.

use scraper::{Html, Selector};
use serde::Deserialize;
use skitter_scanner::browser::{BasicAuth, Browser, BrowserError, BrowserResult, WaitPolicy};
use skitter_scanner::{ScanError, ScopePolicy};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Selector prefixes the recorder emits for non-CSS strategies.
const NON_CSS_PREFIXES: [&str; 4] = ["aria/", "xpath/", "pierce/", "text/"];

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to read recording {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed recording: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Recording step {step} navigates to an invalid URL '{url}'")]
    InvalidUrl { step: usize, url: String },

    #[error("Recording step {step} has no CSS selector")]
    NoSelector { step: usize },

    #[error("Recording step {step} failed: {source}")]
    Step { step: usize, source: BrowserError },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScanError),
}

/// A recorder selector alternative. Chains of more than one part pierce
/// shadow roots and cannot be expressed as a single CSS locator.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SelectorChain {
    Single(String),
    Chain(Vec<String>),
}

impl SelectorChain {
    fn css(&self) -> Option<&str> {
        let selector = match self {
            SelectorChain::Single(s) => s.as_str(),
            SelectorChain::Chain(parts) if parts.len() == 1 => parts[0].as_str(),
            SelectorChain::Chain(_) => return None,
        };
        if NON_CSS_PREFIXES.iter().any(|p| selector.starts_with(p)) {
            None
        } else {
            Some(selector)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Navigate {
        url: String,
    },
    Click {
        selectors: Vec<SelectorChain>,
    },
    Change {
        selectors: Vec<SelectorChain>,
        value: String,
    },
    WaitForElement {
        selectors: Vec<SelectorChain>,
    },
    /// Viewport, key presses, custom steps and anything newer.
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub title: String,
    pub steps: Vec<Step>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = fs::read_to_string(path).map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let recording: Recording = serde_json::from_str(raw)?;
        recording.origins()?;
        Ok(recording)
    }

    /// URLs of the navigate steps, in order.
    pub fn origins(&self) -> Result<Vec<Url>, AuthError> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(i, step)| match step {
                Step::Navigate { url } => Some(
                    Url::parse(url).map_err(|_| AuthError::InvalidUrl {
                        step: i,
                        url: url.clone(),
                    }),
                ),
                _ => None,
            })
            .collect()
    }

    /// Admits every origin the recording navigates to.
    pub fn widen_scope(&self, scope: &mut ScopePolicy) -> Result<(), AuthError> {
        for origin in self.origins()? {
            scope.widen(&origin)?;
        }
        Ok(())
    }
}

/// Which authentication to run before crawling.
#[derive(Debug, Clone, Default)]
pub struct AuthPlan {
    pub basic: Option<BasicAuth>,
    pub recording: Option<Recording>,
}

impl AuthPlan {
    pub fn is_empty(&self) -> bool {
        self.basic.is_none() && self.recording.is_none()
    }
}

pub async fn authenticate(
    browser: &mut dyn Browser,
    plan: &AuthPlan,
    timeout: Duration,
) -> Result<(), AuthError> {
    if let Some(credentials) = &plan.basic {
        info!("Using basic authentication as {}", credentials.username);
        browser.set_basic_auth(credentials.clone()).await?;
    }
    if let Some(recording) = &plan.recording {
        info!("Playing authentication recording '{}'", recording.title);
        play(browser, recording, timeout).await?;
    }
    Ok(())
}

async fn play(browser: &mut dyn Browser, recording: &Recording, timeout: Duration) -> Result<(), AuthError> {
    for (i, step) in recording.steps.iter().enumerate() {
        let at = |source: BrowserError| AuthError::Step { step: i, source };
        match step {
            Step::Navigate { url } => {
                debug!("Step {}: navigate to {}", i, url);
                // Login forms are often rendered by script after `load`
                within(timeout, browser.navigate(url, WaitPolicy::NetworkIdle))
                    .await
                    .map_err(at)?;
                within(timeout, browser.wait_for_load(timeout)).await.map_err(at)?;
            }
            Step::Click { selectors } => {
                let locator = css_selector(i, selectors)?;
                debug!("Step {}: click {}", i, locator);
                within(timeout, browser.wait_for_selector(locator, timeout))
                    .await
                    .map_err(at)?;
                match within(timeout, browser.click(locator)).await {
                    Err(BrowserError::NotClickable(_)) => {
                        within(timeout, browser.programmatic_click(locator))
                            .await
                            .map_err(at)?
                    }
                    other => other.map_err(at)?,
                }
            }
            Step::Change { selectors, value } => {
                let locator = css_selector(i, selectors)?;
                debug!("Step {}: change {}", i, locator);
                within(timeout, browser.wait_for_selector(locator, timeout))
                    .await
                    .map_err(at)?;
                let html = within(timeout, browser.content()).await.map_err(at)?;
                if is_select(&html, locator) {
                    within(timeout, browser.select_option(locator, value))
                        .await
                        .map_err(at)?;
                } else {
                    within(timeout, browser.type_text(locator, value))
                        .await
                        .map_err(at)?;
                }
            }
            Step::WaitForElement { selectors } => {
                let locator = css_selector(i, selectors)?;
                debug!("Step {}: wait for {}", i, locator);
                within(timeout, browser.wait_for_selector(locator, timeout))
                    .await
                    .map_err(at)?;
            }
            Step::Ignored => debug!("Step {}: skipped", i),
        }
    }
    Ok(())
}

async fn within<T>(
    limit: Duration,
    operation: impl Future<Output = BrowserResult<T>>,
) -> BrowserResult<T> {
    tokio::time::timeout(limit, operation)
        .await
        .unwrap_or_else(|_| {
            Err(BrowserError::Timeout {
                what: "recording step".to_string(),
                duration: limit,
            })
        })
}

fn css_selector(step: usize, selectors: &[SelectorChain]) -> Result<&str, AuthError> {
    selectors
        .iter()
        .find_map(SelectorChain::css)
        .ok_or(AuthError::NoSelector { step })
}

fn is_select(html: &str, locator: &str) -> bool {
    let Ok(selector) = Selector::parse(locator) else {
        return false;
    };
    Html::parse_document(html)
        .select(&selector)
        .next()
        .is_some_and(|el| el.value().name() == "select")
}
