//! Chrome DevTools backend.
//!
//! Drives a real Chromium through chromiumoxide, so script-driven pages
//! behave as they would for a user. Scope filtering runs on the Fetch
//! domain: paused requests are continued, answered with the synthetic page
//! for documents, or failed with `BlockedByClient` for subresources. Basic
//! credentials ride on the same hook, added only to requests for their own
//! origin.

use crate::browser::{
    BasicAuth, Browser, BrowserError, BrowserResult, InterceptedRequest, RequestDecision, RequestInterceptor,
    WaitPolicy,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, HeaderEntry, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_QUIET: Duration = Duration::from_millis(500);

/// Launch options for [`ChromeBrowser`].
#[derive(Debug, Clone, Default)]
pub struct ChromeOptions {
    pub headless: bool,
    pub maximize: bool,
    /// `host:port` of an upstream proxy.
    pub proxy: Option<String>,
}

/// What the Fetch listener applies to every paused request.
#[derive(Default)]
struct FetchRules {
    interceptor: Option<RequestInterceptor>,
    auth: Option<BasicAuth>,
}

pub struct ChromeBrowser {
    browser: CdpBrowser,
    page: Page,
    handler: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
    rules: Arc<Mutex<FetchRules>>,
    fetch_enabled: bool,
}

impl From<CdpError> for BrowserError {
    fn from(e: CdpError) -> Self {
        match e {
            CdpError::Timeout => BrowserError::Timeout {
                what: "devtools response".to_string(),
                duration: Duration::ZERO,
            },
            other => BrowserError::classify(&other.to_string()),
        }
    }
}

impl ChromeBrowser {
    pub async fn launch(options: &ChromeOptions) -> BrowserResult<Self> {
        let mut config = BrowserConfig::builder();
        if !options.headless {
            config = config.with_head();
        }
        if options.maximize {
            config = config.viewport(None).arg("--start-maximized");
        }
        if let Some(proxy) = &options.proxy {
            config = config.arg(format!("--proxy-server={}", proxy));
        }
        let config = config.build().map_err(BrowserError::Protocol)?;

        let (browser, mut handler) = CdpBrowser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        let page = browser.new_page("about:blank").await?;
        debug!("Chrome launched (headless: {})", options.headless);

        Ok(Self {
            browser,
            page,
            handler,
            listeners: Vec::new(),
            rules: Arc::new(Mutex::new(FetchRules::default())),
            fetch_enabled: false,
        })
    }

    fn update_rules(&self, update: impl FnOnce(&mut FetchRules)) -> BrowserResult<()> {
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| BrowserError::Protocol("fetch rules lock poisoned".to_string()))?;
        update(&mut rules);
        Ok(())
    }

    /// Pauses every request on the Fetch domain, once per session.
    async fn enable_fetch(&mut self) -> BrowserResult<()> {
        if self.fetch_enabled {
            return Ok(());
        }
        // Listen before enabling so no paused request is missed
        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        let enable = EnableParams::builder()
            .pattern(RequestPattern::builder().url_pattern("*").build())
            .build();
        self.page.execute(enable).await?;

        let page = self.page.clone();
        let rules = self.rules.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                if let Err(e) = answer(&page, &event, &rules).await {
                    warn!("Could not answer paused request {}: {}", event.request.url, e);
                }
            }
        }));
        self.fetch_enabled = true;
        Ok(())
    }

    /// Runs `body` as a function on the element matched by `locator`.
    async fn call_on(&self, locator: &str, body: &str) -> BrowserResult<()> {
        let selector = json_string(locator)?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; {} return true; }})()",
            selector, body
        );
        let found: bool = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }

    async fn ready_state(&self) -> BrowserResult<String> {
        self.page
            .evaluate("document.readyState")
            .await?
            .into_value()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn resource_count(&self) -> BrowserResult<u64> {
        self.page
            .evaluate("performance.getEntriesByType('resource').length")
            .await?
            .into_value()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

fn json_string(value: &str) -> BrowserResult<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::Protocol(e.to_string()))
}

/// The paused request's headers plus `Authorization`, or `None` when the
/// credentials do not belong to `url`'s origin.
fn authorized_headers(
    headers: &serde_json::Value,
    url: &str,
    auth: Option<&BasicAuth>,
) -> Option<Vec<(String, String)>> {
    let auth = auth.filter(|a| a.applies_to(url))?;
    let mut entries: Vec<(String, String)> = headers
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("authorization"))
                .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    entries.push(("Authorization".to_string(), format!("Basic {}", token)));
    Some(entries)
}

async fn answer(
    page: &Page,
    event: &EventRequestPaused,
    rules: &Mutex<FetchRules>,
) -> BrowserResult<()> {
    let (interceptor, auth) = {
        let rules = rules
            .lock()
            .map_err(|_| BrowserError::Protocol("fetch rules lock poisoned".to_string()))?;
        (rules.interceptor.clone(), rules.auth.clone())
    };
    let is_navigation = event.resource_type == ResourceType::Document;
    let request = InterceptedRequest {
        url: event.request.url.clone(),
        method: event.request.method.clone(),
        is_navigation,
    };
    let decision = interceptor.map_or(RequestDecision::Continue, |intercept| intercept(&request));

    match decision {
        RequestDecision::Continue => {
            let mut resume = ContinueRequestParams::new(event.request_id.clone());
            resume.headers = authorized_headers(
                event.request.headers.inner(),
                &event.request.url,
                auth.as_ref(),
            )
            .map(|headers| {
                headers
                    .into_iter()
                    .map(|(name, value)| HeaderEntry::new(name, value))
                    .collect()
            });
            page.execute(resume).await?;
        }
        RequestDecision::Fulfill { status, body } if is_navigation => {
            let fulfill = FulfillRequestParams::builder()
                .request_id(event.request_id.clone())
                .response_code(i64::from(status))
                .body(STANDARD.encode(body))
                .build()
                .map_err(BrowserError::Protocol)?;
            page.execute(fulfill).await?;
        }
        RequestDecision::Fulfill { .. } => {
            page.execute(FailRequestParams::new(
                event.request_id.clone(),
                ErrorReason::BlockedByClient,
            ))
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> BrowserResult<()> {
        self.page.goto(url).await?;
        match wait {
            WaitPolicy::Load => Ok(()),
            WaitPolicy::NetworkIdle => self.wait_for_network_idle(Duration::from_secs(30)).await,
        }
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        while self.ready_state().await? != "complete" {
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "document load".to_string(),
                    duration: timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    // No in-flight request tracking over the trait; resource timing entries
    // that stop growing for a while are the idle signal.
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        let mut last = self.resource_count().await?;
        let mut quiet_since = Instant::now();
        loop {
            sleep(POLL_INTERVAL).await;
            let count = self.resource_count().await?;
            if count != last {
                last = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= IDLE_QUIET {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "network idle".to_string(),
                    duration: timeout,
                });
            }
        }
    }

    async fn wait_for_selector(&mut self, locator: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(locator).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(locator.to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, locator: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(locator)
            .await
            .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
        element.click().await?;
        Ok(())
    }

    async fn programmatic_click(&mut self, locator: &str) -> BrowserResult<()> {
        self.call_on(locator, "el.click();").await
    }

    async fn type_text(&mut self, locator: &str, text: &str) -> BrowserResult<()> {
        self.call_on(locator, "el.value = '';").await?;
        let element = self
            .page
            .find_element(locator)
            .await
            .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn set_checked(&mut self, locator: &str) -> BrowserResult<()> {
        self.call_on(
            locator,
            "el.checked = true; el.dispatchEvent(new Event('change', { bubbles: true }));",
        )
        .await
    }

    async fn select_option(&mut self, locator: &str, value: &str) -> BrowserResult<()> {
        let body = format!(
            "el.value = {}; el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
            json_string(value)?
        );
        self.call_on(locator, &body).await
    }

    async fn upload_file(&mut self, locator: &str, path: &Path) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(locator)
            .await
            .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
        let params = SetFileInputFilesParams::builder()
            .file(path.to_string_lossy().into_owned())
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(BrowserError::Protocol)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) -> BrowserResult<()> {
        self.update_rules(|rules| rules.interceptor = Some(interceptor))?;
        self.enable_fetch().await
    }

    async fn set_basic_auth(&mut self, credentials: BasicAuth) -> BrowserResult<()> {
        self.update_rules(|rules| rules.auth = Some(credentials))?;
        self.enable_fetch().await
    }

    async fn dismiss_dialogs(&mut self) -> BrowserResult<()> {
        let mut dialogs = self
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await?;
        let page = self.page.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(dialog) = dialogs.next().await {
                debug!("Dismissing {:?} dialog: {}", dialog.r#type, dialog.message);
                if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(false)).await {
                    warn!("Could not dismiss dialog: {}", e);
                }
            }
        }));
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.browser.close().await?;
        if let Err(e) = self.browser.wait().await {
            debug!("Chrome did not exit cleanly: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn credentials() -> BasicAuth {
        let site = Url::parse("https://app.example.com/").unwrap();
        BasicAuth::new(&site, "admin", "secret")
    }

    #[test]
    fn test_authorization_added_for_same_origin() {
        let headers = json!({ "Accept": "text/html", "authorization": "Bearer stale" });
        let entries =
            authorized_headers(&headers, "https://app.example.com/home", Some(&credentials()))
                .unwrap();
        assert_eq!(
            entries,
            vec![
                ("Accept".to_string(), "text/html".to_string()),
                ("Authorization".to_string(), "Basic YWRtaW46c2VjcmV0".to_string()),
            ]
        );
    }

    #[test]
    fn test_other_origins_are_left_alone() {
        let headers = json!({ "Accept": "*/*" });
        assert_eq!(
            authorized_headers(&headers, "https://cdn.example.com/app.js", Some(&credentials())),
            None
        );
        assert_eq!(
            authorized_headers(&headers, "https://app.example.com/", None),
            None
        );
    }
}
