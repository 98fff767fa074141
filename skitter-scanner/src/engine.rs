//! The crawl loop.
//!
//! `CrawlEngine` owns the browser session and the graph. It bootstraps the
//! root state from the entry point, then repeatedly asks the manager for the
//! next unexecuted action, replays the shortest recorded path whenever the
//! browser is not sitting on that action's parent state, performs the action
//! and files the resulting page as a merge, a new state or a pruned edge.

use crate::browser::{Browser, BrowserError, BrowserResult, WaitPolicy};
use crate::error::{Result, ScanError};
use crate::fingerprint::{Interactables, fingerprint};
use crate::locator::LocatorSynthesizer;
use crate::manager::CrawlStateManager;
use crate::model::{ActionId, ActionSpec, CrawlAction, FillStrategy, StateId, discover_inputs};
use crate::scope::ScopePolicy;
use scraper::Html;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Bootstrapping,
    Exploring,
    Replaying,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct CrawlProgress {
    pub phase: Phase,
    pub states: usize,
    pub executed: usize,
    pub url: String,
}

pub type ProgressCallback = Arc<dyn Fn(&CrawlProgress) + Send + Sync>;

/// Immutable crawl settings. `None` limits are unbounded.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub entry_point: Url,
    /// CSS selectors of clickable targets.
    pub elements: Vec<String>,
    pub event_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Settle time after every interaction.
    pub event_wait: Duration,
    pub max_duration: Option<Duration>,
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub upload_file: Option<PathBuf>,
}

impl CrawlerConfig {
    pub fn new(entry_point: Url, elements: Vec<String>) -> Self {
        Self {
            entry_point,
            elements,
            event_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
            event_wait: Duration::from_secs(1),
            max_duration: None,
            max_depth: None,
            max_children: None,
            upload_file: None,
        }
    }

    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_event_wait(mut self, wait: Duration) -> Self {
        self.event_wait = wait;
        self
    }

    pub fn with_max_duration(mut self, duration: Option<Duration>) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_children(mut self, children: Option<usize>) -> Self {
        self.max_children = children;
        self
    }

    pub fn with_upload_file(mut self, path: Option<PathBuf>) -> Self {
        self.upload_file = path;
        self
    }
}

/// Outcome of a crawl, also available after a fatal error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    pub states: usize,
    pub actions: usize,
    pub executed: usize,
    pub pruned: usize,
    pub replays: usize,
    pub merges: usize,
    pub deadline_reached: bool,
    pub elapsed_ms: u64,
    /// In-scope URLs in the order they were first reached.
    pub urls: Vec<String>,
}

#[derive(Debug, Default)]
struct Stats {
    executed: usize,
    pruned: usize,
    replays: usize,
    merges: usize,
    deadline_reached: bool,
    elapsed: Duration,
}

pub struct CrawlEngine {
    browser: Box<dyn Browser>,
    config: CrawlerConfig,
    scope: ScopePolicy,
    interactables: Interactables,
    manager: CrawlStateManager,
    urls: Vec<String>,
    seen_urls: HashSet<String>,
    stats: Stats,
    phase: Phase,
    progress_callback: Option<ProgressCallback>,
}

impl CrawlEngine {
    pub fn new(browser: Box<dyn Browser>, config: CrawlerConfig, scope: ScopePolicy) -> Result<Self> {
        let interactables = Interactables::new(&config.elements)?;
        Ok(Self {
            browser,
            config,
            scope,
            interactables,
            manager: CrawlStateManager::new(),
            urls: Vec::new(),
            seen_urls: HashSet::new(),
            stats: Stats::default(),
            phase: Phase::Bootstrapping,
            progress_callback: None,
        })
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn manager(&self) -> &CrawlStateManager {
        &self.manager
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn report(&self) -> CrawlReport {
        CrawlReport {
            states: self.manager.state_count(),
            actions: self.manager.action_count(),
            executed: self.stats.executed,
            pruned: self.stats.pruned,
            replays: self.stats.replays,
            merges: self.stats.merges,
            deadline_reached: self.stats.deadline_reached,
            elapsed_ms: u64::try_from(self.stats.elapsed.as_millis()).unwrap_or(u64::MAX),
            urls: self.urls.clone(),
        }
    }

    /// Crawls until the graph is exhausted or the deadline passes, then
    /// closes the browser. Whatever was collected stays available through
    /// [`report`](Self::report) even when this returns an error.
    pub async fn run(&mut self) -> Result<()> {
        let started = Instant::now();
        let deadline = self.config.max_duration.map(|d| started + d);
        info!("Starting crawl of {}", self.config.entry_point);

        let result = self.crawl(deadline).await;

        self.phase = Phase::Terminated;
        self.stats.elapsed = started.elapsed();
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        info!(
            "Crawl finished: {} states, {} actions executed, {} pruned",
            self.manager.state_count(),
            self.stats.executed,
            self.stats.pruned
        );
        result
    }

    async fn crawl(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.bootstrap().await?;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Crawl deadline reached");
                self.stats.deadline_reached = true;
                break;
            }
            let Some(action) = self.manager.next_action() else {
                debug!("No actions left to explore");
                break;
            };
            self.dispatch(action).await?;
        }
        Ok(())
    }

    async fn bootstrap(&mut self) -> Result<()> {
        self.phase = Phase::Bootstrapping;
        let entry = self.config.entry_point.to_string();
        if !self.scope.is_in_scope(&entry) {
            return Err(ScanError::InvalidUrl(format!(
                "entry point {} is not in scope",
                entry
            )));
        }

        self.browser
            .set_request_interceptor(self.scope.interceptor())
            .await?;
        self.browser.dismiss_dialogs().await?;
        self.goto_entry_point().await?;

        let (url, html) = self.snapshot().await?;
        let hash = fingerprint(&html, &self.interactables);
        let root = self.manager.add_state(url.clone(), hash, 0);
        self.manager.set_root(root);
        info!("Root state {} at {}", root, url);
        self.record_url(url);
        self.expand(root, &html)?;
        self.notify();
        Ok(())
    }

    async fn dispatch(&mut self, id: ActionId) -> Result<()> {
        let Some(action) = self.manager.action(id).cloned() else {
            return Ok(());
        };
        let Some((parent_hash, parent_depth)) = self
            .manager
            .state(action.parent)
            .map(|s| (s.hash.clone(), s.depth))
        else {
            return Ok(());
        };

        let (_, html) = self.snapshot().await?;
        if fingerprint(&html, &self.interactables) != parent_hash {
            self.phase = Phase::Replaying;
            self.stats.replays += 1;
            debug!("Browser is not at {}, replaying", action.parent);
            if let Err(e) = self.replay_to(action.parent).await {
                warn!("Replay to {} failed: {}", action.parent, e);
                self.prune(id, "replay path broken");
                return Ok(());
            }
        }

        self.phase = Phase::Exploring;
        if let Err(e) = self.perform(&action).await {
            warn!("Action {} ({}) failed: {}", id, action.locator, e);
            self.prune(id, "execution failed");
            return Ok(());
        }
        self.stats.executed += 1;
        sleep(self.config.event_wait).await;

        let (url, html) = self.snapshot().await?;
        let hash = fingerprint(&html, &self.interactables);
        if let Some(existing) = self.manager.find_state_by_hash(&hash).map(|s| s.id) {
            debug!("Action {} leads to known state {}", id, existing);
            self.manager.set_child(id, existing);
            self.stats.merges += 1;
            if self.scope.is_in_scope(&url) {
                self.record_url(url);
            }
        } else if self.scope.is_in_scope(&url) {
            let child = self.manager.add_state(url.clone(), hash, parent_depth + 1);
            self.manager.set_child(id, child);
            info!("New state {} at {} (depth {})", child, url, parent_depth + 1);
            self.record_url(url);
            self.expand(child, &html)?;
        } else {
            debug!("Action {} leaves scope for {}", id, url);
            self.prune(id, "out of scope");
        }

        self.notify();
        Ok(())
    }

    /// Returns to the entry point and walks the shortest recorded path to
    /// `target`.
    async fn replay_to(&mut self, target: StateId) -> BrowserResult<()> {
        let path = self.manager.shortest_path(target).ok_or_else(|| {
            BrowserError::Protocol(format!("state {} is unreachable from the root", target))
        })?;

        self.goto_entry_point().await?;
        for step in path {
            let Some(action) = self.manager.action(step).cloned() else {
                return Err(BrowserError::Protocol(format!("action {} vanished", step)));
            };
            debug!("Replaying {} ({})", step, action.locator);
            self.perform(&action).await?;
            sleep(self.config.event_wait).await;
        }
        Ok(())
    }

    async fn goto_entry_point(&mut self) -> BrowserResult<()> {
        let entry = self.config.entry_point.to_string();
        let limit = self.config.navigation_timeout;
        match bounded("navigation", limit, self.browser.navigate(&entry, WaitPolicy::Load)).await {
            Err(BrowserError::NavigationTimeout(_) | BrowserError::Timeout { .. }) => {
                debug!("Navigation to {} timed out, waiting for network idle", entry);
                bounded("network idle", limit, self.browser.wait_for_network_idle(limit)).await
            }
            other => other,
        }
    }

    /// Fills the parent's inputs unless the target is a plain anchor, then
    /// clicks it.
    async fn perform(&mut self, action: &CrawlAction) -> BrowserResult<()> {
        if !action.element.is_anchor() {
            self.fill_inputs(action.parent).await;
        }

        let locator = action.locator.as_str();
        let event_timeout = self.config.event_timeout;
        let navigation_timeout = self.config.navigation_timeout;
        bounded(
            "element",
            event_timeout,
            self.browser.wait_for_selector(locator, event_timeout),
        )
        .await?;

        match bounded("click", navigation_timeout, self.browser.click(locator)).await {
            Err(e) if e.is_recoverable() => self.recover_click(locator, e).await,
            other => other,
        }
    }

    /// Second attempt after a click failed in a way the page can get over.
    async fn recover_click(&mut self, locator: &str, error: BrowserError) -> BrowserResult<()> {
        let limit = self.config.navigation_timeout;
        if let BrowserError::NotClickable(reason) = &error {
            debug!("{} not clickable ({}), clicking programmatically", locator, reason);
            return bounded("click", limit, self.browser.programmatic_click(locator)).await;
        }
        debug!("Clicking {} did not settle ({}), waiting for network idle", locator, error);
        bounded("network idle", limit, self.browser.wait_for_network_idle(limit)).await
    }

    async fn fill_inputs(&mut self, state: StateId) {
        let inputs = self
            .manager
            .state(state)
            .map(|s| s.inputs.clone())
            .unwrap_or_default();

        let limit = self.config.event_timeout;
        for input in inputs {
            let locator = input.locator.as_str();
            let filled = match input.kind.fill_strategy() {
                FillStrategy::Type(text) => {
                    bounded("fill", limit, self.browser.type_text(locator, text)).await
                }
                FillStrategy::Check | FillStrategy::Choose => {
                    bounded("fill", limit, self.browser.set_checked(locator)).await
                }
                FillStrategy::SelectOption(value) => {
                    bounded("fill", limit, self.browser.select_option(locator, &value)).await
                }
                FillStrategy::Upload => match &self.config.upload_file {
                    Some(path) => {
                        bounded("fill", limit, self.browser.upload_file(locator, path)).await
                    }
                    None => continue,
                },
                FillStrategy::Skip => continue,
            };
            if let Err(e) = filled {
                debug!("Could not fill {}: {}", locator, e);
            }
        }
    }

    /// Current URL and DOM, retried once if a navigation tore down the
    /// document mid-read.
    async fn snapshot(&mut self) -> Result<(String, String)> {
        let limit = self.config.navigation_timeout;
        if let Err(e) = bounded("load", limit, self.browser.wait_for_load(limit)).await {
            debug!("Page did not finish loading: {}", e);
        }

        match self.read_page().await {
            Ok(page) => Ok(page),
            Err(BrowserError::ContextDestroyed) => {
                debug!("Snapshot raced a navigation, retrying");
                if let Err(e) =
                    bounded("load", limit, self.browser.wait_for_network_idle(limit)).await
                {
                    debug!("Network did not settle: {}", e);
                }
                self.read_page().await.map_err(|e| self.snapshot_error(e))
            }
            Err(e) => Err(self.snapshot_error(e)),
        }
    }

    async fn read_page(&mut self) -> BrowserResult<(String, String)> {
        let url = self.browser.current_url().await?;
        let html = self.browser.content().await?;
        Ok((url, html))
    }

    fn snapshot_error(&self, e: BrowserError) -> ScanError {
        ScanError::Snapshot {
            url: self.urls.last().cloned().unwrap_or_default(),
            reason: e.to_string(),
        }
    }

    /// Discovers the actions and inputs of a freshly created state.
    fn expand(&mut self, state: StateId, html: &str) -> Result<()> {
        let Some(depth) = self.manager.state(state).map(|s| s.depth) else {
            return Ok(());
        };
        if self.config.max_depth.is_some_and(|max| depth >= max) {
            debug!("{} is at maximum depth, not expanding", state);
            return Ok(());
        }

        let document = Html::parse_document(html);
        let synthesizer = LocatorSynthesizer::new(&document);

        // One selector group keeps matches in document order
        let paths = synthesizer.locate(&self.config.elements.join(", "))?;
        let mut added = 0;
        for path in paths {
            if self.config.max_children.is_some_and(|max| added >= max) {
                break;
            }
            if !self.manager.is_action_unique(&path.css_path, &path.content_hash) {
                continue;
            }
            if self.manager.add_action(state, ActionSpec::click(path)).is_some() {
                added += 1;
            }
        }

        for input in discover_inputs(&synthesizer)? {
            self.manager.add_input(state, input);
        }
        debug!("Expanded {}: {} actions", state, added);
        Ok(())
    }

    fn prune(&mut self, id: ActionId, reason: &str) {
        if self.manager.remove_action(id).is_some() {
            debug!("Pruned action {}: {}", id, reason);
            self.stats.pruned += 1;
        }
    }

    fn record_url(&mut self, url: String) {
        if self.seen_urls.insert(url.clone()) {
            self.urls.push(url);
        }
    }

    fn notify(&self) {
        if let Some(callback) = &self.progress_callback {
            callback(&CrawlProgress {
                phase: self.phase,
                states: self.manager.state_count(),
                executed: self.stats.executed,
                url: self.urls.last().cloned().unwrap_or_default(),
            });
        }
    }
}

/// Enforces `limit` on a browser operation.
async fn bounded<T>(
    what: &str,
    limit: Duration,
    operation: impl Future<Output = BrowserResult<T>>,
) -> BrowserResult<T> {
    match timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout {
            what: what.to_string(),
            duration: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BasicAuth, RequestInterceptor};
    use async_trait::async_trait;
    use scraper::Selector;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Scripted pages keyed by URL; anchors navigate by `href`.
    #[derive(Default)]
    struct FakeBrowser {
        pages: HashMap<String, String>,
        current: Option<String>,
        not_clickable: HashSet<String>,
        missing: HashSet<String>,
        /// Locators that stop matching once clicked.
        vanishing: HashSet<String>,
        /// Clicks that never return.
        stalled_clicks: HashSet<String>,
        stall_typing: bool,
        destroy_next_read: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeBrowser {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn follow(&mut self, locator: &str) -> BrowserResult<()> {
            let current = self.current.clone().ok_or(BrowserError::NoPage)?;
            let html = self.pages.get(&current).cloned().unwrap_or_default();
            let href = {
                let document = Html::parse_document(&html);
                let selector = Selector::parse(locator)
                    .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
                let element = document
                    .select(&selector)
                    .next()
                    .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
                element.value().attr("href").map(str::to_string)
            };
            if let Some(href) = href {
                let next = Url::parse(&current)
                    .and_then(|u| u.join(&href))
                    .map_err(|e| BrowserError::Protocol(e.to_string()))?;
                self.current = Some(next.to_string());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Browser for FakeBrowser {
        async fn navigate(&mut self, url: &str, _wait: WaitPolicy) -> BrowserResult<()> {
            self.log.lock().unwrap().push(format!("navigate {}", url));
            self.current = Some(url.to_string());
            Ok(())
        }

        async fn current_url(&mut self) -> BrowserResult<String> {
            self.current.clone().ok_or(BrowserError::NoPage)
        }

        async fn content(&mut self) -> BrowserResult<String> {
            if self.destroy_next_read {
                self.destroy_next_read = false;
                return Err(BrowserError::ContextDestroyed);
            }
            let current = self.current.clone().ok_or(BrowserError::NoPage)?;
            Ok(self.pages.get(&current).cloned().unwrap_or_default())
        }

        async fn wait_for_load(&mut self, _timeout: Duration) -> BrowserResult<()> {
            Ok(())
        }

        async fn wait_for_network_idle(&mut self, _timeout: Duration) -> BrowserResult<()> {
            self.log.lock().unwrap().push("network idle".to_string());
            Ok(())
        }

        async fn wait_for_selector(&mut self, locator: &str, _timeout: Duration) -> BrowserResult<()> {
            if self.missing.contains(locator) {
                return Err(BrowserError::ElementNotFound(locator.to_string()));
            }
            Ok(())
        }

        async fn click(&mut self, locator: &str) -> BrowserResult<()> {
            if self.not_clickable.contains(locator) {
                return Err(BrowserError::NotClickable(locator.to_string()));
            }
            self.log.lock().unwrap().push(format!("click {}", locator));
            if self.stalled_clicks.contains(locator) {
                return std::future::pending().await;
            }
            if self.vanishing.contains(locator) {
                self.missing.insert(locator.to_string());
            }
            self.follow(locator)
        }

        async fn programmatic_click(&mut self, locator: &str) -> BrowserResult<()> {
            self.log.lock().unwrap().push(format!("programmatic {}", locator));
            self.follow(locator)
        }

        async fn type_text(&mut self, locator: &str, text: &str) -> BrowserResult<()> {
            self.log.lock().unwrap().push(format!("type {} {}", locator, text));
            if self.stall_typing {
                return std::future::pending().await;
            }
            Ok(())
        }

        async fn set_checked(&mut self, _locator: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn select_option(&mut self, _locator: &str, _value: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn upload_file(&mut self, _locator: &str, _path: &Path) -> BrowserResult<()> {
            Ok(())
        }

        async fn set_request_interceptor(&mut self, _interceptor: RequestInterceptor) -> BrowserResult<()> {
            Ok(())
        }

        async fn set_basic_auth(&mut self, _credentials: BasicAuth) -> BrowserResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> BrowserResult<()> {
            self.current = None;
            Ok(())
        }
    }

    fn config(entry: &str, elements: &[&str]) -> CrawlerConfig {
        CrawlerConfig::new(
            Url::parse(entry).unwrap(),
            elements.iter().map(|s| s.to_string()).collect(),
        )
        .with_event_wait(Duration::ZERO)
    }

    fn scope() -> ScopePolicy {
        ScopePolicy::new(&[r"^https://app\.test/"], &["/logout"]).unwrap()
    }

    #[tokio::test]
    async fn test_not_clickable_falls_back_to_programmatic_click() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut browser = FakeBrowser::default()
            .page(
                "https://app.test/",
                r#"<html><body><a id="go" href="/next">Next</a></body></html>"#,
            )
            .page(
                "https://app.test/next",
                r#"<html><body><button>Stay</button></body></html>"#,
            );
        browser.not_clickable.insert("#go".to_string());
        browser.log = log.clone();

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a", "button"]),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();

        let log = log.lock().unwrap();
        assert!(log.contains(&"programmatic #go".to_string()));
        assert_eq!(engine.urls(), ["https://app.test/", "https://app.test/next"]);
        assert_eq!(engine.phase(), Phase::Terminated);
    }

    #[tokio::test]
    async fn test_inputs_filled_before_non_anchor_actions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><form><input type="text" name="q"><button>Go</button></form><a href="/">Home</a></body></html>"#,
        );
        browser.log = log.clone();

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a", "button"]),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();

        let log = log.lock().unwrap();
        let typed = log.iter().position(|l| l.starts_with("type ")).unwrap();
        let clicked_button = log.iter().position(|l| l.ends_with("> button")).unwrap();
        assert!(typed < clicked_button);
        assert!(log[typed].ends_with(" skitter"));
        // Both actions loop back to the only state
        assert_eq!(engine.report().merges, 2);
        assert_eq!(engine.manager().state_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_retries_once_after_context_destroyed() {
        let mut browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><a href="/">Home</a></body></html>"#,
        );
        browser.destroy_next_read = true;

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a"]),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();
        assert_eq!(engine.manager().state_count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_scope_entry_point_is_rejected() {
        let browser = FakeBrowser::default();
        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/logout", &["a"]),
            scope(),
        )
        .unwrap();
        assert!(matches!(engine.run().await, Err(ScanError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_missing_locator_prunes_action() {
        let mut browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><a id="ghost" href="/ghost">Ghost</a></body></html>"#,
        );
        browser.missing.insert("#ghost".to_string());

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a"]),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();
        let report = engine.report();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.executed, 0);
        assert_eq!(report.actions, 0);
    }

    #[tokio::test]
    async fn test_deadline_stops_crawl() {
        let browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><a href="/a">A</a><a href="/b">B</a></body></html>"#,
        );
        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a"]).with_max_duration(Some(Duration::ZERO)),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();
        let report = engine.report();
        assert!(report.deadline_reached);
        assert_eq!(report.executed, 0);
        assert_eq!(report.actions, 2);
    }

    #[tokio::test]
    async fn test_broken_replay_prunes_target_and_keeps_path() {
        let mut browser = FakeBrowser::default()
            .page(
                "https://app.test/",
                r#"<html><body><a id="a" href="/a">A</a></body></html>"#,
            )
            .page(
                "https://app.test/a",
                r#"<html><body><a id="b" href="/b">B</a><a id="c" href="/c">C</a></body></html>"#,
            )
            .page(
                "https://app.test/b",
                r#"<html><body><a id="x" href="/x">X</a></body></html>"#,
            )
            .page(
                "https://app.test/c",
                r#"<html><body><a id="d" href="/d">D</a></body></html>"#,
            )
            .page("https://app.test/d", "<html><body><p>d</p></body></html>");
        browser.vanishing.insert("#b".to_string());

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a"]),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();

        let report = engine.report();
        // #x needs #b replayed, which is gone; /c and /d are reached without it
        assert_eq!(report.pruned, 1);
        assert_eq!(report.executed, 4);
        assert_eq!(report.replays, 3);
        assert_eq!(
            report.urls,
            [
                "https://app.test/",
                "https://app.test/a",
                "https://app.test/b",
                "https://app.test/c",
                "https://app.test/d",
            ]
        );

        let manager = engine.manager();
        let locators: Vec<&str> = manager.actions().map(|a| a.locator.as_str()).collect();
        assert_eq!(locators, ["#a", "#b", "#c", "#d"]);
        assert!(manager.actions().all(|a| a.is_executed()));
        let b = manager
            .states()
            .find(|s| s.url == "https://app.test/b")
            .unwrap();
        assert!(b.actions.is_empty());
        assert_eq!(manager.shortest_path(b.id).map(|p| p.len()), Some(2));
    }

    #[tokio::test]
    async fn test_stalled_fill_does_not_hold_up_the_crawl() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><form><input name="q"><button>Go</button></form></body></html>"#,
        );
        browser.stall_typing = true;
        browser.log = log.clone();

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["button"])
                .with_event_timeout(Duration::from_millis(50))
                .with_max_duration(Some(Duration::from_secs(5))),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();

        let report = engine.report();
        assert!(!report.deadline_reached);
        assert_eq!(report.executed, 1);
        assert_eq!(report.pruned, 0);
        let log = log.lock().unwrap();
        assert!(log.iter().any(|l| l.starts_with("type ")));
        assert!(log.iter().any(|l| l.starts_with("click ")));
    }

    #[tokio::test]
    async fn test_click_timeout_waits_for_network_idle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut browser = FakeBrowser::default().page(
            "https://app.test/",
            r#"<html><body><a id="slow" href="/slow">Slow</a></body></html>"#,
        );
        browser.stalled_clicks.insert("#slow".to_string());
        browser.log = log.clone();

        let mut engine = CrawlEngine::new(
            Box::new(browser),
            config("https://app.test/", &["a"]).with_navigation_timeout(Duration::from_millis(50)),
            scope(),
        )
        .unwrap();
        engine.run().await.unwrap();

        let report = engine.report();
        assert_eq!(report.pruned, 0);
        assert_eq!(report.executed, 1);
        assert_eq!(report.merges, 1);
        let log = log.lock().unwrap();
        let clicked = log.iter().position(|l| l == "click #slow").unwrap();
        assert_eq!(log[clicked + 1], "network idle");
    }
}
