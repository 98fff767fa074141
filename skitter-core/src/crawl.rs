use crate::auth::authenticate;
use crate::config::{BrowserEngine, BrowserLaunch, ValidatedConfig};
use crate::report::{CrawlSummary, extract_url_path, write_graph_dot, write_url_list};
use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use skitter_scanner::{Browser, CrawlEngine, CrawlProgress, HttpBrowser, ProgressCallback};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub config: ValidatedConfig,
    /// Where to write the state graph, if anywhere.
    pub graph: Option<PathBuf>,
    pub show_progress: bool,
}

/// Execute a crawl with the given options.
///
/// A crawl that fails part way still writes the URLs it collected and
/// returns a summary carrying the error; `Err` is reserved for failures
/// before any page was crawled and for unwritable outputs.
pub async fn execute_crawl(options: CrawlOptions) -> Result<CrawlSummary> {
    let session_id = Uuid::new_v4().to_string();
    let span = info_span!("crawl", session = %session_id);
    run(options, session_id).instrument(span).await
}

async fn run(options: CrawlOptions, session_id: String) -> Result<CrawlSummary> {
    let CrawlOptions {
        config,
        graph,
        show_progress,
    } = options;
    let ValidatedConfig {
        crawler,
        scope,
        browser: launch,
        auth,
        output,
    } = config;
    let started = Local::now();
    let entry_point = crawler.entry_point.to_string();

    let progress_bar = show_progress.then(|| {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Launching browser...");
        pb
    });

    let mut browser = launch_browser(&launch, crawler.navigation_timeout)
        .await
        .context("Failed to launch browser")?;

    if !auth.is_empty() {
        if let Some(pb) = &progress_bar {
            pb.set_message("Authenticating...");
        }
        if let Err(e) = authenticate(browser.as_mut(), &auth, crawler.navigation_timeout).await {
            if let Err(close) = browser.close().await {
                warn!("Failed to close browser: {}", close);
            }
            if let Some(pb) = &progress_bar {
                pb.finish_and_clear();
            }
            return Err(e).context("Authentication failed");
        }
    }

    let mut engine = CrawlEngine::new(browser, crawler, scope)?;
    if let Some(pb) = &progress_bar {
        engine = engine.with_progress_callback(spinner_callback(pb.clone()));
    }

    let result = engine.run().await;
    let report = engine.report();
    if let Err(e) = &result {
        error!("Crawl ended early: {}", e);
    }

    write_url_list(&output, &report.urls)
        .with_context(|| format!("Failed to write URL list to {}", output.display()))?;
    info!("Wrote {} URLs to {}", report.urls.len(), output.display());

    if let Some(path) = &graph {
        write_graph_dot(path, engine.manager())
            .with_context(|| format!("Failed to write state graph to {}", path.display()))?;
        info!("Wrote state graph to {}", path.display());
    }

    if let Some(pb) = &progress_bar {
        pb.finish_with_message(format!(
            "Crawl complete! {} states, {} URLs",
            report.states,
            report.urls.len()
        ));
    }

    Ok(CrawlSummary {
        session_id,
        entry_point,
        started,
        finished: Local::now(),
        report,
        output,
        graph,
        error: result.err().map(|e| e.to_string()),
    })
}

fn spinner_callback(pb: ProgressBar) -> ProgressCallback {
    Arc::new(move |progress: &CrawlProgress| {
        pb.set_message(format!(
            "{:?}: {} states, {} actions executed - {}",
            progress.phase,
            progress.states,
            progress.executed,
            extract_url_path(&progress.url)
        ));
    })
}

async fn launch_browser(launch: &BrowserLaunch, timeout: Duration) -> Result<Box<dyn Browser>> {
    match launch.engine {
        BrowserEngine::Http => {
            let mut builder = HttpBrowser::builder().with_timeout(timeout);
            if let Some(proxy) = &launch.proxy {
                builder = builder.with_proxy(format!("http://{}", proxy));
            }
            Ok(Box::new(builder.build()?))
        }
        #[cfg(feature = "chrome")]
        BrowserEngine::Chrome => {
            let options = skitter_scanner::ChromeOptions {
                headless: launch.headless,
                maximize: launch.maximize,
                proxy: launch.proxy.clone(),
            };
            Ok(Box::new(skitter_scanner::ChromeBrowser::launch(&options).await?))
        }
        #[cfg(not(feature = "chrome"))]
        BrowserEngine::Chrome => anyhow::bail!("this build has no chrome support"),
    }
}
