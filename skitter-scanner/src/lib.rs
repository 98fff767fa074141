pub mod browser;
#[cfg(feature = "chrome")]
pub mod chrome;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod locator;
pub mod manager;
pub mod model;
pub mod scope;

pub use browser::{
    BasicAuth, Browser, BrowserError, RequestDecision, RequestInterceptor, WaitPolicy,
};
#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromeOptions};
pub use engine::{CrawlEngine, CrawlProgress, CrawlReport, CrawlerConfig, Phase, ProgressCallback};
pub use error::ScanError;
pub use http::HttpBrowser;
pub use manager::CrawlStateManager;
pub use model::{ActionId, CrawlAction, CrawlInput, CrawlState, StateHash, StateId};
pub use scope::ScopePolicy;
