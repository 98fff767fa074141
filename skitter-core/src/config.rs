// Crawl configuration file: schema, loading and validation

use crate::auth::{AuthError, AuthPlan, Recording};
use regex::Regex;
use serde::{Deserialize, Serialize};
use skitter_scanner::fingerprint::Interactables;
use skitter_scanner::{BasicAuth, CrawlerConfig, ScanError, ScopePolicy};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration written by `skitter init`.
pub const DEFAULT_CONFIG: &str = include_str!("../config/skitter.json");

pub const DEFAULT_OUTPUT: &str = "skitter-urls.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unusable authentication recording: {0}")]
    Recording(#[from] AuthError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserSettings,
    pub crawler: CrawlerSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    /// Plain HTTP fetches, no script execution.
    #[default]
    Http,
    /// Chromium over the DevTools protocol.
    Chrome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    #[serde(default)]
    pub engine: BrowserEngine,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub maximize: bool,
    #[serde(default)]
    pub proxy: ProxySettings,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            headless: default_headless(),
            maximize: false,
            proxy: ProxySettings::default(),
        }
    }
}

fn default_headless() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerSettings {
    pub entry_point: String,
    /// Milliseconds.
    pub event_timeout: u64,
    pub navigation_timeout: u64,
    pub event_wait: u64,
    /// 0 = unbounded.
    pub max_duration: u64,
    pub elements: Vec<String>,
    pub max_children: usize,
    pub max_depth: usize,
    #[serde(default)]
    pub authentication: AuthenticationSettings,
    pub include_regexes: Vec<String>,
    #[serde(default)]
    pub exclude_regexes: Vec<String>,
    #[serde(default)]
    pub upload_file: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSettings {
    #[serde(default)]
    pub basic_auth: BasicAuthSettings,
    #[serde(default)]
    pub script_auth: ScriptAuthSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicAuthSettings {
    pub enabled: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptAuthSettings {
    pub enabled: bool,
    /// Chrome DevTools Recorder export.
    #[serde(default)]
    pub pptr_recording: Option<String>,
}

/// How the browser session is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserLaunch {
    pub engine: BrowserEngine,
    pub headless: bool,
    pub maximize: bool,
    /// `host:port`
    pub proxy: Option<String>,
}

/// Everything a crawl needs, checked and converted.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub crawler: CrawlerConfig,
    pub scope: ScopePolicy,
    pub browser: BrowserLaunch,
    pub auth: AuthPlan,
    pub output: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Checks every field and builds the engine configuration. Nothing here
    /// touches the network.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let crawler = &self.crawler;

        let entry_point = Url::parse(&crawler.entry_point)
            .map_err(|e| ConfigError::invalid("crawler.entryPoint", e.to_string()))?;
        if !matches!(entry_point.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "crawler.entryPoint",
                format!("unsupported scheme '{}'", entry_point.scheme()),
            ));
        }

        if crawler.elements.is_empty() {
            return Err(ConfigError::invalid(
                "crawler.elements",
                "at least one selector is required",
            ));
        }
        Interactables::new(&crawler.elements).map_err(|e| match e {
            ScanError::InvalidSelector { selector, reason } => ConfigError::invalid(
                "crawler.elements",
                format!("'{}': {}", selector, reason),
            ),
            other => ConfigError::invalid("crawler.elements", other.to_string()),
        })?;

        if crawler.include_regexes.is_empty() {
            return Err(ConfigError::invalid(
                "crawler.includeRegexes",
                "at least one pattern is required",
            ));
        }
        check_patterns("crawler.includeRegexes", &crawler.include_regexes)?;
        check_patterns("crawler.excludeRegexes", &crawler.exclude_regexes)?;
        let mut scope = ScopePolicy::new(&crawler.include_regexes, &crawler.exclude_regexes)
            .map_err(|e| ConfigError::invalid("crawler.includeRegexes", e.to_string()))?;

        let browser = self.browser_launch()?;
        let auth = self.auth_plan(&entry_point)?;
        if let Some(recording) = &auth.recording {
            recording.widen_scope(&mut scope)?;
        }

        let upload_file = crawler.upload_file.as_deref().map(expand_path);
        let output = crawler
            .output
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let config = CrawlerConfig::new(entry_point, crawler.elements.clone())
            .with_event_timeout(Duration::from_millis(crawler.event_timeout))
            .with_navigation_timeout(Duration::from_millis(crawler.navigation_timeout))
            .with_event_wait(Duration::from_millis(crawler.event_wait))
            .with_max_duration(unbounded_if_zero(crawler.max_duration).map(Duration::from_millis))
            .with_max_depth(unbounded_if_zero(crawler.max_depth))
            .with_max_children(unbounded_if_zero(crawler.max_children))
            .with_upload_file(upload_file);

        Ok(ValidatedConfig {
            crawler: config,
            scope,
            browser,
            auth,
            output,
        })
    }

    fn browser_launch(&self) -> Result<BrowserLaunch, ConfigError> {
        let settings = &self.browser;
        if settings.engine == BrowserEngine::Chrome && !cfg!(feature = "chrome") {
            return Err(ConfigError::invalid(
                "browser.engine",
                "this build has no chrome support (rebuild with --features chrome)",
            ));
        }

        let proxy = if settings.proxy.enabled {
            let host = settings
                .proxy
                .host
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| ConfigError::invalid("browser.proxy.host", "required when enabled"))?;
            let port = settings
                .proxy
                .port
                .ok_or_else(|| ConfigError::invalid("browser.proxy.port", "required when enabled"))?;
            Some(format!("{}:{}", host, port))
        } else {
            None
        };

        Ok(BrowserLaunch {
            engine: settings.engine,
            headless: settings.headless,
            maximize: settings.maximize,
            proxy,
        })
    }

    fn auth_plan(&self, entry_point: &Url) -> Result<AuthPlan, ConfigError> {
        let settings = &self.crawler.authentication;
        let mut plan = AuthPlan::default();

        if settings.basic_auth.enabled {
            let username = settings.basic_auth.username.clone().ok_or_else(|| {
                ConfigError::invalid(
                    "crawler.authentication.basicAuth.username",
                    "required when enabled",
                )
            })?;
            let password = settings.basic_auth.password.clone().ok_or_else(|| {
                ConfigError::invalid(
                    "crawler.authentication.basicAuth.password",
                    "required when enabled",
                )
            })?;
            plan.basic = Some(BasicAuth::new(entry_point, username, password));
        }

        if settings.script_auth.enabled {
            let path = settings.script_auth.pptr_recording.as_deref().ok_or_else(|| {
                ConfigError::invalid(
                    "crawler.authentication.scriptAuth.pptrRecording",
                    "required when enabled",
                )
            })?;
            plan.recording = Some(Recording::load(&expand_path(path))?);
        }

        Ok(plan)
    }
}

fn check_patterns(field: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for (i, pattern) in patterns.iter().enumerate() {
        Regex::new(pattern)
            .map_err(|e| ConfigError::invalid(format!("{}[{}]", field, i), e.to_string()))?;
    }
    Ok(())
}

fn unbounded_if_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    if value == T::default() { None } else { Some(value) }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
