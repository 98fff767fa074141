// Crawl outputs: URL list, state graph and the terminal summary

use chrono::{DateTime, Local};
use colored::Colorize;
use petgraph::dot::Dot;
use serde::Serialize;
use skitter_scanner::{CrawlReport, CrawlStateManager};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use url::Url;

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub session_id: String,
    pub entry_point: String,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub report: CrawlReport,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<PathBuf>,
    /// Set when the crawl ended on a fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlSummary {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Extract the path component from a URL, keeping the query
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            match u.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path,
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// One URL per line, in discovery order.
pub fn write_url_list(path: &Path, urls: &[String]) -> io::Result<()> {
    create_parent(path)?;
    let mut file = File::create(path)?;
    for url in urls {
        writeln!(file, "{}", url)?;
    }
    file.flush()
}

/// Graphviz rendering of the state graph.
pub fn render_graph_dot(manager: &CrawlStateManager) -> String {
    let graph = manager.to_graph();
    format!("{}", Dot::new(&graph))
}

pub fn write_graph_dot(path: &Path, manager: &CrawlStateManager) -> io::Result<()> {
    create_parent(path)?;
    fs::write(path, render_graph_dot(manager))
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Generate the end-of-crawl summary shown on the terminal
pub fn generate_crawl_report(summary: &CrawlSummary) -> String {
    let report = &summary.report;
    let mut out = String::new();

    out.push_str(DIVIDER);
    out.push_str("\n\n");
    out.push_str("# Summary:\n");
    out.push_str(&format!("  Session: {}\n", summary.session_id));
    out.push_str(&format!("  Entry point: {}\n", summary.entry_point));
    out.push_str(&format!(
        "  Started: {}\n",
        summary.started.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "  Finished: {} ({:.1}s)\n",
        summary.finished.format("%Y-%m-%d %H:%M:%S"),
        report.elapsed_ms as f64 / 1000.0
    ));
    out.push_str(&format!("  States discovered: {}\n", report.states));
    out.push_str(&format!(
        "  Actions executed: {} of {}\n",
        report.executed, report.actions
    ));
    out.push_str(&format!("  Actions pruned: {}\n", report.pruned));
    out.push_str(&format!(
        "  Replays: {}  Merges: {}\n",
        report.replays, report.merges
    ));
    out.push_str(&format!("  URLs collected: {}\n", report.urls.len()));
    if report.deadline_reached {
        out.push_str(&format!("  {}\n", "Stopped at the time limit".yellow()));
    }
    if let Some(error) = &summary.error {
        out.push_str(&format!("  {} {}\n", "Crawl failed:".red().bold(), error));
    }

    out.push('\n');
    out.push_str(DIVIDER);
    out.push_str("\n\n");

    // Group URLs by host
    let mut by_host: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for url in &report.urls {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        by_host.entry(host).or_default().push(url);
    }

    for (host, urls) in &by_host {
        out.push_str(&format!("## {}\n", host));
        out.push_str(&format!("  {} URLs found\n\n", urls.len()));
        for url in urls {
            out.push_str(&format!("  {} {}\n", "•".green(), extract_url_path(url)));
        }
        out.push('\n');
    }

    out.push_str(&format!("URL list written to {}\n", summary.output.display()));
    if let Some(graph) = &summary.graph {
        out.push_str(&format!("State graph written to {}\n", graph.display()));
    }

    out
}
