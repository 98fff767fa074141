use colored::Colorize;

pub mod auth;
pub mod config;
pub mod crawl;
pub mod report;

pub use auth::{AuthError, AuthPlan, Recording};
pub use config::{Config, ConfigError, DEFAULT_CONFIG, ValidatedConfig};
pub use crawl::{CrawlOptions, execute_crawl};
pub use report::{CrawlSummary, generate_crawl_report};

const BANNER: &str = r#"
      _    _ _   _
  ___| | _(_) |_| |_ ___ _ __
 / __| |/ / | __| __/ _ \ '__|
 \__ \   <| | |_| ||  __/ |
 |___/_|\_\_|\__|\__\___|_|
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_green().bold());
    println!(
        "  {} {}\n",
        "stateful web crawler".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
