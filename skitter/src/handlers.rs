use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use skitter_core::config::{Config, ValidatedConfig, expand_path};
use skitter_core::{CrawlOptions, DEFAULT_CONFIG, execute_crawl, generate_crawl_report};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

pub const CONFIG_FILE_NAME: &str = "skitter.json";

/// Map the number of `-v` flags to a log level
pub fn verbosity_level(count: u8) -> Level {
    match count {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn init_tracing(verbosity: u8) {
    let result = tracing_subscriber::fmt()
        .with_max_level(verbosity_level(verbosity))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(e) = result {
        eprintln!("Could not initialise logging: {}", e);
    }
}

/// Resolve where `init` writes: directories get the default file name
pub fn config_destination(path: &str) -> PathBuf {
    let path = expand_path(path);
    if path.is_dir() {
        path.join(CONFIG_FILE_NAME)
    } else {
        path
    }
}

/// Write the bundled configuration, refusing to clobber without `force`
pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG).with_context(|| format!("Failed to write {}", path.display()))
}

/// Load and validate a configuration file, applying command line overrides
pub fn load_config(path: &str, output: Option<&PathBuf>) -> Result<ValidatedConfig> {
    let path = expand_path(path);
    let config =
        Config::load(&path).with_context(|| format!("Could not load {}", path.display()))?;
    let mut validated = config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    if let Some(output) = output {
        validated.output = output.clone();
    }
    Ok(validated)
}

pub fn handle_init(args: &ArgMatches) {
    let Some(path) = args.get_one::<String>("PATH") else {
        eprintln!("{} No destination given", "✗".red().bold());
        std::process::exit(2);
    };
    let force = args.get_flag("force");
    let destination = config_destination(path);

    match write_default_config(&destination, force) {
        Ok(()) => {
            println!(
                "{} Config file created at: {}",
                "✓".green().bold(),
                destination.display().to_string().bright_white()
            );
            println!(
                "{} Edit the entry point and scope, then run: skitter start --config {}",
                "→".blue(),
                destination.display()
            );
        }
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}

pub async fn handle_start(args: &ArgMatches, quiet: bool) {
    let Some(config_path) = args.get_one::<String>("config") else {
        eprintln!("{} --config is required", "✗".red().bold());
        std::process::exit(2);
    };
    let output = args.get_one::<PathBuf>("output");
    let graph = args.get_one::<PathBuf>("graph").cloned();

    let config = match load_config(config_path, output) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    };

    if !quiet {
        println!(
            "{} Crawling {}",
            "→".blue(),
            config.crawler.entry_point.as_str().bright_white()
        );
        println!();
    }

    let options = CrawlOptions {
        config,
        graph,
        show_progress: !quiet,
    };

    match execute_crawl(options).await {
        Ok(summary) => {
            println!();
            print!("{}", generate_crawl_report(&summary));
            if !summary.succeeded() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} Crawl failed: {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}
