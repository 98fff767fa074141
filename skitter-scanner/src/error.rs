use crate::browser::BrowserError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid scope pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Could not snapshot the page at {url}: {reason}")]
    Snapshot { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ScanError>;
